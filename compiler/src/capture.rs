// capture.rs — Equation capture context
//
// A recording session in which the model author writes statements against
// the symbols of one entity type. Assignments are recorded as
// `(target, expression)` pairs instead of being executed.
//
// Preconditions: the scope's attribute lists are final (extracted before any
//                entity is analysed).
// Postconditions: every recorded expression only mentions declared
//                 attributes, `t`, `dt` and registered random draws.
// Failure modes: undeclared symbols, invalid targets and misplaced
//                statements → `DefinitionError`, raised at the offending call.
// Side effects: `debug!` event per recorded statement.

use serde::Serialize;
use tracing::debug;

use crate::attribute::{derivative_of, Attribute};
use crate::error::{DefinitionError, EntityMethod};
use crate::expr::{self, Expr};
use crate::method::NumericalMethod;

// ── Captured data ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    Uniform { min: Expr, max: Expr },
    Normal { mu: Expr, sigma: Expr },
}

impl Distribution {
    pub fn params(&self) -> [&Expr; 2] {
        match self {
            Distribution::Uniform { min, max } => [min, max],
            Distribution::Normal { mu, sigma } => [mu, sigma],
        }
    }
}

/// A random draw: one fresh value per element and step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RandomVariableSpec {
    /// `_rand_N`, unique per entity type.
    pub name: String,
    pub distribution: Distribution,
}

impl RandomVariableSpec {
    /// Parameters mention no symbol: the distribution can be built once.
    pub fn is_constant(&self) -> bool {
        self.distribution
            .params()
            .iter()
            .all(|p| p.free_symbols().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CapturedStatement {
    pub target: String,
    pub expr: Expr,
}

impl CapturedStatement {
    /// Integrated variable for `d<x>_dt` targets.
    pub fn ode_variable(&self) -> Option<&str> {
        derivative_of(&self.target)
    }

    pub fn is_ode(&self) -> bool {
        self.ode_variable().is_some()
    }
}

/// Statements of one capture context, in author order.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSession {
    pub numerical: NumericalMethod,
    pub statements: Vec<CapturedStatement>,
}

// ── Scope ───────────────────────────────────────────────────────────────────

/// Symbols visible to the equations of one entity type.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub entity: &'a str,
    pub own: &'a [Attribute],
    /// Presynaptic type name and attributes (synapses only).
    pub pre: Option<(&'a str, &'a [Attribute])>,
    pub post: Option<(&'a str, &'a [Attribute])>,
}

impl<'a> Scope<'a> {
    pub fn neuron(entity: &'a str, own: &'a [Attribute]) -> Self {
        Scope {
            entity,
            own,
            pre: None,
            post: None,
        }
    }

    pub fn synapse(
        entity: &'a str,
        own: &'a [Attribute],
        pre: (&'a str, &'a [Attribute]),
        post: (&'a str, &'a [Attribute]),
    ) -> Self {
        Scope {
            entity,
            own,
            pre: Some(pre),
            post: Some(post),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&'a Attribute> {
        self.own.iter().find(|a| a.name == name)
    }

    fn namespace(&self, ns: &str) -> Result<(&'a str, &'a [Attribute]), DefinitionError> {
        let side = match ns {
            "pre" => self.pre,
            "post" => self.post,
            _ => None,
        };
        side.ok_or_else(|| DefinitionError::UnknownNamespace {
            namespace: ns.to_string(),
        })
    }

    /// Resolve `name` (`v`, `t`, `pre.r`) to a symbol.
    pub fn symbol(&self, name: &str) -> Result<Expr, DefinitionError> {
        if let Some((ns, attr)) = name.split_once('.') {
            let (owner, attrs) = self.namespace(ns)?;
            if attrs.iter().any(|a| a.name == attr) {
                return Ok(expr::sym(name));
            }
            return Err(DefinitionError::UndeclaredSymbol {
                entity: owner.to_string(),
                name: attr.to_string(),
            });
        }
        if name == "t" || name == "dt" || self.attribute(name).is_some() {
            return Ok(expr::sym(name));
        }
        Err(DefinitionError::UndeclaredSymbol {
            entity: self.entity.to_string(),
            name: name.to_string(),
        })
    }

    /// Check that `method` may assign `target`: `spike` only in the spike
    /// method, `target` only in transmit, otherwise an own attribute or the
    /// derivative `d<var>_dt` of an own variable.
    pub fn check_target(&self, method: EntityMethod, target: &str) -> Result<(), DefinitionError> {
        let misplaced = || DefinitionError::MisplacedStatement {
            target: target.to_string(),
            method,
        };
        match (method, target) {
            (EntityMethod::Spike, "spike") | (EntityMethod::Transmit, "target") => return Ok(()),
            (EntityMethod::Spike | EntityMethod::Transmit, _) | (_, "spike" | "target") => {
                return Err(misplaced());
            }
            _ => {}
        }
        if self.attribute(target).is_some() {
            return Ok(());
        }
        if let Some(var) = derivative_of(target) {
            return match self.attribute(var) {
                Some(a) if a.is_variable() => Ok(()),
                Some(_) => Err(DefinitionError::NotAVariable {
                    name: var.to_string(),
                }),
                None => Err(DefinitionError::UndeclaredSymbol {
                    entity: self.entity.to_string(),
                    name: var.to_string(),
                }),
            };
        }
        Err(DefinitionError::InvalidTarget {
            target: target.to_string(),
        })
    }
}

// ── Context ─────────────────────────────────────────────────────────────────

/// Capture state for one method of one entity type. Opens any number of
/// contexts through [`MethodCapture::equations`].
#[derive(Debug)]
pub struct MethodCapture<'a> {
    scope: Scope<'a>,
    method: EntityMethod,
    randoms: Vec<RandomVariableSpec>,
    sessions: Vec<CaptureSession>,
}

impl<'a> MethodCapture<'a> {
    /// `randoms` carries the draws registered by earlier methods so names
    /// stay unique across the entity type.
    pub fn new(scope: Scope<'a>, method: EntityMethod, randoms: Vec<RandomVariableSpec>) -> Self {
        MethodCapture {
            scope,
            method,
            randoms,
            sessions: Vec::new(),
        }
    }

    pub fn method(&self) -> EntityMethod {
        self.method
    }

    pub fn scope(&self) -> &Scope<'a> {
        &self.scope
    }

    /// Open a capture context. Statements recorded by `body` form one session.
    pub fn equations(
        &mut self,
        numerical: NumericalMethod,
        body: impl FnOnce(&mut Equations<'_, 'a>) -> Result<(), DefinitionError>,
    ) -> Result<(), DefinitionError> {
        let mut eq = Equations {
            scope: &self.scope,
            method: self.method,
            randoms: &mut self.randoms,
            statements: Vec::new(),
        };
        body(&mut eq)?;
        let statements = eq.statements;
        debug!(
            entity = self.scope.entity,
            method = %self.method,
            numerical = %numerical,
            statements = statements.len(),
            "capture context closed"
        );
        self.sessions.push(CaptureSession {
            numerical,
            statements,
        });
        Ok(())
    }

    /// Finalize: the sessions and every random draw registered so far.
    pub fn finish(self) -> (Vec<CaptureSession>, Vec<RandomVariableSpec>) {
        (self.sessions, self.randoms)
    }
}

/// An open capture context.
pub struct Equations<'c, 'a> {
    scope: &'c Scope<'a>,
    method: EntityMethod,
    randoms: &'c mut Vec<RandomVariableSpec>,
    statements: Vec<CapturedStatement>,
}

impl Equations<'_, '_> {
    /// Symbol of an own attribute, `t` or `dt`.
    pub fn sym(&self, name: &str) -> Result<Expr, DefinitionError> {
        if name.contains('.') {
            return Err(DefinitionError::UndeclaredSymbol {
                entity: self.scope.entity.to_string(),
                name: name.to_string(),
            });
        }
        self.scope.symbol(name)
    }

    /// Presynaptic attribute `pre.<name>`.
    pub fn pre(&self, name: &str) -> Result<Expr, DefinitionError> {
        self.scope.symbol(&format!("pre.{name}"))
    }

    /// Postsynaptic attribute `post.<name>`.
    pub fn post(&self, name: &str) -> Result<Expr, DefinitionError> {
        self.scope.symbol(&format!("post.{name}"))
    }

    pub fn t(&self) -> Expr {
        expr::sym("t")
    }

    pub fn dt(&self) -> Expr {
        expr::sym("dt")
    }

    /// Record `target = expr`. `target` is an attribute name, `d<var>_dt`,
    /// `spike` (spike method) or `target` (transmit method).
    pub fn record(&mut self, target: &str, expr: Expr) -> Result<(), DefinitionError> {
        self.check_target(target)?;
        self.check_symbols(&expr)?;
        debug!(
            entity = self.scope.entity,
            method = %self.method,
            target,
            "recorded statement"
        );
        self.statements.push(CapturedStatement {
            target: target.to_string(),
            expr,
        });
        Ok(())
    }

    /// Record `d<var>/dt = expr`.
    pub fn ode(&mut self, var: &str, expr: Expr) -> Result<(), DefinitionError> {
        self.record(&format!("d{var}_dt"), expr)
    }

    /// Record the spike condition.
    pub fn condition(&mut self, expr: Expr) -> Result<(), DefinitionError> {
        self.record("spike", expr)
    }

    /// Record the value a synapse transmits to its postsynaptic target.
    pub fn transmit(&mut self, expr: Expr) -> Result<(), DefinitionError> {
        self.record("target", expr)
    }

    pub fn ite(&self, cond: Expr, then: Expr, otherwise: Expr) -> Expr {
        expr::ite(cond, then, otherwise)
    }

    /// Clamp `x` to `[lo, hi]`; either bound may be omitted.
    pub fn clip(&self, x: Expr, lo: Option<Expr>, hi: Option<Expr>) -> Expr {
        expr::clip(x, lo, hi)
    }

    /// Number that simplification never folds.
    pub fn cast(&self, value: f64) -> Expr {
        expr::literal(value)
    }

    /// This step's draw from `Uniform(min, max)`.
    pub fn uniform(&mut self, min: Expr, max: Expr) -> Result<Expr, DefinitionError> {
        self.register(Distribution::Uniform { min, max })
    }

    /// This step's draw from `Normal(mu, sigma)`.
    pub fn normal(&mut self, mu: Expr, sigma: Expr) -> Result<Expr, DefinitionError> {
        self.register(Distribution::Normal { mu, sigma })
    }

    fn register(&mut self, distribution: Distribution) -> Result<Expr, DefinitionError> {
        for p in distribution.params() {
            self.check_symbols(p)?;
        }
        let name = format!("_rand_{}", self.randoms.len());
        debug!(entity = self.scope.entity, name = %name, "registered random variable");
        self.randoms.push(RandomVariableSpec {
            name: name.clone(),
            distribution,
        });
        Ok(expr::sym(name))
    }

    fn check_target(&self, target: &str) -> Result<(), DefinitionError> {
        self.scope.check_target(self.method, target)
    }

    fn check_symbols(&self, e: &Expr) -> Result<(), DefinitionError> {
        for name in e.free_symbols() {
            if self.randoms.iter().any(|r| r.name == name) {
                continue;
            }
            self.scope.symbol(&name)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
