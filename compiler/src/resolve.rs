// resolve.rs — Resolution of parsed model files
//
// Turns the AST of a `.nml` file into entity definitions. Attribute
// declarations of every entity are converted first, so synapses can name
// neuron types declared later in the file. Method bodies are then bound
// against each entity's scope (with spans for every error) and packaged as
// method bodies that replay the statements through the capture context.
//
// Preconditions: `model` is a well-formed AST from the parser.
// Postconditions: when no diagnostics are returned, every recorded statement
//                 has a valid target and mentions only visible symbols.
// Failure modes: unknown names, invalid targets, unknown numerical methods or
//                numeric types, duplicate declarations → `Diagnostic` entries
//                with spans. Resolution continues past errors.
// Side effects: `debug!` event per resolved entity.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::ast::*;
use crate::attribute::{validate_name, Attribute};
use crate::capture::{MethodCapture, Scope};
use crate::diag::Diagnostic;
use crate::entity::{EntityDef, NeuronDef, SynapseDef};
use crate::error::{CompileError, DefinitionError, EntityMethod};
use crate::expr::{self, CmpOp, Expr, Func};
use crate::method::NumericalMethod;

// ── Public types ────────────────────────────────────────────────────────────

/// Result of resolving a model file.
pub struct ResolveResult {
    /// Entity definitions in declaration order.
    pub entities: Vec<EntityDef>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolve a parsed model file into entity definitions.
pub fn resolve(model: &ModelFile) -> ResolveResult {
    let mut ctx = ResolveCtx::default();
    ctx.collect_attributes(model);
    for decl in &model.entities {
        ctx.resolve_entity(decl);
    }
    ResolveResult {
        entities: ctx.entities,
        diagnostics: ctx.diagnostics,
    }
}

/// Convert an expression without a scope: every name is a free symbol,
/// `pre.x`/`post.x` keep their dotted spelling.
pub fn free_expr(node: &ExprNode) -> Result<Expr, Diagnostic> {
    let mut b = SessionBuilder::free();
    b.expr(node)
        .map_err(|(err, span)| Diagnostic::from_definition(&err, span))
}

// ── Bound statements ────────────────────────────────────────────────────────

type Spanned = (DefinitionError, Span);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrawKind {
    Uniform,
    Normal,
}

/// A random draw written in a method body, keyed by a session placeholder.
#[derive(Debug, Clone)]
struct Draw {
    placeholder: String,
    kind: DrawKind,
    params: [Expr; 2],
}

/// One method block: a capture session ready to be replayed.
#[derive(Debug, Clone)]
struct BoundSession {
    numerical: NumericalMethod,
    draws: Vec<Draw>,
    statements: Vec<(String, Expr)>,
}

impl BoundSession {
    fn replay(&self, capture: &mut MethodCapture<'_>) -> Result<(), DefinitionError> {
        capture.equations(self.numerical, |n| {
            let mut drawn: HashMap<String, Expr> = HashMap::new();
            for d in &self.draws {
                let [a, b] = &d.params;
                let (a, b) = (a.subs(&drawn), b.subs(&drawn));
                let e = match d.kind {
                    DrawKind::Uniform => n.uniform(a, b)?,
                    DrawKind::Normal => n.normal(a, b)?,
                };
                drawn.insert(d.placeholder.clone(), e);
            }
            for (target, e) in &self.statements {
                n.record(target, e.subs(&drawn))?;
            }
            Ok(())
        })
    }
}

fn method_body(
    sessions: Vec<BoundSession>,
) -> impl Fn(&mut MethodCapture<'_>) -> Result<(), DefinitionError> + 'static {
    move |capture: &mut MethodCapture<'_>| sessions.iter().try_for_each(|s| s.replay(capture))
}

// ── Expression binding ──────────────────────────────────────────────────────

struct SessionBuilder<'a> {
    /// `None` binds every name as a free symbol.
    scope: Option<Scope<'a>>,
    lets: HashMap<String, Expr>,
    /// `None` rejects random draws.
    draws: Option<Vec<Draw>>,
}

impl<'a> SessionBuilder<'a> {
    fn free() -> Self {
        SessionBuilder {
            scope: None,
            lets: HashMap::new(),
            draws: None,
        }
    }

    fn scoped(scope: Scope<'a>) -> Self {
        SessionBuilder {
            scope: Some(scope),
            lets: HashMap::new(),
            draws: Some(Vec::new()),
        }
    }

    fn symbol(&self, name: &str, span: Span) -> Result<Expr, Spanned> {
        if let Some(e) = self.lets.get(name) {
            return Ok(e.clone());
        }
        match &self.scope {
            Some(scope) => scope.symbol(name).map_err(|e| (e, span)),
            None => match name.split_once('.') {
                Some((ns, _)) if ns != "pre" && ns != "post" => Err((
                    DefinitionError::UnknownNamespace {
                        namespace: ns.to_string(),
                    },
                    span,
                )),
                _ => Ok(expr::sym(name)),
            },
        }
    }

    fn expr(&mut self, node: &ExprNode) -> Result<Expr, Spanned> {
        Ok(match &node.kind {
            ExprKind::Number { value, .. } => expr::num(*value),
            ExprKind::Name(id) => self.symbol(&id.name, id.span)?,
            ExprKind::Namespaced(ns, attr) => {
                self.symbol(&format!("{}.{}", ns.name, attr.name), node.span)?
            }
            ExprKind::Unary(op, inner) => {
                let e = self.expr(inner)?;
                match op {
                    UnOp::Neg => expr::neg(e),
                    UnOp::Not => expr::not(e),
                }
            }
            ExprKind::Binary(op, lhs, rhs) => {
                let (a, b) = (self.expr(lhs)?, self.expr(rhs)?);
                binary(*op, a, b)
            }
            ExprKind::Call(name, args) => self.call(name, args, node.span)?,
        })
    }

    fn call(&mut self, name: &Ident, args: &[ExprNode], span: Span) -> Result<Expr, Spanned> {
        let arity = |expected: &'static str| {
            (
                DefinitionError::Arity {
                    name: name.name.clone(),
                    expected,
                    found: args.len(),
                },
                span,
            )
        };
        match name.name.as_str() {
            "cast" => {
                let [arg] = args else {
                    return Err(arity("1"));
                };
                cast_literal(arg).ok_or((DefinitionError::CastOfNonLiteral, arg.span))
            }
            "ite" => {
                let [c, a, b] = args else {
                    return Err(arity("3"));
                };
                Ok(expr::ite(self.expr(c)?, self.expr(a)?, self.expr(b)?))
            }
            "clip" => match args {
                [x, lo] => Ok(expr::clip(self.expr(x)?, Some(self.expr(lo)?), None)),
                [x, lo, hi] => Ok(expr::clip(
                    self.expr(x)?,
                    Some(self.expr(lo)?),
                    Some(self.expr(hi)?),
                )),
                _ => Err(arity("2 or 3")),
            },
            "pow" => {
                let [b, e] = args else {
                    return Err(arity("2"));
                };
                Ok(expr::pow(self.expr(b)?, self.expr(e)?))
            }
            "Uniform" | "uniform" => self.draw(DrawKind::Uniform, name, args, span),
            "Normal" | "normal" => self.draw(DrawKind::Normal, name, args, span),
            other => {
                let func = Func::from_name(other).ok_or_else(|| {
                    (
                        DefinitionError::UnknownFunction {
                            name: other.to_string(),
                        },
                        name.span,
                    )
                })?;
                if args.len() != func.arity() {
                    return Err(arity(if func.arity() == 1 { "1" } else { "2" }));
                }
                let args = args
                    .iter()
                    .map(|a| self.expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(expr::call(func, args))
            }
        }
    }

    fn draw(
        &mut self,
        kind: DrawKind,
        name: &Ident,
        args: &[ExprNode],
        span: Span,
    ) -> Result<Expr, Spanned> {
        let [a, b] = args else {
            return Err((
                DefinitionError::Arity {
                    name: name.name.clone(),
                    expected: "2",
                    found: args.len(),
                },
                span,
            ));
        };
        if self.draws.is_none() {
            return Err((
                DefinitionError::UnknownFunction {
                    name: name.name.clone(),
                },
                name.span,
            ));
        }
        let params = [self.expr(a)?, self.expr(b)?];
        let draws = self.draws.get_or_insert_with(Vec::new);
        let placeholder = format!("_draw_{}", draws.len());
        draws.push(Draw {
            placeholder: placeholder.clone(),
            kind,
            params,
        });
        Ok(expr::sym(placeholder))
    }
}

fn binary(op: BinOp, a: Expr, b: Expr) -> Expr {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => expr::sub(a, b),
        BinOp::Mul => a * b,
        BinOp::Div => expr::div(a, b),
        BinOp::Pow => expr::pow(a, b),
        BinOp::Lt => expr::cmp(CmpOp::Lt, a, b),
        BinOp::Le => expr::cmp(CmpOp::Le, a, b),
        BinOp::Gt => expr::cmp(CmpOp::Gt, a, b),
        BinOp::Ge => expr::cmp(CmpOp::Ge, a, b),
        BinOp::Eq => expr::cmp(CmpOp::Eq, a, b),
        BinOp::Ne => expr::cmp(CmpOp::Ne, a, b),
        BinOp::And => expr::and(a, b),
        BinOp::Or => expr::or(a, b),
    }
}

/// `cast(0.1)` / `cast(-2)`: a literal keeping the author's spelling.
fn cast_literal(node: &ExprNode) -> Option<Expr> {
    match &node.kind {
        ExprKind::Number { value, text } => Some(expr::literal_text(text.clone(), *value)),
        ExprKind::Unary(UnOp::Neg, inner) => match &inner.kind {
            ExprKind::Number { value, text } => Some(expr::literal_text(format!("-{text}"), -value)),
            _ => None,
        },
        _ => None,
    }
}

// ── Resolution context ──────────────────────────────────────────────────────

#[derive(Default)]
struct ResolveCtx {
    /// Converted attributes per entity name.
    attributes: HashMap<String, Vec<Attribute>>,
    neurons: HashSet<String>,
    /// Spans of the declarations kept after duplicate removal.
    kept: HashSet<Span>,
    entities: Vec<EntityDef>,
    diagnostics: Vec<Diagnostic>,
}

impl ResolveCtx {
    fn report(&mut self, entity: &str, method: Option<EntityMethod>, err: DefinitionError, span: Span) {
        let err = CompileError::new(entity, method, err);
        self.diagnostics.push(Diagnostic::from(&err).with_span(span));
    }

    // ── Phase 1: attributes ─────────────────────────────────────────────

    fn collect_attributes(&mut self, model: &ModelFile) {
        for decl in &model.entities {
            let name = decl.name();
            if self.attributes.contains_key(&name.name) {
                self.report(
                    &name.name,
                    None,
                    DefinitionError::DuplicateEntity {
                        name: name.name.clone(),
                    },
                    name.span,
                );
                continue;
            }
            let (decls, span) = match decl {
                EntityDecl::Neuron(n) => {
                    self.neurons.insert(n.name.name.clone());
                    (&n.attributes, n.span)
                }
                EntityDecl::Synapse(s) => (&s.attributes, s.span),
            };
            let attrs = self.convert_attributes(&name.name, decls);
            self.attributes.insert(name.name.clone(), attrs);
            self.kept.insert(span);
        }
    }

    fn convert_attributes(&mut self, entity: &str, decls: &[AttributeDecl]) -> Vec<Attribute> {
        let mut out: Vec<Attribute> = Vec::with_capacity(decls.len());
        for d in decls {
            let name = &d.name.name;
            if let Err(e) = validate_name(name) {
                self.report(entity, None, e, d.name.span);
                continue;
            }
            if out.iter().any(|a| &a.name == name) {
                self.report(
                    entity,
                    None,
                    DefinitionError::DuplicateAttribute { name: name.clone() },
                    d.name.span,
                );
                continue;
            }
            let init = d.init.map_or(0.0, |(v, _)| v);
            let mut attr = match d.keyword {
                AttrKeyword::Parameter => Attribute::parameter(name.clone(), init),
                AttrKeyword::Variable => Attribute::variable(name.clone(), init),
            };
            if let Some(ty) = &d.numeric_type {
                match ty.name.parse() {
                    Ok(t) => attr = attr.numeric(t),
                    Err(e) => self.report(entity, None, e, ty.span),
                }
            }
            for (modifier, _) in &d.modifiers {
                attr = match modifier {
                    Modifier::Shared => attr.shared(),
                    Modifier::PerElement => attr.per_element(),
                    Modifier::Input => attr.input(),
                    Modifier::Output => attr.output(),
                };
            }
            out.push(attr);
        }
        out
    }

    // ── Phase 2: methods ────────────────────────────────────────────────

    fn resolve_entity(&mut self, decl: &EntityDecl) {
        let span = match decl {
            EntityDecl::Neuron(n) => n.span,
            EntityDecl::Synapse(s) => s.span,
        };
        if !self.kept.contains(&span) {
            return;
        }
        let name = decl.name().name.clone();
        let own = self.attributes.get(&name).cloned().unwrap_or_default();

        match decl {
            EntityDecl::Neuron(n) => {
                let scope = Scope::neuron(&name, &own);
                let Some(methods) = self.bind_methods(scope, &n.methods, true) else {
                    return;
                };
                let mut def = NeuronDef::new(name.clone());
                def.attributes = own.clone();
                for (method, sessions) in methods {
                    def = match method {
                        EntityMethod::Update => def.update(method_body(sessions)),
                        EntityMethod::Spike => def.spike(method_body(sessions)),
                        EntityMethod::Reset => def.reset(method_body(sessions)),
                        EntityMethod::Transmit => def,
                    };
                }
                self.entities.push(def.into());
            }
            EntityDecl::Synapse(s) => {
                let pre = self.neuron_attributes(&name, &s.pre);
                let post = self.neuron_attributes(&name, &s.post);
                let (Some(pre), Some(post)) = (pre, post) else {
                    return;
                };
                let scope = Scope::synapse(
                    &name,
                    &own,
                    (&s.pre.name, &pre),
                    (&s.post.name, &post),
                );
                let Some(methods) = self.bind_methods(scope, &s.methods, false) else {
                    return;
                };
                let mut def = SynapseDef::new(name.clone(), s.pre.name.clone(), s.post.name.clone());
                def.attributes = own.clone();
                for (method, sessions) in methods {
                    def = match method {
                        EntityMethod::Update => def.update(method_body(sessions)),
                        EntityMethod::Transmit => def.transmit(method_body(sessions)),
                        EntityMethod::Spike | EntityMethod::Reset => def,
                    };
                }
                self.entities.push(def.into());
            }
        }
        debug!(entity = %name, attributes = own.len(), "resolved entity");
    }

    fn neuron_attributes(&mut self, entity: &str, id: &Ident) -> Option<Vec<Attribute>> {
        if self.neurons.contains(&id.name) {
            return self.attributes.get(&id.name).cloned();
        }
        self.report(
            entity,
            None,
            DefinitionError::UnknownNeuronType {
                name: id.name.clone(),
            },
            id.span,
        );
        None
    }

    /// Bind every method block; `None` when any error was reported.
    fn bind_methods(
        &mut self,
        scope: Scope<'_>,
        decls: &[MethodDecl],
        neuron: bool,
    ) -> Option<Vec<(EntityMethod, Vec<BoundSession>)>> {
        let before = self.diagnostics.len();
        let mut grouped: Vec<(EntityMethod, Vec<BoundSession>)> = Vec::new();
        for decl in decls {
            let method = match decl.kind {
                MethodKind::Update => EntityMethod::Update,
                MethodKind::Spike => EntityMethod::Spike,
                MethodKind::Reset => EntityMethod::Reset,
                MethodKind::Transmit => EntityMethod::Transmit,
            };
            let allowed = match method {
                EntityMethod::Update => true,
                EntityMethod::Spike | EntityMethod::Reset => neuron,
                EntityMethod::Transmit => !neuron,
            };
            if !allowed {
                let role = if neuron { "neuron" } else { "synapse" };
                self.report(
                    scope.entity,
                    Some(method),
                    DefinitionError::UnsupportedMethod { role, method },
                    decl.span,
                );
                continue;
            }
            let Some(session) = self.bind_session(scope, method, decl) else {
                continue;
            };
            match grouped.iter_mut().find(|(m, _)| *m == method) {
                Some((_, sessions)) => sessions.push(session),
                None => grouped.push((method, vec![session])),
            }
        }
        self.check_single_values(scope.entity, decls, &grouped);
        (self.diagnostics.len() == before).then_some(grouped)
    }

    fn bind_session(
        &mut self,
        scope: Scope<'_>,
        method: EntityMethod,
        decl: &MethodDecl,
    ) -> Option<BoundSession> {
        let numerical = match &decl.numerical {
            None => NumericalMethod::default(),
            Some(tag) => match tag.name.parse() {
                Ok(m) => m,
                Err(e) => {
                    self.report(scope.entity, Some(method), e, tag.span);
                    return None;
                }
            },
        };
        let mut builder = SessionBuilder::scoped(scope);
        let mut statements = Vec::with_capacity(decl.body.len());
        let mut ok = true;
        for stmt in &decl.body {
            match bind_statement(&mut builder, scope, method, stmt) {
                Ok(Some(s)) => statements.push(s),
                Ok(None) => {}
                Err((e, span)) => {
                    self.report(scope.entity, Some(method), e, span);
                    ok = false;
                }
            }
        }
        ok.then(|| BoundSession {
            numerical,
            draws: builder.draws.unwrap_or_default(),
            statements,
        })
    }

    /// Spike conditions and transmitted values: exactly one per entity.
    fn check_single_values(
        &mut self,
        entity: &str,
        decls: &[MethodDecl],
        grouped: &[(EntityMethod, Vec<BoundSession>)],
    ) {
        for (method, sessions) in grouped {
            let (single, too_many) = match method {
                EntityMethod::Spike => ("spike", DefinitionError::MultipleConditions),
                EntityMethod::Transmit => ("target", DefinitionError::MultipleTransmit),
                _ => continue,
            };
            let count: usize = sessions
                .iter()
                .map(|s| s.statements.iter().filter(|(t, _)| t == single).count())
                .sum();
            let mut spans = decls
                .iter()
                .filter(|d| d.kind == method_kind(*method))
                .map(|d| d.span);
            if count > 1 {
                if let Some(span) = spans.next() {
                    self.report(entity, Some(*method), too_many, span);
                }
            } else if count == 0 && *method == EntityMethod::Spike {
                if let Some(span) = spans.next() {
                    self.report(entity, Some(*method), DefinitionError::MissingCondition, span);
                }
            }
        }
    }
}

fn method_kind(method: EntityMethod) -> MethodKind {
    match method {
        EntityMethod::Update => MethodKind::Update,
        EntityMethod::Spike => MethodKind::Spike,
        EntityMethod::Reset => MethodKind::Reset,
        EntityMethod::Transmit => MethodKind::Transmit,
    }
}

/// Bind one statement. `let` yields no recorded statement.
fn bind_statement(
    builder: &mut SessionBuilder<'_>,
    scope: Scope<'_>,
    method: EntityMethod,
    stmt: &Stmt,
) -> Result<Option<(String, Expr)>, Spanned> {
    match &stmt.kind {
        StmtKind::Let(name, value) => {
            let e = builder.expr(value)?;
            builder.lets.insert(name.name.clone(), e);
            Ok(None)
        }
        StmtKind::Assign { target, op, value } => {
            let recorded = target.recorded_name();
            scope
                .check_target(method, &recorded)
                .map_err(|e| (e, target.name.span))?;
            let rhs = builder.expr(value)?;
            let e = match op {
                AssignOp::Set => rhs,
                AssignOp::AddAssign | AssignOp::SubAssign if target.derivative => {
                    return Err((DefinitionError::InvalidTarget { target: recorded }, target.name.span));
                }
                AssignOp::AddAssign => {
                    builder.symbol(&recorded, target.name.span)? + rhs
                }
                AssignOp::SubAssign => {
                    expr::sub(builder.symbol(&recorded, target.name.span)?, rhs)
                }
            };
            Ok(Some((recorded, e)))
        }
        StmtKind::Expr(value) => {
            let target = match method {
                EntityMethod::Transmit => "target",
                _ if scope.pre.is_some() => "target",
                _ => "spike",
            };
            scope
                .check_target(method, target)
                .map_err(|e| (e, stmt.span))?;
            let e = builder.expr(value)?;
            if method == EntityMethod::Spike && !e.is_boolean() {
                return Err((
                    DefinitionError::NonBooleanCondition {
                        condition: e.to_string(),
                    },
                    stmt.span,
                ));
            }
            Ok(Some((target.to_string(), e)))
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::codes;
    use crate::parser::{parse, parse_expr};

    fn resolve_src(src: &str) -> ResolveResult {
        let parsed = parse(src);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        resolve(&parsed.model.unwrap())
    }

    fn codes_of(r: &ResolveResult) -> Vec<&'static str> {
        r.diagnostics
            .iter()
            .filter_map(|d| d.code.map(|c| c.0))
            .collect()
    }

    const LIF: &str = "\
neuron LIF {
    parameter tau = 20.0
    parameter V_th = 1.0
    variable I = 0.0 input
    variable v = 0.0
    update { dv/dt = (I - v) / tau }
    spike { v >= V_th }
    reset { v = 0.0 }
}
";

    #[test]
    fn neuron_resolves_and_analyses() {
        let r = resolve_src(LIF);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        let EntityDef::Neuron(def) = &r.entities[0] else {
            panic!("expected a neuron");
        };
        let d = def.extract().unwrap();
        assert!(d.has_spike);
        assert!(d.attributes[2].is_input);
        let a = def.analyse(&d).unwrap();
        assert_eq!(a.update[0].steps[0].human_readable(), "v += dt*(I - v)/tau");
    }

    #[test]
    fn let_is_substituted_and_compound_assignment_expands() {
        let src = "\
neuron N {
    parameter tau = 10.0
    variable v = 0.0
    variable r = 0.0
    update {
        let leak = v / tau
        r += leak
    }
}
";
        let r = resolve_src(src);
        assert!(r.diagnostics.is_empty());
        let EntityDef::Neuron(def) = &r.entities[0] else {
            panic!("expected a neuron");
        };
        let a = def.analyse(&def.extract().unwrap()).unwrap();
        assert_eq!(a.update[0].steps[0].human_readable(), "r = r + v/tau");
    }

    #[test]
    fn undeclared_symbol_has_span() {
        let src = "neuron N {\n    variable v = 0.0\n    update { v = u }\n}\n";
        let r = resolve_src(src);
        assert_eq!(codes_of(&r), vec!["E0101"]);
        let (line, col) = r.diagnostics[0].line_col(src).unwrap();
        assert_eq!((line, col), (3, 18));
    }

    #[test]
    fn unknown_numerical_method() {
        let src = "neuron N {\n    variable v = 0.0\n    update heun { dv/dt = -v }\n}\n";
        let r = resolve_src(src);
        assert_eq!(r.diagnostics[0].code, Some(codes::E0109));
        assert!(r.entities.is_empty());
    }

    #[test]
    fn derivative_of_parameter() {
        let src = "neuron N {\n    parameter tau = 1.0\n    update { dtau/dt = 1.0 }\n}\n";
        assert_eq!(codes_of(&resolve_src(src)), vec!["E0103"]);
    }

    #[test]
    fn duplicate_and_reserved_names() {
        let src = "\
neuron N {
    variable v = 0.0
    variable v = 1.0
    parameter dt = 0.1
}
neuron N { }
";
        assert_eq!(codes_of(&resolve_src(src)), vec!["E0112", "E0111", "E0113"]);
    }

    #[test]
    fn synapse_names_neuron_declared_later() {
        let src = "\
synapse S : R -> R {
    variable w = 1.0
    transmit { w * pre.r }
}
neuron R {
    variable r = 0.0
}
";
        let r = resolve_src(src);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        assert_eq!(r.entities.len(), 2);
        assert_eq!(r.entities[0].name(), "S");
    }

    #[test]
    fn unknown_pre_type() {
        let src = "synapse S : A -> A { variable w = 0.0 }\n";
        let r = resolve_src(src);
        assert_eq!(codes_of(&r), vec!["E0114", "E0114"]);
    }

    #[test]
    fn spike_rules() {
        let two = "neuron N {\n    variable v = 0.0\n    spike { v > 1.0\n v < 0.0 }\n}\n";
        assert_eq!(codes_of(&resolve_src(two)), vec!["E0105"]);
        let none = "neuron N {\n    variable v = 0.0\n    spike { }\n}\n";
        assert_eq!(codes_of(&resolve_src(none)), vec!["E0106"]);
        let numeric = "neuron N {\n    variable v = 0.0\n    spike { v + 1.0 }\n}\n";
        assert_eq!(codes_of(&resolve_src(numeric)), vec!["E0107"]);
        let misplaced = "neuron N {\n    variable v = 0.0\n    update { v > 1.0 }\n}\n";
        assert_eq!(codes_of(&resolve_src(misplaced)), vec!["E0104"]);
    }

    #[test]
    fn methods_must_match_entity_kind() {
        let src = "neuron N {\n    variable v = 0.0\n    transmit { v }\n}\n";
        assert_eq!(codes_of(&resolve_src(src)), vec!["E0119"]);
    }

    #[test]
    fn builtins_and_arity() {
        let src = "\
neuron N {
    parameter sigma = 0.1
    variable v = 0.0
    update {
        v = clip(v + Normal(0.0, sigma), 0.0, 1.0) * cast(0.1)
    }
}
";
        let r = resolve_src(src);
        assert!(r.diagnostics.is_empty(), "{:?}", r.diagnostics);
        let EntityDef::Neuron(def) = &r.entities[0] else {
            panic!("expected a neuron");
        };
        let a = def.analyse(&def.extract().unwrap()).unwrap();
        assert_eq!(a.randoms.len(), 1);
        assert_eq!(a.randoms[0].name, "_rand_0");
        assert_eq!(
            a.update[0].steps[0].human_readable(),
            "v = fmin(fmax(v + _rand_0, 0.0), 1.0)*0.1"
        );

        let bad = "neuron N {\n    variable v = 0.0\n    update { v = exp(v, 1.0) + cast(v) }\n}\n";
        assert_eq!(codes_of(&resolve_src(bad)), vec!["E0117"]);
        let unknown = "neuron N {\n    variable v = 0.0\n    update { v = erf(v) }\n}\n";
        assert_eq!(codes_of(&resolve_src(unknown)), vec!["E0116"]);
    }

    #[test]
    fn free_expressions_keep_namespaces() {
        let e = parse_expr("w*pre.r + _rand_0").unwrap();
        let names: Vec<String> = e.free_symbols().into_iter().collect();
        assert_eq!(names, vec!["_rand_0", "pre.r", "w"]);
        let err = parse_expr("foo.r").unwrap_err();
        assert_eq!(err[0].code, Some(codes::E0115));
        let err = parse_expr("Uniform(0.0, 1.0)").unwrap_err();
        assert_eq!(err[0].code, Some(codes::E0116));
    }
}
