// entity.rs — Entity type definitions and equation analysis
//
// A neuron or synapse type is a list of attributes plus method bodies that
// record equations through a `MethodCapture`. Extraction validates the
// attributes and fixes the capability flags; analysis runs the methods
// (update, then spike and reset, or transmit), segments and lowers them.
//
// Preconditions: for synapses, the pre/post neuron types are extracted first.
// Postconditions: an `EntityAnalysis` holds only lowered, validated blocks.
// Failure modes: any definition or lowering error → `CompileError` naming the
//                entity type and method; analysis of that type stops there.
// Side effects: `tracing` events per analysed method.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::attribute::{validate_attributes, Attribute};
use crate::block::{segment, BlockKind};
use crate::capture::{CaptureSession, MethodCapture, RandomVariableSpec, Scope};
use crate::error::{CompileError, DefinitionError, EntityMethod};
use crate::expr::Expr;
use crate::method::Step;

/// Body of one entity method. May open any number of capture contexts.
pub type MethodBody = Box<dyn Fn(&mut MethodCapture<'_>) -> Result<(), DefinitionError>>;

// ── Definitions ─────────────────────────────────────────────────────────────

pub struct NeuronDef {
    pub name: String,
    pub attributes: Vec<Attribute>,
    update: Option<MethodBody>,
    spike: Option<MethodBody>,
    reset: Option<MethodBody>,
}

impl NeuronDef {
    pub fn new(name: impl Into<String>) -> Self {
        NeuronDef {
            name: name.into(),
            attributes: Vec::new(),
            update: None,
            spike: None,
            reset: None,
        }
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn update(
        mut self,
        body: impl Fn(&mut MethodCapture<'_>) -> Result<(), DefinitionError> + 'static,
    ) -> Self {
        self.update = Some(Box::new(body));
        self
    }

    pub fn spike(
        mut self,
        body: impl Fn(&mut MethodCapture<'_>) -> Result<(), DefinitionError> + 'static,
    ) -> Self {
        self.spike = Some(Box::new(body));
        self
    }

    pub fn reset(
        mut self,
        body: impl Fn(&mut MethodCapture<'_>) -> Result<(), DefinitionError> + 'static,
    ) -> Self {
        self.reset = Some(Box::new(body));
        self
    }

    /// Validate attributes and compute capability flags.
    pub fn extract(&self) -> Result<EntityDescriptor, CompileError> {
        validate_attributes(&self.attributes)
            .map_err(|e| CompileError::new(&self.name, None, e))?;
        Ok(EntityDescriptor {
            name: self.name.clone(),
            role: EntityRole::Neuron,
            attributes: self.attributes.clone(),
            has_spike: self.spike.is_some(),
        })
    }

    /// Analyse update, then spike and reset for spiking types.
    pub fn analyse(&self, descriptor: &EntityDescriptor) -> Result<EntityAnalysis, CompileError> {
        let scope = Scope::neuron(&descriptor.name, &descriptor.attributes);
        let mut randoms = Vec::new();
        let mut analysis = EntityAnalysis::new(descriptor.clone());

        let (sessions, r) = run_method(scope, EntityMethod::Update, self.update.as_ref(), randoms)?;
        randoms = r;
        analysis.update = lower_sessions(&descriptor.name, EntityMethod::Update, &sessions)?;

        if descriptor.has_spike {
            let (sessions, r) =
                run_method(scope, EntityMethod::Spike, self.spike.as_ref(), randoms)?;
            randoms = r;
            analysis.condition = single_expr(&sessions, true)
                .map_err(|e| CompileError::new(&descriptor.name, Some(EntityMethod::Spike), e))?;

            let (sessions, r) =
                run_method(scope, EntityMethod::Reset, self.reset.as_ref(), randoms)?;
            randoms = r;
            analysis.reset = lower_sessions(&descriptor.name, EntityMethod::Reset, &sessions)?;
        } else if self.reset.is_some() {
            warn!(entity = %descriptor.name, "reset method ignored: neuron type does not spike");
        }

        analysis.randoms = randoms;
        Ok(analysis)
    }
}

pub struct SynapseDef {
    pub name: String,
    pub pre: String,
    pub post: String,
    pub attributes: Vec<Attribute>,
    update: Option<MethodBody>,
    transmit: Option<MethodBody>,
}

impl SynapseDef {
    pub fn new(name: impl Into<String>, pre: impl Into<String>, post: impl Into<String>) -> Self {
        SynapseDef {
            name: name.into(),
            pre: pre.into(),
            post: post.into(),
            attributes: Vec::new(),
            update: None,
            transmit: None,
        }
    }

    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn update(
        mut self,
        body: impl Fn(&mut MethodCapture<'_>) -> Result<(), DefinitionError> + 'static,
    ) -> Self {
        self.update = Some(Box::new(body));
        self
    }

    pub fn transmit(
        mut self,
        body: impl Fn(&mut MethodCapture<'_>) -> Result<(), DefinitionError> + 'static,
    ) -> Self {
        self.transmit = Some(Box::new(body));
        self
    }

    pub fn extract(&self) -> Result<EntityDescriptor, CompileError> {
        validate_attributes(&self.attributes)
            .map_err(|e| CompileError::new(&self.name, None, e))?;
        Ok(EntityDescriptor {
            name: self.name.clone(),
            role: EntityRole::Synapse {
                pre: self.pre.clone(),
                post: self.post.clone(),
            },
            attributes: self.attributes.clone(),
            has_spike: false,
        })
    }

    /// Analyse update, then transmit. `pre` and `post` are the extracted
    /// neuron types this synapse connects.
    pub fn analyse(
        &self,
        descriptor: &EntityDescriptor,
        pre: &EntityDescriptor,
        post: &EntityDescriptor,
    ) -> Result<EntityAnalysis, CompileError> {
        let scope = Scope::synapse(
            &descriptor.name,
            &descriptor.attributes,
            (&pre.name, &pre.attributes),
            (&post.name, &post.attributes),
        );
        let mut analysis = EntityAnalysis::new(descriptor.clone());
        analysis.pre = Some(pre.clone());
        analysis.post = Some(post.clone());

        let (sessions, randoms) =
            run_method(scope, EntityMethod::Update, self.update.as_ref(), Vec::new())?;
        analysis.update = lower_sessions(&descriptor.name, EntityMethod::Update, &sessions)?;

        let (sessions, randoms) =
            run_method(scope, EntityMethod::Transmit, self.transmit.as_ref(), randoms)?;
        analysis.transmit = single_expr(&sessions, false)
            .map_err(|e| CompileError::new(&descriptor.name, Some(EntityMethod::Transmit), e))?;
        analysis.randoms = randoms;
        Ok(analysis)
    }
}

/// A model entity of either kind.
pub enum EntityDef {
    Neuron(NeuronDef),
    Synapse(SynapseDef),
}

impl EntityDef {
    pub fn name(&self) -> &str {
        match self {
            EntityDef::Neuron(n) => &n.name,
            EntityDef::Synapse(s) => &s.name,
        }
    }

    pub fn extract(&self) -> Result<EntityDescriptor, CompileError> {
        match self {
            EntityDef::Neuron(n) => n.extract(),
            EntityDef::Synapse(s) => s.extract(),
        }
    }
}

impl From<NeuronDef> for EntityDef {
    fn from(def: NeuronDef) -> Self {
        EntityDef::Neuron(def)
    }
}

impl From<SynapseDef> for EntityDef {
    fn from(def: SynapseDef) -> Self {
        EntityDef::Synapse(def)
    }
}

// ── Descriptors ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRole {
    Neuron,
    Synapse { pre: String, post: String },
}

/// Extracted, immutable view of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub role: EntityRole,
    pub attributes: Vec<Attribute>,
    /// Neuron type declares a spike condition.
    pub has_spike: bool,
}

impl EntityDescriptor {
    pub fn is_neuron(&self) -> bool {
        self.role == EntityRole::Neuron
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| !a.is_variable())
    }

    pub fn variables(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.is_variable())
    }
}

// ── Analysis ────────────────────────────────────────────────────────────────

/// A block after numerical lowering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoweredBlock {
    pub kind: BlockKind,
    pub dependencies: BTreeSet<String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityAnalysis {
    pub descriptor: EntityDescriptor,
    pub randoms: Vec<RandomVariableSpec>,
    pub update: Vec<LoweredBlock>,
    pub condition: Option<Expr>,
    pub reset: Vec<LoweredBlock>,
    pub transmit: Option<Expr>,
    /// Connected neuron types (synapses only).
    #[serde(skip)]
    pub pre: Option<EntityDescriptor>,
    #[serde(skip)]
    pub post: Option<EntityDescriptor>,
}

impl EntityAnalysis {
    fn new(descriptor: EntityDescriptor) -> Self {
        EntityAnalysis {
            descriptor,
            randoms: Vec::new(),
            update: Vec::new(),
            condition: None,
            reset: Vec::new(),
            transmit: None,
            pre: None,
            post: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// All steps of a method's blocks, in order.
    pub fn steps(&self, method: EntityMethod) -> impl Iterator<Item = &Step> {
        let blocks: &[LoweredBlock] = match method {
            EntityMethod::Update => &self.update,
            EntityMethod::Reset => &self.reset,
            EntityMethod::Spike | EntityMethod::Transmit => &[],
        };
        blocks.iter().flat_map(|b| b.steps.iter())
    }
}

fn run_method<'a>(
    scope: Scope<'a>,
    method: EntityMethod,
    body: Option<&MethodBody>,
    randoms: Vec<RandomVariableSpec>,
) -> Result<(Vec<CaptureSession>, Vec<RandomVariableSpec>), CompileError> {
    let mut capture = MethodCapture::new(scope, method, randoms);
    if let Some(body) = body {
        body(&mut capture).map_err(|e| CompileError::new(scope.entity, Some(method), e))?;
    }
    Ok(capture.finish())
}

fn lower_sessions(
    entity: &str,
    method: EntityMethod,
    sessions: &[CaptureSession],
) -> Result<Vec<LoweredBlock>, CompileError> {
    let blocks = segment(sessions);
    let mut lowered = Vec::with_capacity(blocks.len());
    for block in blocks {
        if let Some(variable) = block.repeated_variable() {
            let err = DefinitionError::DuplicateEquation {
                variable: variable.to_string(),
            };
            return Err(CompileError::new(entity, Some(method), err));
        }
        let steps = block
            .lower()
            .map_err(|e| CompileError::new(entity, Some(method), e))?;
        lowered.push(LoweredBlock {
            kind: block.kind,
            dependencies: block.dependencies,
            steps,
        });
    }
    debug!(
        entity,
        method = %method,
        blocks = lowered.len(),
        steps = lowered.iter().map(|b| b.steps.len()).sum::<usize>(),
        "lowered method"
    );
    Ok(lowered)
}

/// The single condition (spike) or transmitted value of a method.
fn single_expr(
    sessions: &[CaptureSession],
    condition: bool,
) -> Result<Option<Expr>, DefinitionError> {
    let mut statements = sessions.iter().flat_map(|s| s.statements.iter());
    let first = statements.next();
    let extra = statements.next().is_some();
    match (first, extra) {
        (None, _) if condition => Err(DefinitionError::MissingCondition),
        (None, _) => Ok(None),
        (Some(_), true) if condition => Err(DefinitionError::MultipleConditions),
        (Some(_), true) => Err(DefinitionError::MultipleTransmit),
        (Some(stmt), false) if condition && !stmt.expr.is_boolean() => {
            Err(DefinitionError::NonBooleanCondition {
                condition: stmt.expr.to_string(),
            })
        }
        (Some(stmt), false) => Ok(Some(stmt.expr.clone())),
    }
}

// ── Report ──────────────────────────────────────────────────────────────────

fn write_blocks(f: &mut fmt::Formatter<'_>, method: &str, blocks: &[LoweredBlock]) -> fmt::Result {
    writeln!(f, "  {method}:")?;
    for block in blocks {
        let kind = match block.kind {
            BlockKind::Assignment => "assignment".to_string(),
            BlockKind::Ode(m) => format!("ode, {m}"),
        };
        let deps: Vec<&str> = block.dependencies.iter().map(String::as_str).collect();
        writeln!(f, "    [{kind}] reads: {}", deps.join(", "))?;
        for step in &block.steps {
            writeln!(f, "      {step}")?;
        }
    }
    Ok(())
}

impl fmt::Display for EntityAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.descriptor;
        match &d.role {
            EntityRole::Neuron => writeln!(f, "Neuron {}", d.name)?,
            EntityRole::Synapse { pre, post } => writeln!(f, "Synapse {} ({pre} -> {post})", d.name)?,
        }
        let list = |attrs: Vec<&Attribute>| {
            attrs
                .iter()
                .map(|a| a.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(f, "  parameters: {}", list(d.parameters().collect()))?;
        writeln!(f, "  variables: {}", list(d.variables().collect()))?;
        for r in &self.randoms {
            let params = r.distribution.params();
            let kind = match r.distribution {
                crate::capture::Distribution::Uniform { .. } => "Uniform",
                crate::capture::Distribution::Normal { .. } => "Normal",
            };
            writeln!(f, "  random: {} ~ {kind}({}, {})", r.name, params[0], params[1])?;
        }
        write_blocks(f, "update", &self.update)?;
        if let Some(c) = &self.condition {
            writeln!(f, "  spike:")?;
            writeln!(f, "      {c}")?;
            write_blocks(f, "reset", &self.reset)?;
        }
        if let Some(t) = &self.transmit {
            writeln!(f, "  transmit:")?;
            writeln!(f, "      {t}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CompileErrorKind, LoweringError};
    use crate::expr::{self, num, CmpOp};
    use crate::method::NumericalMethod;

    fn lif() -> NeuronDef {
        NeuronDef::new("LIF")
            .attribute(Attribute::parameter("tau", 20.0))
            .attribute(Attribute::parameter("V_th", 1.0))
            .attribute(Attribute::variable("I", 0.0).input())
            .attribute(Attribute::variable("v", 0.0))
            .update(|m| {
                m.equations(NumericalMethod::Euler, |n| {
                    let (i, v, tau) = (n.sym("I")?, n.sym("v")?, n.sym("tau")?);
                    n.ode("v", (i - v) / tau)
                })
            })
            .spike(|m| {
                m.equations(NumericalMethod::Euler, |n| {
                    let cond = expr::cmp(CmpOp::Ge, n.sym("v")?, n.sym("V_th")?);
                    n.condition(cond)
                })
            })
            .reset(|m| m.equations(NumericalMethod::Euler, |n| n.record("v", num(0.0))))
    }

    #[test]
    fn extraction_sets_spike_flag() {
        let d = lif().extract().unwrap();
        assert!(d.has_spike);
        assert!(d.is_neuron());
        let silent = NeuronDef::new("Rate").attribute(Attribute::variable("r", 0.0));
        assert!(!silent.extract().unwrap().has_spike);
    }

    #[test]
    fn extraction_rejects_reserved_names() {
        let def = NeuronDef::new("Bad").attribute(Attribute::variable("dt", 0.0));
        let err = def.extract().unwrap_err();
        assert_eq!(err.method, None);
        assert!(matches!(
            err.kind,
            CompileErrorKind::Definition(DefinitionError::ReservedName { .. })
        ));
    }

    #[test]
    fn neuron_analysis() {
        let def = lif();
        let d = def.extract().unwrap();
        let a = def.analyse(&d).unwrap();
        assert_eq!(a.update.len(), 1);
        assert_eq!(a.update[0].kind, BlockKind::Ode(NumericalMethod::Euler));
        assert_eq!(a.update[0].steps[0].human_readable(), "v += dt*(I - v)/tau");
        assert_eq!(a.condition.as_ref().map(|c| c.to_string()).as_deref(), Some("v >= V_th"));
        assert_eq!(a.reset[0].steps[0].human_readable(), "v = 0.0");
    }

    #[test]
    fn missing_condition_names_spike_method() {
        let def = NeuronDef::new("N")
            .attribute(Attribute::variable("v", 0.0))
            .spike(|_| Ok(()));
        let d = def.extract().unwrap();
        let err = def.analyse(&d).unwrap_err();
        assert_eq!(err.method, Some(EntityMethod::Spike));
        assert_eq!(err.kind, CompileErrorKind::Definition(DefinitionError::MissingCondition));
    }

    #[test]
    fn two_conditions_are_rejected() {
        let def = NeuronDef::new("N")
            .attribute(Attribute::variable("v", 0.0))
            .spike(|m| {
                m.equations(NumericalMethod::Euler, |n| {
                    n.condition(expr::cmp(CmpOp::Gt, n.sym("v")?, num(1.0)))?;
                    n.condition(expr::cmp(CmpOp::Lt, n.sym("v")?, num(-1.0)))
                })
            });
        let d = def.extract().unwrap();
        let err = def.analyse(&d).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Definition(DefinitionError::MultipleConditions));
    }

    #[test]
    fn non_boolean_condition() {
        let def = NeuronDef::new("N")
            .attribute(Attribute::variable("v", 0.0))
            .spike(|m| m.equations(NumericalMethod::Euler, |n| n.condition(n.sym("v")?)));
        let d = def.extract().unwrap();
        let err = def.analyse(&d).unwrap_err();
        assert!(matches!(
            err.kind,
            CompileErrorKind::Definition(DefinitionError::NonBooleanCondition { .. })
        ));
    }

    #[test]
    fn exponential_failure_names_update() {
        let def = NeuronDef::new("Quad")
            .attribute(Attribute::variable("v", 0.0))
            .update(|m| {
                m.equations(NumericalMethod::Exponential, |n| {
                    let v = n.sym("v")?;
                    n.ode("v", v.clone() * v)
                })
            });
        let d = def.extract().unwrap();
        let err = def.analyse(&d).unwrap_err();
        assert_eq!(err.entity, "Quad");
        assert_eq!(err.method, Some(EntityMethod::Update));
        assert!(matches!(
            err.kind,
            CompileErrorKind::Lowering(LoweringError::NotAffine { .. })
        ));
    }

    #[test]
    fn variable_integrated_twice_in_one_block() {
        let def = NeuronDef::new("Twice")
            .attribute(Attribute::variable("v", 0.0))
            .attribute(Attribute::variable("u", 0.0))
            .update(|m| {
                m.equations(NumericalMethod::Euler, |n| {
                    let (v, u) = (n.sym("v")?, n.sym("u")?);
                    n.ode("v", -v)?;
                    n.ode("u", -u)?;
                    n.ode("v", num(1.0))
                })
            });
        let d = def.extract().unwrap();
        let err = def.analyse(&d).unwrap_err();
        assert_eq!(err.entity, "Twice");
        assert_eq!(err.method, Some(EntityMethod::Update));
        assert_eq!(
            err.kind,
            CompileErrorKind::Definition(DefinitionError::DuplicateEquation {
                variable: "v".into()
            })
        );
    }

    #[test]
    fn random_names_continue_across_methods() {
        let def = NeuronDef::new("Noisy")
            .attribute(Attribute::variable("v", 0.0))
            .update(|m| {
                m.equations(NumericalMethod::Euler, |n| {
                    let r = n.uniform(num(0.0), num(1.0))?;
                    n.record("v", r)
                })
            })
            .spike(|m| {
                m.equations(NumericalMethod::Euler, |n| {
                    n.condition(expr::cmp(CmpOp::Gt, n.sym("v")?, num(0.5)))
                })
            })
            .reset(|m| {
                m.equations(NumericalMethod::Euler, |n| {
                    let r = n.normal(num(0.0), num(0.1))?;
                    n.record("v", r)
                })
            });
        let d = def.extract().unwrap();
        let a = def.analyse(&d).unwrap();
        let names: Vec<&str> = a.randoms.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["_rand_0", "_rand_1"]);
    }

    #[test]
    fn synapse_analysis() {
        let neuron = NeuronDef::new("Rate").attribute(Attribute::variable("r", 0.0));
        let nd = neuron.extract().unwrap();
        let syn = SynapseDef::new("Hebb", "Rate", "Rate")
            .attribute(Attribute::parameter("eta", 0.01))
            .attribute(Attribute::variable("w", 0.0))
            .update(|m| {
                m.equations(NumericalMethod::Euler, |n| {
                    let dw = n.sym("eta")? * n.pre("r")? * n.post("r")?;
                    n.ode("w", dw)
                })
            })
            .transmit(|m| {
                m.equations(NumericalMethod::Euler, |n| {
                    let e = n.sym("w")? * n.pre("r")?;
                    n.transmit(e)
                })
            });
        let sd = syn.extract().unwrap();
        let a = syn.analyse(&sd, &nd, &nd).unwrap();
        assert_eq!(
            a.update[0].dependencies.iter().cloned().collect::<Vec<_>>(),
            vec!["eta", "post.r", "pre.r"]
        );
        assert_eq!(a.transmit.as_ref().map(|t| t.to_string()).as_deref(), Some("w*pre.r"));
        assert!(a.pre.is_some() && a.post.is_some());
    }

    #[test]
    fn report_lists_attributes_and_steps() {
        let def = lif();
        let d = def.extract().unwrap();
        let report = def.analyse(&d).unwrap().to_string();
        assert!(report.starts_with("Neuron LIF\n"));
        assert!(report.contains("  parameters: tau = 20.0 (shared), V_th = 1.0 (shared)\n"));
        assert!(report.contains("    [ode, euler] reads: I, tau, v\n"));
        assert!(report.contains("      v += dt*(I - v)/tau\n"));
        assert!(report.contains("  spike:\n      v >= V_th\n"));
    }
}
