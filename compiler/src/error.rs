// error.rs — Error taxonomy of the equation compiler
//
// Three families, detected as close to their source as possible:
// definition errors (model author mistakes, raised at capture or analysis
// time), lowering errors (an integration scheme that cannot be applied), and
// generation errors (an expression that cannot be rendered). `CompileError`
// attaches the entity type and method every failure is attributed to.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Method of an entity type in which equations are captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityMethod {
    Update,
    Spike,
    Reset,
    Transmit,
}

impl EntityMethod {
    pub fn name(self) -> &'static str {
        match self {
            EntityMethod::Update => "update",
            EntityMethod::Spike => "spike",
            EntityMethod::Reset => "reset",
            EntityMethod::Transmit => "transmit",
        }
    }
}

impl fmt::Display for EntityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("`{name}` is not an attribute of `{entity}`")]
    UndeclaredSymbol { entity: String, name: String },
    #[error("cannot assign to `{target}`: not an attribute, nor `d<variable>_dt`")]
    InvalidTarget { target: String },
    #[error("`{name}` is a parameter; only variables can be integrated")]
    NotAVariable { name: String },
    #[error("`{target}` cannot be recorded in the {method} method")]
    MisplacedStatement { target: String, method: EntityMethod },
    #[error("more than one spike condition declared")]
    MultipleConditions,
    #[error("spike method declares no condition")]
    MissingCondition,
    #[error("spike condition `{condition}` is not a boolean expression")]
    NonBooleanCondition { condition: String },
    #[error("transmit method declares more than one transmitted value")]
    MultipleTransmit,
    #[error("unknown numerical method `{name}` (expected euler, exponential, midpoint or rk4)")]
    UnknownMethod { name: String },
    #[error("unknown numeric type `{name}` (expected double, float, int or bool)")]
    UnknownNumericType { name: String },
    #[error("`{name}` is reserved and cannot name an attribute")]
    ReservedName { name: String },
    #[error("attribute `{name}` is declared more than once")]
    DuplicateAttribute { name: String },
    #[error("entity type `{name}` is declared more than once")]
    DuplicateEntity { name: String },
    #[error("unknown neuron type `{name}`")]
    UnknownNeuronType { name: String },
    #[error("unknown namespace `{namespace}` (expected pre or post)")]
    UnknownNamespace { namespace: String },
    #[error("unknown function `{name}`")]
    UnknownFunction { name: String },
    #[error("`{name}` takes {expected} argument(s), found {found}")]
    Arity {
        name: String,
        expected: &'static str,
        found: usize,
    },
    #[error("`cast` expects a numeric literal")]
    CastOfNonLiteral,
    #[error("{role} types have no {method} method")]
    UnsupportedMethod {
        role: &'static str,
        method: EntityMethod,
    },
    #[error("`d{variable}/dt` is given twice in one block of simultaneous equations")]
    DuplicateEquation { variable: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoweringError {
    #[error(
        "equation `d{variable}/dt = {equation}` is not compatible with exponential integration: it is not affine in `{variable}`"
    )]
    NotAffine { variable: String, equation: String },
    #[error(
        "equation `d{variable}/dt = {equation}` is not compatible with exponential integration: no decay term in `{variable}`"
    )]
    NoDecay { variable: String, equation: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("symbol `{symbol}` has no target-code correspondence")]
    UnresolvedSymbol { symbol: String },
    #[error("synapse pre/post type `{name}` was not analysed")]
    MissingNeuron { name: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileErrorKind {
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),
    #[error("lowering error: {0}")]
    Lowering(#[from] LoweringError),
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
}

/// A fatal error for one entity type, naming the method it arose in.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("in `{entity}`{}: {kind}", method_suffix(.method))]
pub struct CompileError {
    pub entity: String,
    /// `None` for errors in the attribute list itself.
    pub method: Option<EntityMethod>,
    pub kind: CompileErrorKind,
}

fn method_suffix(method: &Option<EntityMethod>) -> String {
    match method {
        Some(m) => format!(" ({m})"),
        None => String::new(),
    }
}

impl CompileError {
    pub fn new(
        entity: impl Into<String>,
        method: Option<EntityMethod>,
        kind: impl Into<CompileErrorKind>,
    ) -> Self {
        CompileError {
            entity: entity.into(),
            method,
            kind: kind.into(),
        }
    }
}
