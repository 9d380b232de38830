// diag.rs — Unified diagnostics model
//
// User-facing reports for every failure the compiler can produce: syntax
// errors from the front-end and the typed errors of `error.rs`, each with a
// stable code, an optional source span and an optional hint.
//
// Preconditions: none (types only).
// Postconditions: every `CompileErrorKind` variant maps to exactly one code.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use chumsky::error::Rich;

use crate::ast::Span;
use crate::error::{CompileError, CompileErrorKind, DefinitionError, GenerationError, LoweringError};
use crate::lexer::Token;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`, `E0201`).
///
/// Once assigned, a code is never reused for a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // E00xx: syntax
    pub const E0001: DiagCode = DiagCode("E0001"); // lex or parse error
    pub const E0002: DiagCode = DiagCode("E0002"); // parser produced no output

    // E01xx: model definition
    pub const E0101: DiagCode = DiagCode("E0101"); // undeclared symbol
    pub const E0102: DiagCode = DiagCode("E0102"); // invalid assignment target
    pub const E0103: DiagCode = DiagCode("E0103"); // derivative of a parameter
    pub const E0104: DiagCode = DiagCode("E0104"); // statement in the wrong method
    pub const E0105: DiagCode = DiagCode("E0105"); // several spike conditions
    pub const E0106: DiagCode = DiagCode("E0106"); // spike method without condition
    pub const E0107: DiagCode = DiagCode("E0107"); // non-boolean condition
    pub const E0108: DiagCode = DiagCode("E0108"); // several transmitted values
    pub const E0109: DiagCode = DiagCode("E0109"); // unknown numerical method
    pub const E0110: DiagCode = DiagCode("E0110"); // unknown numeric type
    pub const E0111: DiagCode = DiagCode("E0111"); // reserved attribute name
    pub const E0112: DiagCode = DiagCode("E0112"); // duplicate attribute
    pub const E0113: DiagCode = DiagCode("E0113"); // duplicate entity type
    pub const E0114: DiagCode = DiagCode("E0114"); // unknown pre/post neuron type
    pub const E0115: DiagCode = DiagCode("E0115"); // unknown namespace
    pub const E0116: DiagCode = DiagCode("E0116"); // unknown function
    pub const E0117: DiagCode = DiagCode("E0117"); // wrong argument count
    pub const E0118: DiagCode = DiagCode("E0118"); // cast of a non-literal
    pub const E0119: DiagCode = DiagCode("E0119"); // method not available for the entity kind
    pub const E0120: DiagCode = DiagCode("E0120"); // variable integrated twice in one block

    // E02xx: lowering
    pub const E0201: DiagCode = DiagCode("E0201"); // exponential: not affine
    pub const E0202: DiagCode = DiagCode("E0202"); // exponential: no decay term

    // E03xx: generation
    pub const E0301: DiagCode = DiagCode("E0301"); // unresolved symbol
    pub const E0302: DiagCode = DiagCode("E0302"); // pre/post type not analysed
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Source location, when the model came from a file.
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, span or hint.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span: None,
            message: message.into(),
            hint: None,
        }
    }

    /// Error without location.
    pub fn from_message(message: impl Into<String>) -> Self {
        Diagnostic::new(DiagLevel::Error, message).with_code(codes::E0002)
    }

    pub fn from_parse_error(err: &Rich<'_, Token, Span>) -> Self {
        Diagnostic::new(DiagLevel::Error, err.to_string())
            .with_code(codes::E0001)
            .with_span(*err.span())
    }

    /// Definition error raised while resolving a model file.
    pub fn from_definition(err: &DefinitionError, span: Span) -> Self {
        Diagnostic::new(DiagLevel::Error, err.to_string())
            .with_code(definition_code(err))
            .with_span(span)
            .with_optional_hint(definition_hint(err))
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    fn with_optional_hint(self, hint: Option<&str>) -> Self {
        match hint {
            Some(h) => self.with_hint(h),
            None => self,
        }
    }

    /// 1-based line and column of the span start in `source`.
    pub fn line_col(&self, source: &str) -> Option<(usize, usize)> {
        let start = self.span?.start;
        let before = source.get(..start)?;
        let line = before.matches('\n').count() + 1;
        let col = before.len() - before.rfind('\n').map_or(0, |p| p + 1) + 1;
        Some((line, col))
    }
}

fn definition_code(err: &DefinitionError) -> DiagCode {
    match err {
        DefinitionError::UndeclaredSymbol { .. } => codes::E0101,
        DefinitionError::InvalidTarget { .. } => codes::E0102,
        DefinitionError::NotAVariable { .. } => codes::E0103,
        DefinitionError::MisplacedStatement { .. } => codes::E0104,
        DefinitionError::MultipleConditions => codes::E0105,
        DefinitionError::MissingCondition => codes::E0106,
        DefinitionError::NonBooleanCondition { .. } => codes::E0107,
        DefinitionError::MultipleTransmit => codes::E0108,
        DefinitionError::UnknownMethod { .. } => codes::E0109,
        DefinitionError::UnknownNumericType { .. } => codes::E0110,
        DefinitionError::ReservedName { .. } => codes::E0111,
        DefinitionError::DuplicateAttribute { .. } => codes::E0112,
        DefinitionError::DuplicateEntity { .. } => codes::E0113,
        DefinitionError::UnknownNeuronType { .. } => codes::E0114,
        DefinitionError::UnknownNamespace { .. } => codes::E0115,
        DefinitionError::UnknownFunction { .. } => codes::E0116,
        DefinitionError::Arity { .. } => codes::E0117,
        DefinitionError::CastOfNonLiteral => codes::E0118,
        DefinitionError::UnsupportedMethod { .. } => codes::E0119,
        DefinitionError::DuplicateEquation { .. } => codes::E0120,
    }
}

fn definition_hint(err: &DefinitionError) -> Option<&'static str> {
    match err {
        DefinitionError::UndeclaredSymbol { .. } => {
            Some("declare it with `parameter` or `variable`")
        }
        DefinitionError::NotAVariable { .. } => Some("declare it with `variable` instead"),
        DefinitionError::DuplicateEquation { .. } => {
            Some("merge the right-hand sides, or separate the equations with an assignment")
        }
        DefinitionError::MultipleConditions => {
            Some("combine the conditions with `&&` or `||`")
        }
        DefinitionError::NonBooleanCondition { .. } => {
            Some("compare against a threshold, e.g. `v >= V_th`")
        }
        DefinitionError::ReservedName { .. } => {
            Some("names must start with a letter and avoid t, dt, spike, target, pre, post and C++ keywords")
        }
        _ => None,
    }
}

fn kind_code(kind: &CompileErrorKind) -> DiagCode {
    match kind {
        CompileErrorKind::Definition(e) => definition_code(e),
        CompileErrorKind::Lowering(LoweringError::NotAffine { .. }) => codes::E0201,
        CompileErrorKind::Lowering(LoweringError::NoDecay { .. }) => codes::E0202,
        CompileErrorKind::Generation(GenerationError::UnresolvedSymbol { .. }) => codes::E0301,
        CompileErrorKind::Generation(GenerationError::MissingNeuron { .. }) => codes::E0302,
    }
}

fn kind_hint(kind: &CompileErrorKind) -> Option<&'static str> {
    match kind {
        CompileErrorKind::Definition(e) => definition_hint(e),
        CompileErrorKind::Lowering(_) => {
            Some("write the equation as (A - X)/tau, or select euler, midpoint or rk4")
        }
        CompileErrorKind::Generation(_) => None,
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(err: &CompileError) -> Self {
        Diagnostic::new(DiagLevel::Error, err.to_string())
            .with_code(kind_code(&err.kind))
            .with_optional_hint(kind_hint(&err.kind))
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EntityMethod;

    fn dummy_span() -> Span {
        (3..5).into()
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::new(DiagLevel::Warning, "unused parameter")
            .with_code(DiagCode("W0001"));
        assert_eq!(format!("{d}"), "warning[W0001]: unused parameter");
    }

    #[test]
    fn definition_errors_carry_code_span_and_hint() {
        let d = Diagnostic::from_definition(
            &DefinitionError::UndeclaredSymbol {
                entity: "LIF".into(),
                name: "u".into(),
            },
            dummy_span(),
        );
        assert_eq!(d.code, Some(codes::E0101));
        assert_eq!(d.span, Some(dummy_span()));
        assert_eq!(
            d.to_string(),
            "error[E0101]: `u` is not an attribute of `LIF`\n  hint: declare it with `parameter` or `variable`"
        );
    }

    #[test]
    fn lowering_errors_map_to_e02xx() {
        let err = CompileError::new(
            "LIF",
            Some(EntityMethod::Update),
            LoweringError::NotAffine {
                variable: "v".into(),
                equation: "v*v".into(),
            },
        );
        let d = Diagnostic::from(&err);
        assert_eq!(d.code, Some(codes::E0201));
        assert!(d.hint.is_some());
        assert!(d.message.starts_with("in `LIF` (update): lowering error"));
    }

    #[test]
    fn line_col_is_one_based() {
        let src = "neuron A {\n  bad\n}";
        let d = Diagnostic::new(DiagLevel::Error, "x").with_span((13..16).into());
        assert_eq!(d.line_col(src), Some((2, 3)));
        assert_eq!(Diagnostic::new(DiagLevel::Error, "x").line_col(src), None);
    }
}
