// attribute.rs — Attribute model of entity types
//
// Declares the named quantities of a neuron or synapse type: parameters
// (fixed during simulation) and variables (evolving), each either shared by
// the whole population/projection or stored per element.
//
// Preconditions: none.
// Postconditions: `validate_attributes` accepts only unique, unreserved names.
// Failure modes: reserved or duplicate names produce `DefinitionError`.
// Side effects: none.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::DefinitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Parameter,
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Locality {
    /// One value per population/projection.
    Shared,
    /// One value per neuron/synapse.
    PerElement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericType {
    #[default]
    Double,
    Float,
    Int,
    Bool,
}

impl NumericType {
    /// C++ spelling; `real` substitutes for `double` so generated classes can
    /// be compiled in single precision.
    pub fn cpp(self, real: &str) -> String {
        match self {
            NumericType::Double => real.to_string(),
            NumericType::Float => "float".to_string(),
            NumericType::Int => "int".to_string(),
            NumericType::Bool => "bool".to_string(),
        }
    }
}

impl FromStr for NumericType {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "double" => Ok(NumericType::Double),
            "float" => Ok(NumericType::Float),
            "int" => Ok(NumericType::Int),
            "bool" => Ok(NumericType::Bool),
            _ => Err(DefinitionError::UnknownNumericType { name: s.to_string() }),
        }
    }
}

/// A declared parameter or variable. Immutable once the entity type is built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    pub name: String,
    pub kind: AttributeKind,
    pub locality: Locality,
    pub numeric_type: NumericType,
    pub init: f64,
    pub is_input: bool,
    pub is_output: bool,
}

impl Attribute {
    /// A parameter, shared by default.
    pub fn parameter(name: impl Into<String>, init: f64) -> Self {
        Attribute {
            name: name.into(),
            kind: AttributeKind::Parameter,
            locality: Locality::Shared,
            numeric_type: NumericType::Double,
            init,
            is_input: false,
            is_output: false,
        }
    }

    /// A variable, stored per element by default.
    pub fn variable(name: impl Into<String>, init: f64) -> Self {
        Attribute {
            kind: AttributeKind::Variable,
            locality: Locality::PerElement,
            ..Attribute::parameter(name, init)
        }
    }

    pub fn shared(mut self) -> Self {
        self.locality = Locality::Shared;
        self
    }

    pub fn per_element(mut self) -> Self {
        self.locality = Locality::PerElement;
        self
    }

    /// Mark as an input, zeroed at the start of every step.
    pub fn input(mut self) -> Self {
        self.is_input = true;
        self
    }

    pub fn output(mut self) -> Self {
        self.is_output = true;
        self
    }

    pub fn numeric(mut self, numeric_type: NumericType) -> Self {
        self.numeric_type = numeric_type;
        self
    }

    pub fn is_variable(&self) -> bool {
        self.kind == AttributeKind::Variable
    }

    pub fn is_shared(&self) -> bool {
        self.locality == Locality::Shared
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let locality = match self.locality {
            Locality::Shared => "shared",
            Locality::PerElement => "per-element",
        };
        write!(f, "{} = {:?} ({locality}", self.name, self.init)?;
        if self.is_input {
            write!(f, ", input")?;
        }
        if self.is_output {
            write!(f, ", output")?;
        }
        write!(f, ")")
    }
}

// Built-in symbols, loop indices and members of the generated classes.
const RESERVED: &[&str] = &[
    "t", "dt", "spike", "spiked", "target", "pre", "post", "i", "j", "idx", "size", "net",
    "this", "rng", "update", "reset", "reset_inputs", "collect_inputs",
];

// Names that would not compile as a member of the generated C++ class.
const CPP_KEYWORDS: &[&str] = &[
    "alignas", "alignof", "and", "and_eq", "asm", "auto", "bitand", "bitor", "bool", "break",
    "case", "catch", "char", "char16_t", "char32_t", "char8_t", "class", "co_await",
    "co_return", "co_yield", "compl", "concept", "const", "const_cast", "consteval",
    "constexpr", "constinit", "continue", "decltype", "default", "delete", "do", "double",
    "dynamic_cast", "else", "enum", "explicit", "export", "extern", "false", "float", "for",
    "friend", "goto", "if", "inline", "int", "long", "mutable", "namespace", "new",
    "noexcept", "not", "not_eq", "nullptr", "operator", "or", "or_eq", "private",
    "protected", "public", "register", "reinterpret_cast", "requires", "return", "short",
    "signed", "sizeof", "static", "static_assert", "static_cast", "struct", "switch",
    "template", "thread_local", "throw", "true", "try", "typedef", "typeid", "typename",
    "union", "unsigned", "using", "virtual", "void", "volatile", "wchar_t", "while", "xor",
    "xor_eq",
];

/// True when `name` has the shape of a derivative target (`d<x>_dt`).
pub fn is_derivative_name(name: &str) -> bool {
    name.len() > 4 && name.starts_with('d') && name.ends_with("_dt")
}

/// Variable named by a derivative target: `dv_dt` → `v`.
pub fn derivative_of(name: &str) -> Option<&str> {
    if is_derivative_name(name) {
        Some(&name[1..name.len() - 3])
    } else {
        None
    }
}

pub fn validate_name(name: &str) -> Result<(), DefinitionError> {
    let valid_ident = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_ident
        || RESERVED.contains(&name)
        || CPP_KEYWORDS.contains(&name)
        || is_derivative_name(name)
    {
        return Err(DefinitionError::ReservedName {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Check names of one entity's attribute list.
pub fn validate_attributes(attributes: &[Attribute]) -> Result<(), DefinitionError> {
    let mut seen = HashSet::new();
    for attr in attributes {
        validate_name(&attr.name)?;
        if !seen.insert(attr.name.as_str()) {
            return Err(DefinitionError::DuplicateAttribute {
                name: attr.name.clone(),
            });
        }
    }
    Ok(())
}
