// AST node types for .nml model files.
//
// Every node carries a `SimpleSpan` for error reporting in downstream phases.
// Expressions stay syntactic here; symbol binding happens in `resolve`.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete model file: a sequence of entity declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFile {
    pub entities: Vec<EntityDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityDecl {
    Neuron(NeuronDecl),
    Synapse(SynapseDecl),
}

impl EntityDecl {
    pub fn name(&self) -> &Ident {
        match self {
            EntityDecl::Neuron(n) => &n.name,
            EntityDecl::Synapse(s) => &s.name,
        }
    }
}

// ── neuron IDENT '{' member* '}' ──

#[derive(Debug, Clone, PartialEq)]
pub struct NeuronDecl {
    pub name: Ident,
    pub attributes: Vec<AttributeDecl>,
    pub methods: Vec<MethodDecl>,
    pub span: Span,
}

// ── synapse IDENT ':' IDENT '->' IDENT '{' member* '}' ──

#[derive(Debug, Clone, PartialEq)]
pub struct SynapseDecl {
    pub name: Ident,
    pub pre: Ident,
    pub post: Ident,
    pub attributes: Vec<AttributeDecl>,
    pub methods: Vec<MethodDecl>,
    pub span: Span,
}

/// Entity body member, before being split into attributes and methods.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Attribute(AttributeDecl),
    Method(MethodDecl),
}

// ── ('parameter' | 'variable') IDENT (':' type)? ('=' init)? modifier* ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKeyword {
    Parameter,
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Shared,
    PerElement,
    Input,
    Output,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDecl {
    pub keyword: AttrKeyword,
    pub name: Ident,
    pub numeric_type: Option<Ident>,
    pub init: Option<(f64, Span)>,
    pub modifiers: Vec<(Modifier, Span)>,
    pub span: Span,
}

// ── method_kind IDENT? '{' stmt* '}' ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Update,
    Spike,
    Reset,
    Transmit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub kind: MethodKind,
    /// Numerical method tag (`update midpoint { ... }`), validated during resolve.
    pub numerical: Option<Ident>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

// ── Statements ──

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    AddAssign,
    SubAssign,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `let name = expr`: local helper, substituted before capture.
    Let(Ident, ExprNode),
    Assign {
        target: Target,
        op: AssignOp,
        value: ExprNode,
    },
    /// Bare expression: a spike condition or a transmitted value.
    Expr(ExprNode),
}

/// Assignment target. `dv/dt` is stored as `v` with `derivative = true`.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: Ident,
    pub derivative: bool,
}

impl Target {
    /// Name recorded by the capture context (`v` or `dv_dt`).
    pub fn recorded_name(&self) -> String {
        if self.derivative {
            format!("d{}_dt", self.name.name)
        } else {
            self.name.name.clone()
        }
    }
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Numeric literal with its source spelling.
    Number { value: f64, text: String },
    Name(Ident),
    /// `pre.r`, `post.v`
    Namespaced(Ident, Ident),
    Unary(UnOp, Box<ExprNode>),
    Binary(BinOp, Box<ExprNode>, Box<ExprNode>),
    Call(Ident, Vec<ExprNode>),
}

// ── Leaf types ──

/// An identifier with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}
