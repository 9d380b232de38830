// Lexer for .nml neuron model files and standalone equations.
//
// Tokenizes model sources (entity declarations, attribute lists, method
// bodies) and the human-readable expression form printed by the compiler.
// Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Model language tokens.
///
/// Identifiers carry no value; use the span to retrieve the text from the
/// source. Method names (`euler`, `rk4`, ...) and numeric type names are
/// plain identifiers and are validated after parsing.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r]+|#[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("neuron")]
    Neuron,
    #[token("synapse")]
    Synapse,
    #[token("parameter")]
    Parameter,
    #[token("variable")]
    Variable,
    #[token("shared")]
    Shared,
    #[token("per_element")]
    PerElement,
    #[token("input")]
    Input,
    #[token("output")]
    Output,
    #[token("update")]
    Update,
    #[token("spike")]
    Spike,
    #[token("reset")]
    Reset,
    #[token("transmit")]
    Transmit,
    #[token("let")]
    Let,

    // ── Symbols ──
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("->")]
    Arrow,
    #[token("**")]
    StarStar,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("!")]
    Bang,
    #[token("=")]
    Equals,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // ── Literals ──
    /// Unsigned numeric literal (int, float, exponent). Signs are operators.
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    // ── Identifier ──
    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ── Structure ──
    /// One or more newlines (statement terminator).
    #[regex(r"\n+")]
    Newline,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Neuron => "neuron",
            Token::Synapse => "synapse",
            Token::Parameter => "parameter",
            Token::Variable => "variable",
            Token::Shared => "shared",
            Token::PerElement => "per_element",
            Token::Input => "input",
            Token::Output => "output",
            Token::Update => "update",
            Token::Spike => "spike",
            Token::Reset => "reset",
            Token::Transmit => "transmit",
            Token::Let => "let",
            Token::PlusEq => "+=",
            Token::MinusEq => "-=",
            Token::Arrow => "->",
            Token::StarStar => "**",
            Token::Le => "<=",
            Token::Ge => ">=",
            Token::EqEq => "==",
            Token::Ne => "!=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Bang => "!",
            Token::Equals => "=",
            Token::Colon => ":",
            Token::Dot => ".",
            Token::Comma => ",",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Number(v) => return write!(f, "{v}"),
            Token::Ident => "<ident>",
            Token::Newline => "<newline>",
        };
        f.write_str(s)
    }
}

// ── Callbacks ──

fn parse_number(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex a model source string into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
