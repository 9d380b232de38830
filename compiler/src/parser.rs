// Parser for .nml model files and standalone expressions.
//
// Parses a token stream (from the lexer) into the AST of `ast.rs`. Uses
// chumsky combinators. The expression grammar is shared by model bodies and
// by `parse_expr`, which reads back the human-readable equations the compiler
// prints.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::diag::Diagnostic;
use crate::expr::Expr;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub model: Option<ModelFile>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

type Tokens = Vec<(Token, SimpleSpan)>;

/// Lex `source` into chumsky-ready tokens, converting lex errors to `Rich`.
fn lex_tokens(source: &str) -> (Tokens, Vec<Rich<'static, Token, SimpleSpan>>) {
    let lex_result = crate::lexer::lex(source);
    let tokens = lex_result
        .tokens
        .into_iter()
        .map(|(tok, span)| (tok, (span.start..span.end).into()))
        .collect();
    let errors = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    (tokens, errors)
}

/// Parse a model source string. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let (tokens, mut errors) = lex_tokens(source);
    let len = source.len();
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let (model, parse_errors) = model_parser(source).parse(stream).into_output_errors();
    errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult { model, errors }
}

/// Parse a single expression into its syntax tree.
pub fn parse_expr_node(
    source: &str,
) -> (Option<ExprNode>, Vec<Rich<'static, Token, SimpleSpan>>) {
    let (tokens, mut errors) = lex_tokens(source);
    let len = source.len();
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(tokens).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = just(Token::Newline)
        .repeated()
        .ignore_then(expr_parser(source))
        .then_ignore(just(Token::Newline).repeated())
        .then_ignore(end());
    let (node, parse_errors) = parser.parse(stream).into_output_errors();
    errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));
    (node, errors)
}

/// Parse the human-readable form of an equation back into an `Expr`.
///
/// Every name becomes a free symbol; `pre.x` / `post.x` keep their dotted
/// spelling. Built-ins (`ite`, `clip`, C99 functions) map to their `Expr` forms.
pub fn parse_expr(source: &str) -> Result<Expr, Vec<Diagnostic>> {
    let (node, errors) = parse_expr_node(source);
    if !errors.is_empty() {
        return Err(errors.iter().map(Diagnostic::from_parse_error).collect());
    }
    let Some(node) = node else {
        return Err(vec![Diagnostic::from_message("expression parse produced no output")]);
    };
    crate::resolve::free_expr(&node).map_err(|d| vec![d])
}

// ── Expression grammar ──
//
//   or      := and ('||' and)*
//   and     := cmp ('&&' cmp)*
//   cmp     := sum (cmp_op sum)?
//   sum     := product (('+' | '-') product)*
//   product := unary (('*' | '/') unary)*
//   unary   := '-' unary | '!' unary | atom ('**' unary)?
//   atom    := NUMBER | IDENT '(' args ')' | IDENT '.' IDENT | IDENT | '(' or ')'

fn expr_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, ExprNode, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let ident = ident_parser(source);

    recursive(move |expr| {
        let number = select! {
            Token::Number(n) = e => {
                let span: SimpleSpan = e.span();
                ExprNode {
                    kind: ExprKind::Number {
                        value: n,
                        text: source[span.start()..span.end()].to_string(),
                    },
                    span,
                }
            },
        };

        let args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let call = ident
            .clone()
            .then(args)
            .map_with(|(name, args), e| ExprNode {
                kind: ExprKind::Call(name, args),
                span: e.span(),
            });

        let namespaced = ident
            .clone()
            .then_ignore(just(Token::Dot))
            .then(ident.clone())
            .map_with(|(ns, attr), e| ExprNode {
                kind: ExprKind::Namespaced(ns, attr),
                span: e.span(),
            });

        let name = ident.clone().map(|id| {
            let span = id.span;
            ExprNode {
                kind: ExprKind::Name(id),
                span,
            }
        });

        let parens = expr
            .clone()
            .delimited_by(just(Token::LParen), just(Token::RParen));

        let atom = choice((number, call, namespaced, name, parens));

        // Unary minus binds looser than `**` (`-x**2` is `-(x**2)`), and the
        // exponent itself may be signed (`x**-2`).
        let unary = recursive(|operand| {
            let power = atom
                .then(just(Token::StarStar).ignore_then(operand.clone()).or_not())
                .map_with(|(base, exp), e| match exp {
                    Some(exp) => binary_node(BinOp::Pow, base, exp, e.span()),
                    None => base,
                });
            choice((
                just(Token::Minus)
                    .ignore_then(operand.clone())
                    .map_with(|x, e| unary_node(UnOp::Neg, x, e.span())),
                just(Token::Bang)
                    .ignore_then(operand)
                    .map_with(|x, e| unary_node(UnOp::Not, x, e.span())),
                power,
            ))
        });

        let product_op = choice((
            just(Token::Star).to(BinOp::Mul),
            just(Token::Slash).to(BinOp::Div),
        ));
        let product = unary.clone().foldl_with(
            product_op.then(unary).repeated(),
            |l, (op, r), e| binary_node(op, l, r, e.span()),
        );

        let sum_op = choice((
            just(Token::Plus).to(BinOp::Add),
            just(Token::Minus).to(BinOp::Sub),
        ));
        let sum = product.clone().foldl_with(
            sum_op.then(product).repeated(),
            |l, (op, r), e| binary_node(op, l, r, e.span()),
        );

        let cmp_op = select! {
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            Token::EqEq => BinOp::Eq,
            Token::Ne => BinOp::Ne,
        };
        let comparison = sum
            .clone()
            .then(cmp_op.then(sum).or_not())
            .map_with(|(l, rhs), e| match rhs {
                Some((op, r)) => binary_node(op, l, r, e.span()),
                None => l,
            });

        let conj = comparison.clone().foldl_with(
            just(Token::AndAnd).to(BinOp::And).then(comparison).repeated(),
            |l, (op, r), e| binary_node(op, l, r, e.span()),
        );

        conj.clone().foldl_with(
            just(Token::OrOr).to(BinOp::Or).then(conj).repeated(),
            |l, (op, r), e| binary_node(op, l, r, e.span()),
        )
    })
}

fn binary_node(op: BinOp, l: ExprNode, r: ExprNode, span: SimpleSpan) -> ExprNode {
    ExprNode {
        kind: ExprKind::Binary(op, Box::new(l), Box::new(r)),
        span,
    }
}

fn unary_node(op: UnOp, x: ExprNode, span: SimpleSpan) -> ExprNode {
    ExprNode {
        kind: ExprKind::Unary(op, Box::new(x)),
        span,
    }
}

fn ident_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Ident, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + Clone + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    })
}

// ── Model grammar ──

fn model_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, ModelFile, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let nl = just(Token::Newline).repeated().ignored();
    let sep = just(Token::Newline).repeated().at_least(1);
    let ident = ident_parser(source);
    let expr = expr_parser(source);

    // ── Attribute declaration ──

    let signed_number = just(Token::Minus)
        .or_not()
        .then(select! { Token::Number(n) => n })
        .map_with(|(minus, n), e| (if minus.is_some() { -n } else { n }, e.span()));

    let modifier = select! {
        Token::Shared => Modifier::Shared,
        Token::PerElement => Modifier::PerElement,
        Token::Input => Modifier::Input,
        Token::Output => Modifier::Output,
    }
    .map_with(|m, e| (m, e.span()));

    let attribute = select! {
        Token::Parameter => AttrKeyword::Parameter,
        Token::Variable => AttrKeyword::Variable,
    }
    .then(ident.clone())
    .then(just(Token::Colon).ignore_then(ident.clone()).or_not())
    .then(just(Token::Equals).ignore_then(signed_number).or_not())
    .then(modifier.repeated().collect::<Vec<_>>())
    .map_with(
        |((((keyword, name), numeric_type), init), modifiers), e| AttributeDecl {
            keyword,
            name,
            numeric_type,
            init,
            modifiers,
            span: e.span(),
        },
    );

    // ── Statements ──

    // `dv/dt` → derivative of `v`; anything else over `/` is not a target.
    let target = ident
        .clone()
        .then(just(Token::Slash).ignore_then(ident.clone()).or_not())
        .try_map(|(name, denom), span| match denom {
            None => Ok(Target {
                name,
                derivative: false,
            }),
            Some(d) if d.name == "dt" && name.name.len() > 1 && name.name.starts_with('d') => {
                Ok(Target {
                    name: Ident {
                        name: name.name[1..].to_string(),
                        span: name.span,
                    },
                    derivative: true,
                })
            }
            Some(_) => Err(Rich::custom(span, "derivative targets are written `dX/dt`")),
        });

    let assign_op = select! {
        Token::Equals => AssignOp::Set,
        Token::PlusEq => AssignOp::AddAssign,
        Token::MinusEq => AssignOp::SubAssign,
    };

    let let_stmt = just(Token::Let)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Equals))
        .then(expr.clone())
        .map(|(name, value)| StmtKind::Let(name, value));

    let assign_stmt = target
        .then(assign_op)
        .then(expr.clone())
        .map(|((target, op), value)| StmtKind::Assign { target, op, value });

    let expr_stmt = expr.map(StmtKind::Expr);

    let stmt = choice((let_stmt, assign_stmt, expr_stmt)).map_with(|kind, e| Stmt {
        kind,
        span: e.span(),
    });

    let block = nl
        .clone()
        .ignore_then(
            stmt.separated_by(sep.clone())
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl.clone())
        .delimited_by(just(Token::LBrace), just(Token::RBrace));

    // ── Methods ──

    let method_kind = select! {
        Token::Update => MethodKind::Update,
        Token::Spike => MethodKind::Spike,
        Token::Reset => MethodKind::Reset,
        Token::Transmit => MethodKind::Transmit,
    };

    let method = method_kind
        .then(ident.clone().or_not())
        .then(block)
        .map_with(|((kind, numerical), body), e| MethodDecl {
            kind,
            numerical,
            body,
            span: e.span(),
        });

    // ── Entity body ──

    let member = attribute
        .map(Member::Attribute)
        .or(method.map(Member::Method));

    let body = nl
        .clone()
        .ignore_then(
            member
                .separated_by(sep.clone())
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl.clone())
        .delimited_by(just(Token::LBrace), just(Token::RBrace))
        .map(split_members);

    let neuron = just(Token::Neuron)
        .ignore_then(ident.clone())
        .then(body.clone())
        .map_with(|(name, (attributes, methods)), e| {
            EntityDecl::Neuron(NeuronDecl {
                name,
                attributes,
                methods,
                span: e.span(),
            })
        });

    let synapse = just(Token::Synapse)
        .ignore_then(ident.clone())
        .then_ignore(just(Token::Colon))
        .then(ident.clone())
        .then_ignore(just(Token::Arrow))
        .then(ident)
        .then(body)
        .map_with(|(((name, pre), post), (attributes, methods)), e| {
            EntityDecl::Synapse(SynapseDecl {
                name,
                pre,
                post,
                attributes,
                methods,
                span: e.span(),
            })
        });

    // ── Model file ──

    nl.clone()
        .ignore_then(
            neuron
                .or(synapse)
                .separated_by(sep)
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
        .map_with(|entities, e| ModelFile {
            entities,
            span: e.span(),
        })
}

fn split_members(members: Vec<Member>) -> (Vec<AttributeDecl>, Vec<MethodDecl>) {
    let mut attributes = Vec::new();
    let mut methods = Vec::new();
    for m in members {
        match m {
            Member::Attribute(a) => attributes.push(a),
            Member::Method(m) => methods.push(m),
        }
    }
    (attributes, methods)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> ModelFile {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected errors: {:#?}",
            result.errors
        );
        result.model.expect("expected model")
    }

    fn expr_ok(source: &str) -> ExprNode {
        let (node, errors) = parse_expr_node(source);
        assert!(errors.is_empty(), "unexpected errors: {errors:#?}");
        node.expect("expected expression")
    }

    const LIF: &str = "
neuron LIF {
    parameter tau = 20.0
    parameter V_th = 1.0 shared
    variable ge = 0.0 input
    variable v : float = -0.5
    variable r = 0.0 output

    update midpoint {
        let leak = v / tau
        dv/dt = ge / tau - leak
        r = tanh(v)
    }
    spike { v >= V_th }
    reset { v = 0.0 }
}
";

    #[test]
    fn empty_model() {
        assert!(parse_ok("").entities.is_empty());
        assert!(parse_ok("\n\n# only a comment\n").entities.is_empty());
    }

    #[test]
    fn neuron_attributes() {
        let model = parse_ok(LIF);
        assert_eq!(model.entities.len(), 1);
        let EntityDecl::Neuron(n) = &model.entities[0] else {
            panic!("expected neuron")
        };
        assert_eq!(n.name.name, "LIF");
        let names: Vec<&str> = n.attributes.iter().map(|a| a.name.name.as_str()).collect();
        assert_eq!(names, vec!["tau", "V_th", "ge", "v", "r"]);
        assert_eq!(n.attributes[0].keyword, AttrKeyword::Parameter);
        assert_eq!(n.attributes[1].modifiers[0].0, Modifier::Shared);
        assert_eq!(n.attributes[2].modifiers[0].0, Modifier::Input);
        assert_eq!(n.attributes[3].numeric_type.as_ref().unwrap().name, "float");
        assert_eq!(n.attributes[3].init.unwrap().0, -0.5);
    }

    #[test]
    fn neuron_methods() {
        let model = parse_ok(LIF);
        let EntityDecl::Neuron(n) = &model.entities[0] else {
            panic!("expected neuron")
        };
        let kinds: Vec<MethodKind> = n.methods.iter().map(|m| m.kind).collect();
        assert_eq!(
            kinds,
            vec![MethodKind::Update, MethodKind::Spike, MethodKind::Reset]
        );
        let update = &n.methods[0];
        assert_eq!(update.numerical.as_ref().unwrap().name, "midpoint");
        assert_eq!(update.body.len(), 3);
        assert!(matches!(update.body[0].kind, StmtKind::Let(ref id, _) if id.name == "leak"));
        let StmtKind::Assign { target, op, .. } = &update.body[1].kind else {
            panic!("expected assignment")
        };
        assert!(target.derivative);
        assert_eq!(target.recorded_name(), "dv_dt");
        assert_eq!(*op, AssignOp::Set);
        assert!(matches!(n.methods[1].body[0].kind, StmtKind::Expr(_)));
    }

    #[test]
    fn synapse_header() {
        let model = parse_ok(
            "synapse Hebb : LIF -> RC {\n  variable w = 0.0\n  update { w += 0.1 * pre.r * post.r }\n  transmit { target += w * pre.r }\n}\n",
        );
        let EntityDecl::Synapse(s) = &model.entities[0] else {
            panic!("expected synapse")
        };
        assert_eq!(s.pre.name, "LIF");
        assert_eq!(s.post.name, "RC");
        let StmtKind::Assign { op, .. } = &s.methods[0].body[0].kind else {
            panic!("expected assignment")
        };
        assert_eq!(*op, AssignOp::AddAssign);
        assert_eq!(s.methods[1].kind, MethodKind::Transmit);
    }

    #[test]
    fn underscore_derivative_is_plain_target() {
        let model = parse_ok("neuron N {\n variable v\n update { dv_dt = -v }\n}");
        let EntityDecl::Neuron(n) = &model.entities[0] else {
            panic!("expected neuron")
        };
        let StmtKind::Assign { target, .. } = &n.methods[0].body[0].kind else {
            panic!("expected assignment")
        };
        assert!(!target.derivative);
        assert_eq!(target.recorded_name(), "dv_dt");
    }

    #[test]
    fn precedence_unary_below_power() {
        let e = expr_ok("-x**2");
        let ExprKind::Unary(UnOp::Neg, inner) = e.kind else {
            panic!("expected negation at the root")
        };
        assert!(matches!(inner.kind, ExprKind::Binary(BinOp::Pow, _, _)));
    }

    #[test]
    fn precedence_product_over_sum() {
        let e = expr_ok("a + b * c");
        let ExprKind::Binary(BinOp::Add, _, rhs) = e.kind else {
            panic!("expected sum at the root")
        };
        assert!(matches!(rhs.kind, ExprKind::Binary(BinOp::Mul, _, _)));
    }

    #[test]
    fn logical_operators() {
        let e = expr_ok("a < b && !(c >= 1) || d == e");
        assert!(matches!(e.kind, ExprKind::Binary(BinOp::Or, _, _)));
    }

    #[test]
    fn calls_and_namespaces() {
        let e = expr_ok("clip(pre.r * w, 0.0, 1.0)");
        let ExprKind::Call(name, args) = e.kind else {
            panic!("expected call")
        };
        assert_eq!(name.name, "clip");
        assert_eq!(args.len(), 3);
        assert!(matches!(
            args[0].kind,
            ExprKind::Binary(BinOp::Mul, ref l, _) if matches!(l.kind, ExprKind::Namespaced(..))
        ));
    }

    #[test]
    fn number_keeps_spelling() {
        let e = expr_ok("1e-3");
        assert!(matches!(e.kind, ExprKind::Number { value, ref text } if value == 1e-3 && text == "1e-3"));
    }

    #[test]
    fn trailing_garbage_is_error() {
        let (_, errors) = parse_expr_node("a + b )");
        assert!(!errors.is_empty());
    }

    #[test]
    fn missing_brace_reports_error() {
        let result = parse("neuron N {\n variable v\n");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn bad_derivative_denominator_reports_error() {
        let result = parse("neuron N {\n variable v\n update { dv/dx = 1 }\n}");
        assert!(!result.errors.is_empty());
    }
}
