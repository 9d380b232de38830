// render.rs — Expression rendering
//
// C99 pipeline: freeze numeric constants into opaque literals, apply the
// C99 rewrites (`expm1`, `log1p`), expand squares and cubes into explicit
// products, resolve symbols through the correspondence table, print.
//
// Preconditions: the correspondence table covers every free symbol.
// Postconditions: numeric literals keep their printed form; no `pow(x, 2)`
//                 or `pow(x, 3)` survives.
// Failure modes: unresolved symbol → `GenerationError::UnresolvedSymbol`.
// Side effects: none.

use crate::correspond::Correspondence;
use crate::error::GenerationError;
use crate::expr::{self, Expr, Func, Syntax};

/// Rewrite `x**2` as `x*x` and `x**3` as `x*x*x`.
pub fn expand_small_powers(e: &Expr) -> Expr {
    e.transform_up(&|node| {
        let copies = match &node {
            Expr::Pow(_, exp) => match exp.numeric_value() {
                Some(n) if n == 2.0 => 2,
                Some(n) if n == 3.0 => 3,
                _ => 0,
            },
            _ => 0,
        };
        match node {
            Expr::Pow(base, _) if copies > 0 => Expr::Mul(vec![*base; copies]),
            other => other,
        }
    })
}

/// Numerically better C99 forms: `exp(y) - 1` → `expm1(y)`,
/// `1 - exp(y)` → `-expm1(y)`, `log(1 + x)` → `log1p(x)`.
pub fn c99_optimize(e: &Expr) -> Expr {
    e.transform_up(&|node| match node {
        Expr::Add(terms) => fold_expm1(terms),
        Expr::Call(Func::Log, mut args) if args.len() == 1 => match args.pop() {
            Some(Expr::Add(terms)) => match split_constant(&terms, 1.0) {
                Some(i) => {
                    let mut rest = terms;
                    rest.remove(i);
                    expr::call(Func::Log1p, vec![expr::add(rest)])
                }
                None => expr::call(Func::Log, vec![Expr::Add(terms)]),
            },
            Some(arg) => expr::call(Func::Log, vec![arg]),
            None => expr::call(Func::Log, args),
        },
        other => other,
    })
}

fn split_constant(terms: &[Expr], value: f64) -> Option<usize> {
    terms.iter().position(|t| t.numeric_value() == Some(value))
}

fn exp_arg(e: &Expr) -> Option<&Expr> {
    match e {
        Expr::Call(Func::Exp, args) if args.len() == 1 => args.first(),
        _ => None,
    }
}

/// `-exp(y)` as a product `[-1, exp(y)]`.
fn negated_exp_arg(e: &Expr) -> Option<(&Expr, &Expr)> {
    match e {
        Expr::Mul(fs) if fs.len() == 2 && fs[0].numeric_value() == Some(-1.0) => {
            exp_arg(&fs[1]).map(|y| (&fs[0], y))
        }
        _ => None,
    }
}

fn fold_expm1(mut terms: Vec<Expr>) -> Expr {
    let plus = split_constant(&terms, -1.0).zip(terms.iter().position(|t| exp_arg(t).is_some()));
    if let Some((c, e)) = plus {
        let replacement = exp_arg(&terms[e]).map(|y| expr::call(Func::Expm1, vec![y.clone()]));
        if let Some(r) = replacement {
            terms[e] = r;
            terms.remove(c);
        }
        return expr::add(terms);
    }
    let minus = split_constant(&terms, 1.0)
        .zip(terms.iter().position(|t| negated_exp_arg(t).is_some()));
    if let Some((c, e)) = minus {
        let replacement = negated_exp_arg(&terms[e]).map(|(minus_one, y)| {
            Expr::Mul(vec![
                minus_one.clone(),
                expr::call(Func::Expm1, vec![y.clone()]),
            ])
        });
        if let Some(r) = replacement {
            terms[e] = r;
            terms.remove(c);
        }
    }
    expr::add(terms)
}

/// Substitute every symbol by its target access expression.
pub fn resolve_symbols(e: &Expr, table: &Correspondence) -> Result<Expr, GenerationError> {
    e.try_replace(&mut |node| match node {
        Expr::Sym(name) => match table.resolve(name) {
            Some(access) => Ok(Some(expr::sym(access))),
            None => Err(GenerationError::UnresolvedSymbol {
                symbol: name.clone(),
            }),
        },
        _ => Ok(None),
    })
}

/// Render an expression as C99 text for the given class.
pub fn to_c(e: &Expr, table: &Correspondence) -> Result<String, GenerationError> {
    let frozen = e.freeze_literals();
    let optimized = expand_small_powers(&c99_optimize(&frozen));
    Ok(resolve_symbols(&optimized, table)?.print(Syntax::C))
}

/// Re-parseable text of an expression, with the same power expansion as `to_c`.
pub fn human_readable(e: &Expr) -> String {
    expand_small_powers(e).print(Syntax::Human)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use crate::expr::{call, literal, num, pow, sym};

    fn lif_table() -> Correspondence {
        Correspondence::neuron(
            &[
                Attribute::parameter("tau", 20.0),
                Attribute::variable("I", 0.0),
                Attribute::variable("v", 0.0),
            ],
            &[],
        )
    }

    #[test]
    fn leak_term() {
        let e = (sym("I") - sym("v")) / sym("tau");
        assert_eq!(
            to_c(&e, &lif_table()).unwrap(),
            "(this->I[i] - this->v[i])/this->tau"
        );
    }

    #[test]
    fn squares_and_cubes_expand() {
        let t = lif_table();
        assert_eq!(
            to_c(&pow(sym("v"), num(2.0)), &t).unwrap(),
            "this->v[i]*this->v[i]"
        );
        assert_eq!(
            to_c(&pow(sym("v") + num(1.0), num(3.0)), &t).unwrap(),
            "(this->v[i] + 1.0)*(this->v[i] + 1.0)*(this->v[i] + 1.0)"
        );
        assert_eq!(
            to_c(&pow(sym("v"), num(4.0)), &t).unwrap(),
            "pow(this->v[i], 4.0)"
        );
    }

    #[test]
    fn expm1_rewrites() {
        let t = lif_table();
        let decay = num(1.0) - call(Func::Exp, vec![-(sym("dt") / sym("tau"))]);
        assert_eq!(
            to_c(&decay, &t).unwrap(),
            "-expm1(-this->net->dt/this->tau)"
        );
        let grow = call(Func::Exp, vec![sym("v")]) - num(1.0);
        assert_eq!(to_c(&grow, &t).unwrap(), "expm1(this->v[i])");
    }

    #[test]
    fn log1p_rewrite() {
        let e = call(Func::Log, vec![num(1.0) + sym("v")]);
        assert_eq!(to_c(&e, &lif_table()).unwrap(), "log1p(this->v[i])");
        let plain = call(Func::Log, vec![num(2.0) + sym("v")]);
        assert_eq!(to_c(&plain, &lif_table()).unwrap(), "log(this->v[i] + 2.0)");
    }

    #[test]
    fn literal_text_survives() {
        let e = literal(0.1) * num(3.0) * sym("v");
        assert_eq!(to_c(&e, &lif_table()).unwrap(), "3.0*0.1*this->v[i]");
    }

    #[test]
    fn unresolved_symbol_is_generation_error() {
        let err = to_c(&(sym("w") + num(1.0)), &lif_table()).unwrap_err();
        assert_eq!(err, GenerationError::UnresolvedSymbol { symbol: "w".into() });
    }

    #[test]
    fn human_readable_expands_powers_only() {
        let e = pow(sym("v"), num(2.0)) / sym("tau") + num(1.0);
        assert_eq!(human_readable(&e), "v*v/tau + 1.0");
    }
}
