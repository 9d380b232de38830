// expr.rs — Symbolic expression trees for model equations
//
// Every phase of the compiler manipulates `Expr` values: the capture context
// records them, lowering expands and substitutes them, the renderer prints them.
// Construction goes through smart constructors that keep trees in a canonical
// shape (flattened sums/products, folded numeric constants, reciprocal
// cancellation), so structurally equal math compares equal with `==`.
//
// Preconditions: none.
// Postconditions: values built with the constructors below are canonical.
// Failure modes: none (evaluation returns `None` on unbound symbols).
// Side effects: none.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops;

use serde::Serialize;

// ── Node types ──────────────────────────────────────────────────────────────

/// Built-in functions understood by both the parser and the C99 printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Func {
    Exp,
    Log,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Tanh,
    Sinh,
    Cosh,
    Fabs,
    Fmin,
    Fmax,
    Expm1,
    Log1p,
}

impl Func {
    pub fn name(self) -> &'static str {
        match self {
            Func::Exp => "exp",
            Func::Log => "log",
            Func::Sqrt => "sqrt",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Tanh => "tanh",
            Func::Sinh => "sinh",
            Func::Cosh => "cosh",
            Func::Fabs => "fabs",
            Func::Fmin => "fmin",
            Func::Fmax => "fmax",
            Func::Expm1 => "expm1",
            Func::Log1p => "log1p",
        }
    }

    pub fn from_name(name: &str) -> Option<Func> {
        Some(match name {
            "exp" => Func::Exp,
            "log" => Func::Log,
            "sqrt" => Func::Sqrt,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "tanh" => Func::Tanh,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "fabs" | "abs" => Func::Fabs,
            "fmin" | "min" => Func::Fmin,
            "fmax" | "max" => Func::Fmax,
            "expm1" => Func::Expm1,
            "log1p" => Func::Log1p,
            _ => return None,
        })
    }

    pub fn arity(self) -> usize {
        match self {
            Func::Fmin | Func::Fmax => 2,
            _ => 1,
        }
    }

    fn apply(self, args: &[f64]) -> f64 {
        let x = args.first().copied().unwrap_or(f64::NAN);
        match self {
            Func::Exp => x.exp(),
            Func::Log => x.ln(),
            Func::Sqrt => x.sqrt(),
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tan => x.tan(),
            Func::Tanh => x.tanh(),
            Func::Sinh => x.sinh(),
            Func::Cosh => x.cosh(),
            Func::Fabs => x.abs(),
            Func::Fmin => x.min(args.get(1).copied().unwrap_or(f64::NAN)),
            Func::Fmax => x.max(args.get(1).copied().unwrap_or(f64::NAN)),
            Func::Expm1 => x.exp_m1(),
            Func::Log1p => x.ln_1p(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }

    fn holds(self, a: f64, b: f64) -> bool {
        match self {
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
        }
    }
}

/// A symbolic expression.
///
/// Construct through the free functions of this module (`add`, `mul`, `pow`,
/// ...) or the overloaded operators; building variants directly bypasses
/// canonicalization and breaks structural equality.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Foldable numeric constant.
    Num(f64),
    /// Opaque number: never folded, always printed with `text`.
    Literal { text: String, value: f64 },
    /// Named symbol. Synapse namespaces use dotted names (`pre.r`, `post.v`).
    Sym(String),
    /// Sum; at most one `Num` term, always last.
    Add(Vec<Expr>),
    /// Product; optional leading `Num` coefficient, then numerator factors,
    /// then reciprocal factors `Pow(b, -1)`.
    Mul(Vec<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// if/then/else.
    Ite(Box<Expr>, Box<Expr>, Box<Expr>),
}

// ── Smart constructors ──────────────────────────────────────────────────────

pub fn num(v: f64) -> Expr {
    Expr::Num(v)
}

pub fn sym(name: impl Into<String>) -> Expr {
    Expr::Sym(name.into())
}

/// Opaque numeric literal printed as `{value:?}`.
pub fn literal(value: f64) -> Expr {
    Expr::Literal {
        text: format!("{value:?}"),
        value,
    }
}

/// Opaque numeric literal keeping the author's spelling.
pub fn literal_text(text: impl Into<String>, value: f64) -> Expr {
    let mut text = text.into();
    if !text.contains(['.', 'e', 'E']) {
        text.push_str(".0");
    }
    Expr::Literal { text, value }
}

pub fn add(terms: Vec<Expr>) -> Expr {
    let mut out = Vec::with_capacity(terms.len());
    let mut constant = 0.0;
    push_terms(terms, &mut out, &mut constant);
    if constant != 0.0 {
        out.push(Expr::Num(constant));
    }
    match out.len() {
        0 => Expr::Num(0.0),
        1 => out.pop().unwrap_or(Expr::Num(0.0)),
        _ => Expr::Add(out),
    }
}

fn push_terms(terms: Vec<Expr>, out: &mut Vec<Expr>, constant: &mut f64) {
    for t in terms {
        match t {
            Expr::Num(v) => *constant += v,
            Expr::Add(inner) => push_terms(inner, out, constant),
            other => out.push(other),
        }
    }
}

pub fn mul(factors: Vec<Expr>) -> Expr {
    let mut coef = 1.0;
    let mut numer = Vec::new();
    let mut denom = Vec::new();
    push_factors(factors, &mut coef, &mut numer, &mut denom);
    if coef == 0.0 {
        return Expr::Num(0.0);
    }

    // x * x^-1 cancels pairwise.
    let mut i = 0;
    while i < denom.len() {
        if let Some(pos) = numer.iter().position(|n| *n == denom[i]) {
            numer.remove(pos);
            denom.remove(i);
        } else {
            i += 1;
        }
    }

    let mut out = Vec::with_capacity(numer.len() + denom.len() + 1);
    if coef != 1.0 {
        out.push(Expr::Num(coef));
    }
    out.extend(numer);
    out.extend(
        denom
            .into_iter()
            .map(|b| Expr::Pow(Box::new(b), Box::new(Expr::Num(-1.0)))),
    );
    match out.len() {
        0 => Expr::Num(coef),
        1 => out.pop().unwrap_or(Expr::Num(coef)),
        _ => Expr::Mul(out),
    }
}

fn push_factors(factors: Vec<Expr>, coef: &mut f64, numer: &mut Vec<Expr>, denom: &mut Vec<Expr>) {
    for f in factors {
        match f {
            Expr::Num(v) => *coef *= v,
            Expr::Mul(inner) => push_factors(inner, coef, numer, denom),
            Expr::Pow(base, exp) if exp.as_num() == Some(-1.0) => denom.push(*base),
            other => numer.push(other),
        }
    }
}

pub fn pow(base: Expr, exp: Expr) -> Expr {
    match (&base, exp.as_num()) {
        (_, Some(e)) if e == 1.0 => base,
        (_, Some(e)) if e == 0.0 => Expr::Num(1.0),
        (Expr::Num(b), Some(e)) => Expr::Num(b.powf(e)),
        (_, Some(e)) if e == -1.0 => inv(base),
        _ => Expr::Pow(Box::new(base), Box::new(exp)),
    }
}

/// Reciprocal. Distributes over products so denominators stay flat.
pub fn inv(e: Expr) -> Expr {
    match e {
        Expr::Num(v) => Expr::Num(1.0 / v),
        Expr::Pow(base, exp) if exp.as_num() == Some(-1.0) => *base,
        Expr::Mul(fs) => mul(fs.into_iter().map(inv).collect()),
        other => Expr::Pow(Box::new(other), Box::new(Expr::Num(-1.0))),
    }
}

pub fn neg(e: Expr) -> Expr {
    mul(vec![Expr::Num(-1.0), e])
}

pub fn sub(a: Expr, b: Expr) -> Expr {
    add(vec![a, neg(b)])
}

pub fn div(a: Expr, b: Expr) -> Expr {
    mul(vec![a, inv(b)])
}

pub fn call(func: Func, args: Vec<Expr>) -> Expr {
    if args.len() == func.arity() && args.iter().all(|a| a.as_num().is_some()) {
        let vals: Vec<f64> = args.iter().filter_map(Expr::as_num).collect();
        let v = func.apply(&vals);
        if v.is_finite() {
            return Expr::Num(v);
        }
    }
    Expr::Call(func, args)
}

pub fn cmp(op: CmpOp, a: Expr, b: Expr) -> Expr {
    Expr::Cmp(op, Box::new(a), Box::new(b))
}

pub fn and(a: Expr, b: Expr) -> Expr {
    Expr::And(Box::new(a), Box::new(b))
}

pub fn or(a: Expr, b: Expr) -> Expr {
    Expr::Or(Box::new(a), Box::new(b))
}

pub fn not(a: Expr) -> Expr {
    Expr::Not(Box::new(a))
}

pub fn ite(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
    Expr::Ite(Box::new(cond), Box::new(then), Box::new(otherwise))
}

/// Sum of `terms` with like terms combined: `a*x - a*x + b` is `b`.
pub fn collect_terms(terms: Vec<Expr>) -> Expr {
    let mut groups: Vec<(f64, Expr)> = Vec::new();
    for term in add(terms).into_terms() {
        let (c, key) = term.split_coefficient();
        match groups.iter_mut().find(|(_, k)| *k == key) {
            Some((total, _)) => *total += c,
            None => groups.push((c, key)),
        }
    }
    add(groups
        .into_iter()
        .filter(|(c, _)| *c != 0.0)
        .map(|(c, key)| mul(vec![Expr::Num(c), key]))
        .collect())
}

/// Clamp `x` to `[lo, hi]` with `fmax`/`fmin`; either bound may be omitted.
pub fn clip(x: Expr, lo: Option<Expr>, hi: Option<Expr>) -> Expr {
    let x = match lo {
        Some(lo) => call(Func::Fmax, vec![x, lo]),
        None => x,
    };
    match hi {
        Some(hi) => call(Func::Fmin, vec![x, hi]),
        None => x,
    }
}

// ── Operators ───────────────────────────────────────────────────────────────

impl ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        add(vec![self, rhs])
    }
}

impl ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        sub(self, rhs)
    }
}

impl ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        mul(vec![self, rhs])
    }
}

impl ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        div(self, rhs)
    }
}

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        neg(self)
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Expr {
        Expr::Num(v)
    }
}

// ── Queries and rewriting ───────────────────────────────────────────────────

impl Expr {
    /// Value of a foldable constant.
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Expr::Num(v) => Some(*v),
            _ => None,
        }
    }

    fn into_terms(self) -> Vec<Expr> {
        match self {
            Expr::Add(ts) => ts,
            other => vec![other],
        }
    }

    /// `c * rest` with `c` the leading numeric coefficient (1 when absent).
    fn split_coefficient(self) -> (f64, Expr) {
        match self {
            Expr::Num(v) => (v, Expr::Num(1.0)),
            Expr::Mul(mut fs) => match fs.first().and_then(Expr::as_num) {
                Some(c) => {
                    fs.remove(0);
                    (c, mul(fs))
                }
                None => (1.0, Expr::Mul(fs)),
            },
            other => (1.0, other),
        }
    }

    /// Numeric value of a constant, opaque or not.
    pub fn numeric_value(&self) -> Option<f64> {
        match self {
            Expr::Num(v) => Some(*v),
            Expr::Literal { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Num(_) | Expr::Literal { .. } | Expr::Sym(_) => Vec::new(),
            Expr::Add(xs) | Expr::Mul(xs) | Expr::Call(_, xs) => xs.iter().collect(),
            Expr::Pow(a, b) | Expr::Cmp(_, a, b) | Expr::And(a, b) | Expr::Or(a, b) => {
                vec![a, b]
            }
            Expr::Not(a) => vec![a],
            Expr::Ite(c, a, b) => vec![c, a, b],
        }
    }

    /// All symbol names occurring in the expression.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        if let Expr::Sym(name) = self {
            out.insert(name.clone());
        }
        for c in self.children() {
            c.collect_symbols(out);
        }
    }

    pub fn contains_symbol(&self, name: &str) -> bool {
        match self {
            Expr::Sym(s) => s == name,
            _ => self.children().iter().any(|c| c.contains_symbol(name)),
        }
    }

    /// True when the expression produces a truth value.
    pub fn is_boolean(&self) -> bool {
        match self {
            Expr::Cmp(..) | Expr::And(..) | Expr::Or(..) | Expr::Not(_) => true,
            Expr::Ite(_, a, b) => a.is_boolean() && b.is_boolean(),
            _ => false,
        }
    }

    /// Rebuild this node from new children using the smart constructors.
    fn rebuild(&self, mut kids: Vec<Expr>) -> Expr {
        match self {
            Expr::Num(_) | Expr::Literal { .. } | Expr::Sym(_) => self.clone(),
            Expr::Add(_) => add(kids),
            Expr::Mul(_) => mul(kids),
            Expr::Call(f, _) => call(*f, kids),
            _ => {
                kids.reverse();
                let mut next = || kids.pop().unwrap_or(Expr::Num(0.0));
                match self {
                    Expr::Pow(..) => {
                        let b = next();
                        pow(b, next())
                    }
                    Expr::Cmp(op, ..) => {
                        let a = next();
                        cmp(*op, a, next())
                    }
                    Expr::And(..) => {
                        let a = next();
                        and(a, next())
                    }
                    Expr::Or(..) => {
                        let a = next();
                        or(a, next())
                    }
                    Expr::Not(_) => not(next()),
                    _ => {
                        let c = next();
                        let a = next();
                        ite(c, a, next())
                    }
                }
            }
        }
    }

    /// Bottom-up rewrite: children first, then `f` on the rebuilt node.
    pub fn transform_up(&self, f: &impl Fn(Expr) -> Expr) -> Expr {
        let kids = self.children().into_iter().map(|c| c.transform_up(f)).collect();
        f(self.rebuild(kids))
    }

    /// Fallible top-down rewrite. When `f` returns `Some`, the node is replaced
    /// and its children are not visited.
    pub fn try_replace<E>(
        &self,
        f: &mut impl FnMut(&Expr) -> Result<Option<Expr>, E>,
    ) -> Result<Expr, E> {
        if let Some(new) = f(self)? {
            return Ok(new);
        }
        let mut kids = Vec::new();
        for c in self.children() {
            kids.push(c.try_replace(f)?);
        }
        Ok(self.rebuild(kids))
    }

    /// Simultaneous substitution of symbols.
    pub fn subs(&self, map: &HashMap<String, Expr>) -> Expr {
        let replaced: Result<Expr, std::convert::Infallible> = self.try_replace(&mut |e| {
            Ok(match e {
                Expr::Sym(name) => map.get(name).cloned(),
                _ => None,
            })
        });
        match replaced {
            Ok(e) => e,
            Err(never) => match never {},
        }
    }

    /// Replace every foldable constant by an opaque literal of the same value.
    /// Reciprocal exponents stay foldable so denominators keep printing as
    /// `a/b`. The tree is rebuilt structurally, without re-canonicalizing.
    pub fn freeze_literals(&self) -> Expr {
        let freeze_all = |xs: &[Expr]| xs.iter().map(Expr::freeze_literals).collect::<Vec<_>>();
        let boxed = |e: &Expr| Box::new(e.freeze_literals());
        match self {
            Expr::Num(v) => literal(*v),
            Expr::Literal { .. } | Expr::Sym(_) => self.clone(),
            Expr::Add(ts) => Expr::Add(freeze_all(ts)),
            Expr::Mul(fs) => Expr::Mul(freeze_all(fs)),
            Expr::Pow(b, e) if e.as_num() == Some(-1.0) => Expr::Pow(boxed(b), e.clone()),
            Expr::Pow(b, e) => Expr::Pow(boxed(b), boxed(e)),
            Expr::Call(f, args) => Expr::Call(*f, freeze_all(args)),
            Expr::Cmp(op, a, b) => Expr::Cmp(*op, boxed(a), boxed(b)),
            Expr::And(a, b) => Expr::And(boxed(a), boxed(b)),
            Expr::Or(a, b) => Expr::Or(boxed(a), boxed(b)),
            Expr::Not(a) => Expr::Not(boxed(a)),
            Expr::Ite(c, a, b) => Expr::Ite(boxed(c), boxed(a), boxed(b)),
        }
    }

    /// Distribute products over sums. Powers are never expanded.
    pub fn expand(&self) -> Expr {
        match self {
            Expr::Add(ts) => add(ts.iter().map(Expr::expand).collect()),
            Expr::Mul(fs) => {
                let mut acc = vec![Expr::Num(1.0)];
                for f in fs.iter().map(Expr::expand) {
                    let parts = match f {
                        Expr::Add(ts) => ts,
                        other => vec![other],
                    };
                    acc = acc
                        .iter()
                        .flat_map(|a| parts.iter().map(move |p| mul(vec![a.clone(), p.clone()])))
                        .collect();
                }
                add(acc)
            }
            other => {
                let kids = other.children().into_iter().map(Expr::expand).collect();
                other.rebuild(kids)
            }
        }
    }

    /// Split `self` as `coef * x + rest`, with neither part mentioning `x`.
    ///
    /// Returns `None` when the expression is not affine in `x`.
    pub fn affine_in(&self, x: &str) -> Option<(Expr, Expr)> {
        let expanded = self.expand();
        let terms = match expanded {
            Expr::Add(ts) => ts,
            other => vec![other],
        };
        let mut coef = Vec::new();
        let mut rest = Vec::new();
        for term in terms {
            if !term.contains_symbol(x) {
                rest.push(term);
                continue;
            }
            match term {
                Expr::Sym(ref s) if s == x => coef.push(Expr::Num(1.0)),
                Expr::Mul(fs) => {
                    let (hits, others): (Vec<Expr>, Vec<Expr>) =
                        fs.into_iter().partition(|f| matches!(f, Expr::Sym(s) if s == x));
                    if hits.len() != 1 || others.iter().any(|f| f.contains_symbol(x)) {
                        return None;
                    }
                    coef.push(mul(others));
                }
                _ => return None,
            }
        }
        Some((collect_terms(coef), collect_terms(rest)))
    }

    /// Numeric evaluation. Booleans evaluate to 1.0 / 0.0.
    pub fn eval(&self, env: &HashMap<String, f64>) -> Option<f64> {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        Some(match self {
            Expr::Num(v) => *v,
            Expr::Literal { value, .. } => *value,
            Expr::Sym(name) => *env.get(name)?,
            Expr::Add(ts) => {
                let mut s = 0.0;
                for t in ts {
                    s += t.eval(env)?;
                }
                s
            }
            Expr::Mul(fs) => {
                let mut p = 1.0;
                for f in fs {
                    p *= f.eval(env)?;
                }
                p
            }
            Expr::Pow(b, e) => b.eval(env)?.powf(e.eval(env)?),
            Expr::Call(f, args) => {
                let mut vals = Vec::with_capacity(args.len());
                for a in args {
                    vals.push(a.eval(env)?);
                }
                f.apply(&vals)
            }
            Expr::Cmp(op, a, b) => truth(op.holds(a.eval(env)?, b.eval(env)?)),
            Expr::And(a, b) => truth(a.eval(env)? != 0.0 && b.eval(env)? != 0.0),
            Expr::Or(a, b) => truth(a.eval(env)? != 0.0 || b.eval(env)? != 0.0),
            Expr::Not(a) => truth(a.eval(env)? == 0.0),
            Expr::Ite(c, a, b) => {
                if c.eval(env)? != 0.0 {
                    a.eval(env)?
                } else {
                    b.eval(env)?
                }
            }
        })
    }
}

// ── Printing ────────────────────────────────────────────────────────────────

/// Output syntax for the shared printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// Re-parseable form used in comments and reports (`x**2`, `ite(c, a, b)`).
    Human,
    /// C99 (`pow(x, 2)`, `c ? a : b`).
    C,
}

const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_CMP: u8 = 3;
const PREC_ADD: u8 = 4;
const PREC_MUL: u8 = 5;
const PREC_UNARY: u8 = 6;
const PREC_POW: u8 = 7;
const PREC_ATOM: u8 = 8;

fn is_negative_const(e: &Expr) -> bool {
    match e {
        Expr::Num(v) => v.is_sign_negative() && *v != 0.0,
        Expr::Literal { text, .. } => text.starts_with('-'),
        _ => false,
    }
}

impl Expr {
    fn precedence(&self, syntax: Syntax) -> u8 {
        match self {
            Expr::Or(..) => PREC_OR,
            Expr::And(..) => PREC_AND,
            Expr::Cmp(..) => PREC_CMP,
            Expr::Add(_) => PREC_ADD,
            Expr::Mul(_) => PREC_MUL,
            Expr::Not(_) => PREC_UNARY,
            Expr::Pow(_, e) if e.as_num() == Some(-1.0) => PREC_MUL,
            Expr::Pow(..) if syntax == Syntax::Human => PREC_POW,
            e if is_negative_const(e) => PREC_UNARY,
            _ => PREC_ATOM,
        }
    }

    /// Render with the given syntax.
    pub fn print(&self, syntax: Syntax) -> String {
        let mut out = String::new();
        self.write(syntax, 0, &mut out);
        out
    }

    fn write(&self, syntax: Syntax, min_prec: u8, out: &mut String) {
        let wrap = self.precedence(syntax) < min_prec;
        if wrap {
            out.push('(');
        }
        self.write_bare(syntax, out);
        if wrap {
            out.push(')');
        }
    }

    fn write_bare(&self, syntax: Syntax, out: &mut String) {
        use std::fmt::Write as _;
        match self {
            Expr::Num(v) => {
                let _ = write!(out, "{v:?}");
            }
            Expr::Literal { text, .. } => out.push_str(text),
            Expr::Sym(name) => out.push_str(name),
            Expr::Add(ts) => {
                for (i, t) in ts.iter().enumerate() {
                    if i == 0 {
                        t.write(syntax, PREC_MUL, out);
                    } else if let Some(pos) = negated(t) {
                        out.push_str(" - ");
                        pos.write(syntax, PREC_MUL, out);
                    } else {
                        out.push_str(" + ");
                        t.write(syntax, PREC_MUL, out);
                    }
                }
            }
            Expr::Mul(fs) => write_product(fs, syntax, out),
            Expr::Pow(b, e) if e.as_num() == Some(-1.0) => {
                out.push_str(if syntax == Syntax::C { "1.0/" } else { "1/" });
                b.write(syntax, PREC_ATOM, out);
            }
            Expr::Pow(b, e) => match syntax {
                Syntax::Human => {
                    b.write(syntax, PREC_ATOM, out);
                    out.push_str("**");
                    e.write(syntax, PREC_ATOM, out);
                }
                Syntax::C => {
                    out.push_str("pow(");
                    b.write(syntax, 0, out);
                    out.push_str(", ");
                    e.write(syntax, 0, out);
                    out.push(')');
                }
            },
            Expr::Call(f, args) => {
                out.push_str(f.name());
                out.push('(');
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    a.write(syntax, 0, out);
                }
                out.push(')');
            }
            Expr::Cmp(op, a, b) => {
                a.write(syntax, PREC_ADD, out);
                let _ = write!(out, " {} ", op.symbol());
                b.write(syntax, PREC_ADD, out);
            }
            Expr::And(a, b) => {
                a.write(syntax, PREC_AND, out);
                out.push_str(" && ");
                b.write(syntax, PREC_AND + 1, out);
            }
            Expr::Or(a, b) => {
                a.write(syntax, PREC_OR, out);
                out.push_str(" || ");
                b.write(syntax, PREC_OR + 1, out);
            }
            Expr::Not(a) => {
                out.push('!');
                a.write(syntax, PREC_UNARY, out);
            }
            Expr::Ite(c, a, b) => match syntax {
                Syntax::Human => {
                    out.push_str("ite(");
                    c.write(syntax, 0, out);
                    out.push_str(", ");
                    a.write(syntax, 0, out);
                    out.push_str(", ");
                    b.write(syntax, 0, out);
                    out.push(')');
                }
                Syntax::C => {
                    out.push('(');
                    c.write(syntax, PREC_OR, out);
                    out.push_str(" ? ");
                    a.write(syntax, PREC_OR, out);
                    out.push_str(" : ");
                    b.write(syntax, PREC_OR, out);
                    out.push(')');
                }
            },
        }
    }
}

/// The positive counterpart of a term printed after ` - `.
fn negated(term: &Expr) -> Option<Expr> {
    match term {
        Expr::Num(v) if *v < 0.0 => Some(Expr::Num(-v)),
        Expr::Literal { text, value } if text.starts_with('-') => Some(Expr::Literal {
            text: text[1..].to_string(),
            value: -value,
        }),
        Expr::Mul(fs) => {
            let first = fs.first()?;
            let positive = negated(first)?;
            let mut rest: Vec<Expr> = fs[1..].to_vec();
            if positive.numeric_value() != Some(1.0) {
                rest.insert(0, positive);
            }
            Some(match rest.len() {
                1 => rest.pop()?,
                _ => Expr::Mul(rest),
            })
        }
        _ => None,
    }
}

fn write_product(fs: &[Expr], syntax: Syntax, out: &mut String) {
    let (numer, denom): (Vec<&Expr>, Vec<&Expr>) = fs
        .iter()
        .partition(|f| !matches!(f, Expr::Pow(_, e) if e.as_num() == Some(-1.0)));

    let mut numer = numer.into_iter().peekable();
    let mut wrote_numer = false;
    if let Some(first) = numer.peek() {
        if first.numeric_value() == Some(-1.0) && is_negative_const(first) {
            out.push('-');
            numer.next();
        }
    }
    for (i, f) in numer.enumerate() {
        if i > 0 {
            out.push('*');
        }
        let min = if i == 0 { PREC_UNARY } else { PREC_POW };
        f.write(syntax, min, out);
        wrote_numer = true;
    }
    if !wrote_numer {
        out.push_str(if syntax == Syntax::C { "1.0" } else { "1" });
    }
    for d in denom {
        if let Expr::Pow(b, _) = d {
            out.push('/');
            b.write(syntax, PREC_POW.max(PREC_UNARY + 1), out);
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.print(Syntax::Human))
    }
}

/// Expressions serialize as their human-readable text.
impl Serialize for Expr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.print(Syntax::Human))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
