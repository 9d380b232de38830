// method.rs — Numerical integration schemes for ODE blocks
//
// Lowers a block of simultaneous equations `dX/dt = f_X` into an ordered list
// of steps (temporaries, then state updates). Every scheme evaluates all
// right-hand sides against the state as it was before the block, so equations
// of one block never observe each other's updates.
//
// Preconditions: each equation names a distinct variable.
// Postconditions: temporaries (`_k_X`, `_k1_X`, `_p2_X`, ...) are assigned
//                 before any state variable of the block is written.
// Failure modes: exponential integration of a non-affine equation → `LoweringError`.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{DefinitionError, LoweringError};
use crate::expr::{self, Expr, Func};

// ── Scheme selection ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericalMethod {
    /// Explicit (forward) Euler.
    #[default]
    Euler,
    /// Exponential Euler, exact for linear decay with constant coefficients.
    Exponential,
    /// Explicit midpoint (RK2).
    Midpoint,
    /// Classical fourth-order Runge-Kutta.
    Rk4,
}

impl NumericalMethod {
    pub fn name(self) -> &'static str {
        match self {
            NumericalMethod::Euler => "euler",
            NumericalMethod::Exponential => "exponential",
            NumericalMethod::Midpoint => "midpoint",
            NumericalMethod::Rk4 => "rk4",
        }
    }

    /// Lower one ODE block. `equations` pairs each variable with its derivative.
    pub fn lower(self, equations: &[(String, Expr)]) -> Result<Vec<Step>, LoweringError> {
        match self {
            NumericalMethod::Euler => Ok(euler(equations)),
            NumericalMethod::Exponential => exponential(equations),
            NumericalMethod::Midpoint => Ok(midpoint(equations)),
            NumericalMethod::Rk4 => Ok(rk4(equations)),
        }
    }
}

impl FromStr for NumericalMethod {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "euler" | "explicit" => Ok(NumericalMethod::Euler),
            "exponential" => Ok(NumericalMethod::Exponential),
            "midpoint" | "rk2" => Ok(NumericalMethod::Midpoint),
            "rk4" => Ok(NumericalMethod::Rk4),
            _ => Err(DefinitionError::UnknownMethod { name: s.to_string() }),
        }
    }
}

impl fmt::Display for NumericalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Steps ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepOp {
    Set,
    AddAssign,
}

impl StepOp {
    pub fn symbol(self) -> &'static str {
        match self {
            StepOp::Set => "=",
            StepOp::AddAssign => "+=",
        }
    }
}

/// One lowered statement: `target op rhs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub target: String,
    /// Local temporary (declared in the element loop), not an attribute.
    pub temporary: bool,
    pub op: StepOp,
    pub rhs: Expr,
}

impl Step {
    pub fn temp(target: impl Into<String>, rhs: Expr) -> Self {
        Step {
            target: target.into(),
            temporary: true,
            op: StepOp::Set,
            rhs,
        }
    }

    pub fn assign(target: impl Into<String>, rhs: Expr) -> Self {
        Step {
            target: target.into(),
            temporary: false,
            op: StepOp::Set,
            rhs,
        }
    }

    pub fn increment(target: impl Into<String>, rhs: Expr) -> Self {
        Step {
            target: target.into(),
            temporary: false,
            op: StepOp::AddAssign,
            rhs,
        }
    }

    /// `target op rhs` with the rhs in re-parseable form.
    pub fn human_readable(&self) -> String {
        format!(
            "{} {} {}",
            self.target,
            self.op.symbol(),
            crate::render::human_readable(&self.rhs)
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.human_readable())
    }
}

// ── Schemes ─────────────────────────────────────────────────────────────────

fn dt() -> Expr {
    expr::sym("dt")
}

fn temp_name(stage: &str, var: &str) -> String {
    format!("_{stage}_{var}")
}

/// Substitute every block variable by its stage temporary.
fn stage_map(equations: &[(String, Expr)], stage: &str) -> HashMap<String, Expr> {
    equations
        .iter()
        .map(|(var, _)| (var.clone(), expr::sym(temp_name(stage, var))))
        .collect()
}

fn euler(equations: &[(String, Expr)]) -> Vec<Step> {
    if let [(var, f)] = equations {
        return vec![Step::increment(var, dt() * f.clone())];
    }
    let mut steps: Vec<Step> = equations
        .iter()
        .map(|(var, f)| Step::temp(temp_name("k", var), f.clone()))
        .collect();
    steps.extend(
        equations
            .iter()
            .map(|(var, _)| Step::increment(var, dt() * expr::sym(temp_name("k", var)))),
    );
    steps
}

fn exponential(equations: &[(String, Expr)]) -> Result<Vec<Step>, LoweringError> {
    let mut temps = Vec::with_capacity(equations.len());
    let mut updates = Vec::with_capacity(equations.len());
    for (var, f) in equations {
        let (coef, rest) = f.affine_in(var).ok_or_else(|| LoweringError::NotAffine {
            variable: var.clone(),
            equation: f.to_string(),
        })?;
        if coef.as_num() == Some(0.0) {
            return Err(LoweringError::NoDecay {
                variable: var.clone(),
                equation: f.to_string(),
            });
        }
        // f = (A - X)/tau  ⇒  coef = -1/tau, rest = A/tau
        let tau = expr::inv(-coef);
        let steady = (tau.clone() * rest).expand();
        let step_size = expr::num(1.0) - expr::call(Func::Exp, vec![-(dt() / tau)]);
        let x = expr::sym(var.clone());
        let name = temp_name("k", var);
        temps.push(Step::temp(&name, x.clone() + step_size * (steady - x)));
        updates.push(Step::assign(var, expr::sym(name)));
    }
    temps.extend(updates);
    Ok(temps)
}

fn midpoint(equations: &[(String, Expr)]) -> Vec<Step> {
    let half = stage_map(equations, "k1");
    let mut steps: Vec<Step> = equations
        .iter()
        .map(|(var, f)| {
            Step::temp(
                temp_name("k1", var),
                expr::sym(var.clone()) + dt() * f.clone() / expr::num(2.0),
            )
        })
        .collect();
    steps.extend(
        equations
            .iter()
            .map(|(var, f)| Step::increment(var, dt() * f.subs(&half))),
    );
    steps
}

fn rk4(equations: &[(String, Expr)]) -> Vec<Step> {
    let mut steps = Vec::new();
    let p2 = stage_map(equations, "p2");
    let p3 = stage_map(equations, "p3");
    let p4 = stage_map(equations, "p4");

    // k_n = f(p_n), p_{n+1} = X + h * k_n; p_1 is the current state.
    let stages: [(&str, Option<&HashMap<String, Expr>>, &str, f64); 4] = [
        ("k1", None, "p2", 0.5),
        ("k2", Some(&p2), "p3", 0.5),
        ("k3", Some(&p3), "p4", 1.0),
        ("k4", Some(&p4), "", 0.0),
    ];

    for (k, input, p_next, h) in stages {
        for (var, f) in equations {
            let rhs = match input {
                Some(map) => f.subs(map),
                None => f.clone(),
            };
            steps.push(Step::temp(temp_name(k, var), rhs));
        }
        if p_next.is_empty() {
            continue;
        }
        for (var, _) in equations {
            let x = expr::sym(var.clone());
            let k_sym = expr::sym(temp_name(k, var));
            steps.push(Step::temp(
                temp_name(p_next, var),
                x + expr::num(h) * dt() * k_sym,
            ));
        }
    }

    for (var, _) in equations {
        let k = |stage: &str| expr::sym(temp_name(stage, var));
        let weighted = k("k1") + expr::num(2.0) * k("k2") + expr::num(2.0) * k("k3") + k("k4");
        steps.push(Step::increment(var, dt() * weighted / expr::num(6.0)));
    }
    steps
}

// ── Tests ───────────────────────────────────────────────────────────────────
