// block.rs — Block segmentation and dependency analysis
//
// Splits captured statements into maximal runs of one kind (plain assignment
// or time derivative) without reordering, and records the attributes each
// run reads.
//
// Preconditions: statements come from capture sessions of one entity method.
// Postconditions: concatenating the blocks' statements yields the input order;
//                 no block spans a capture-context boundary.
// Failure modes: lowering an ODE block may fail with `LoweringError`.
// Side effects: none.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::capture::{CaptureSession, CapturedStatement};
use crate::error::LoweringError;
use crate::method::{NumericalMethod, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "method", rename_all = "snake_case")]
pub enum BlockKind {
    Assignment,
    Ode(NumericalMethod),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    pub statements: Vec<CapturedStatement>,
    /// Declared attributes read by the block (`pre.x`/`post.x` included).
    /// Reporting only; never used to reorder.
    pub dependencies: BTreeSet<String>,
}

impl Block {
    fn open(kind: BlockKind) -> Self {
        Block {
            kind,
            statements: Vec::new(),
            dependencies: BTreeSet::new(),
        }
    }

    fn push(&mut self, stmt: CapturedStatement) {
        self.dependencies.extend(
            stmt.expr
                .free_symbols()
                .into_iter()
                .filter(|s| is_attribute_symbol(s)),
        );
        self.statements.push(stmt);
    }

    pub fn is_ode(&self) -> bool {
        matches!(self.kind, BlockKind::Ode(_))
    }

    /// First variable with more than one equation in this ODE block.
    pub fn repeated_variable(&self) -> Option<&str> {
        let mut seen = BTreeSet::new();
        self.statements
            .iter()
            .filter_map(CapturedStatement::ode_variable)
            .find(|var| !seen.insert(*var))
    }

    /// Ordered steps implementing the block.
    pub fn lower(&self) -> Result<Vec<Step>, LoweringError> {
        match self.kind {
            BlockKind::Assignment => Ok(self
                .statements
                .iter()
                .map(|s| Step::assign(&s.target, s.expr.clone()))
                .collect()),
            BlockKind::Ode(method) => {
                let equations: Vec<(String, _)> = self
                    .statements
                    .iter()
                    .filter_map(|s| Some((s.ode_variable()?.to_string(), s.expr.clone())))
                    .collect();
                method.lower(&equations)
            }
        }
    }
}

/// Excludes `t`, `dt`, temporaries and random draws.
fn is_attribute_symbol(name: &str) -> bool {
    name != "t" && name != "dt" && !name.starts_with('_')
}

/// Segment the statements of successive capture sessions into blocks.
pub fn segment(sessions: &[CaptureSession]) -> Vec<Block> {
    let mut blocks = Vec::new();
    for session in sessions {
        let mut current: Option<Block> = None;
        for stmt in &session.statements {
            let kind = if stmt.is_ode() {
                BlockKind::Ode(session.numerical)
            } else {
                BlockKind::Assignment
            };
            match current.as_mut() {
                Some(block) if block.kind == kind => block.push(stmt.clone()),
                _ => {
                    blocks.extend(current.take());
                    let mut block = Block::open(kind);
                    block.push(stmt.clone());
                    current = Some(block);
                }
            }
        }
        // Context boundary closes the open run.
        blocks.extend(current);
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{num, sym};

    fn stmt(target: &str, expr: crate::expr::Expr) -> CapturedStatement {
        CapturedStatement {
            target: target.to_string(),
            expr,
        }
    }

    fn session(numerical: NumericalMethod, statements: Vec<CapturedStatement>) -> CaptureSession {
        CaptureSession {
            numerical,
            statements,
        }
    }

    #[test]
    fn interleaved_kinds_give_four_blocks() {
        let s = session(
            NumericalMethod::Midpoint,
            vec![
                stmt("a", sym("x") + num(1.0)),
                stmt("dx_dt", -sym("y")),
                stmt("dy_dt", sym("x")),
                stmt("b", sym("a")),
                stmt("dz_dt", -sym("z") / sym("tau")),
            ],
        );
        let blocks = segment(&[s]);
        let shape: Vec<(BlockKind, Vec<&str>)> = blocks
            .iter()
            .map(|b| {
                (
                    b.kind,
                    b.statements.iter().map(|s| s.target.as_str()).collect(),
                )
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                (BlockKind::Assignment, vec!["a"]),
                (BlockKind::Ode(NumericalMethod::Midpoint), vec!["dx_dt", "dy_dt"]),
                (BlockKind::Assignment, vec!["b"]),
                (BlockKind::Ode(NumericalMethod::Midpoint), vec!["dz_dt"]),
            ]
        );
    }

    #[test]
    fn sessions_never_merge() {
        let first = session(NumericalMethod::Euler, vec![stmt("dv_dt", -sym("v"))]);
        let second = session(NumericalMethod::Euler, vec![stmt("du_dt", -sym("u"))]);
        let blocks = segment(&[first, second]);
        assert_eq!(blocks.len(), 2);
        assert!(blocks.iter().all(Block::is_ode));
    }

    #[test]
    fn homogeneous_run_is_one_block() {
        let s = session(
            NumericalMethod::Euler,
            vec![stmt("a", num(1.0)), stmt("b", num(2.0)), stmt("c", num(3.0))],
        );
        let blocks = segment(&[s]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].statements.len(), 3);
    }

    #[test]
    fn dependencies_skip_builtins_and_draws() {
        let s = session(
            NumericalMethod::Euler,
            vec![stmt(
                "dv_dt",
                (sym("I") - sym("v")) / sym("tau") + sym("_rand_0") * sym("t") + sym("pre.r"),
            )],
        );
        let blocks = segment(&[s]);
        let deps: Vec<&str> = blocks[0].dependencies.iter().map(String::as_str).collect();
        assert_eq!(deps, vec!["I", "pre.r", "tau", "v"]);
    }

    #[test]
    fn repeated_variable_within_one_block() {
        let s = session(
            NumericalMethod::Euler,
            vec![
                stmt("dv_dt", -sym("v")),
                stmt("du_dt", -sym("u")),
                stmt("dv_dt", num(1.0)),
            ],
        );
        let blocks = segment(&[s]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].repeated_variable(), Some("v"));

        // Separated by an assignment: two blocks, each with distinct targets.
        let s = session(
            NumericalMethod::Euler,
            vec![stmt("dv_dt", -sym("v")), stmt("r", sym("v")), stmt("dv_dt", num(1.0))],
        );
        let blocks = segment(&[s]);
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.repeated_variable().is_none()));
    }

    #[test]
    fn empty_input_gives_no_blocks() {
        assert!(segment(&[]).is_empty());
        assert!(segment(&[session(NumericalMethod::Rk4, Vec::new())]).is_empty());
    }

    #[test]
    fn assignment_block_lowers_verbatim() {
        let s = session(NumericalMethod::Euler, vec![stmt("r", sym("v") * num(2.0))]);
        let steps = segment(&[s])[0].lower().unwrap();
        assert_eq!(steps, vec![Step::assign("r", num(2.0) * sym("v"))]);
    }
}
