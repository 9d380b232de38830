// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the compiler's passes (parse is outside the runner), their
// dependency edges, and the artifacts they produce. Used by the pipeline
// runner to compute the minimal pass subset for each --emit target.
//
// Preconditions: none (static tables).
// Postconditions: `required_passes` returns a topological order.
// Failure modes: none.
// Side effects: none.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each compiler pass. Parsing runs before the pass runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Resolve,
    Extract,
    Analyse,
    Generate,
}

/// Machine-readable artifact identifiers. Each maps to a field of the
/// compilation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Definitions, // Vec<EntityDef>
    Descriptors, // Vec<EntityDescriptor>
    Analyses,    // Vec<EntityAnalysis>
    Generated,   // Vec<GeneratedEntity>
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a compiler pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// What invalidates this pass's output.
    pub invalidation_key: &'static str,
    /// Postconditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Resolve => PassDescriptor {
            name: "resolve",
            inputs: &[],
            outputs: &[ArtifactId::Definitions],
            invalidation_key: "source",
            invariants: "targets valid, symbols declared, method tags known",
        },
        PassId::Extract => PassDescriptor {
            name: "extract",
            inputs: &[PassId::Resolve],
            outputs: &[ArtifactId::Descriptors],
            invalidation_key: "attribute declarations",
            invariants: "attribute lists final before any equation is captured",
        },
        PassId::Analyse => PassDescriptor {
            name: "analyse",
            inputs: &[PassId::Extract],
            outputs: &[ArtifactId::Analyses],
            invalidation_key: "descriptors + method bodies",
            invariants: "blocks segmented and lowered; one condition per spiking neuron",
        },
        PassId::Generate => PassDescriptor {
            name: "generate",
            inputs: &[PassId::Analyse],
            outputs: &[ArtifactId::Generated],
            invalidation_key: "analyses + codegen options",
            invariants: "every symbol resolved through the class's correspondence table",
        },
    }
}

/// All pass IDs in canonical order (useful for iteration in tests).
pub const ALL_PASSES: [PassId; 4] = [
    PassId::Resolve,
    PassId::Extract,
    PassId::Analyse,
    PassId::Generate,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_passes_generate_includes_all() {
        assert_eq!(required_passes(PassId::Generate), ALL_PASSES.to_vec());
    }

    #[test]
    fn required_passes_extract_skips_analysis() {
        let passes = required_passes(PassId::Extract);
        assert_eq!(passes, vec![PassId::Resolve, PassId::Extract]);
        assert!(!passes.contains(&PassId::Analyse));
    }

    #[test]
    fn required_passes_resolve_is_minimal() {
        assert_eq!(required_passes(PassId::Resolve), vec![PassId::Resolve]);
    }

    #[test]
    fn no_parse_in_pass_id() {
        for pass in &ALL_PASSES {
            assert_ne!(descriptor(*pass).name, "parse");
        }
    }

    #[test]
    fn all_descriptors_have_outputs() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            assert!(
                !desc.outputs.is_empty(),
                "pass {:?} has no outputs declared",
                pass
            );
        }
    }

    #[test]
    fn dependency_edges_are_consistent() {
        for pass in &ALL_PASSES {
            let desc = descriptor(*pass);
            let order = required_passes(*pass);
            for dep in desc.inputs {
                let dep_pos = order.iter().position(|p| p == dep);
                let self_pos = order.iter().position(|p| p == pass);
                assert!(
                    dep_pos.unwrap() < self_pos.unwrap(),
                    "{:?} depends on {:?} but it comes later in topological order",
                    pass,
                    dep
                );
            }
        }
    }
}
