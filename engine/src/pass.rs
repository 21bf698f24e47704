// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the engine's passes (parse is outside the runner), their
// dependency edges, and the artifacts they produce. Used by the driver to
// compute minimal pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each pass (parse is handled before the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassId {
    Elaborate,
    Validate,
    Infer,
    Simulate,
    Cost,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Pipeline, // Pipeline
    Requests, // Vec<RealizeRequest>
    Schedule, // Schedule
    Bounds,   // RequiredRegionMap per request
    Events,   // Vec<EvaluationEvent> per request
    Cost,     // CostReport per request
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces.
    pub outputs: &'static [ArtifactId],
    /// Postconditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Elaborate => PassDescriptor {
            name: "elaborate",
            inputs: &[],
            outputs: &[ArtifactId::Pipeline, ArtifactId::Requests],
            invariants: "names resolved, pipeline acyclic, requests rank-checked",
        },
        PassId::Validate => PassDescriptor {
            name: "validate",
            inputs: &[PassId::Elaborate],
            outputs: &[ArtifactId::Schedule],
            invariants: "schedule valid for every possible output",
        },
        PassId::Infer => PassDescriptor {
            name: "infer",
            inputs: &[PassId::Validate],
            outputs: &[ArtifactId::Bounds],
            invariants: "every live stage bounded, inputs within their domains",
        },
        PassId::Simulate => PassDescriptor {
            name: "simulate",
            inputs: &[PassId::Infer],
            outputs: &[ArtifactId::Events],
            invariants: "events cover every realization in serial order",
        },
        // Cost streams its own simulation when events were not kept.
        PassId::Cost => PassDescriptor {
            name: "cost",
            inputs: &[PassId::Infer],
            outputs: &[ArtifactId::Cost],
            invariants: "all-root schedules report a redundancy factor of 1",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 5] = [
    PassId::Elaborate,
    PassId::Validate,
    PassId::Infer,
    PassId::Simulate,
    PassId::Cost,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    required_for(&[terminal])
}

/// Minimal ordered set of passes producing every pass in `terminals`.
pub fn required_for(terminals: &[PassId]) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    for &t in terminals {
        visit(t, &mut visited, &mut order);
    }
    order.sort();
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
    fn required_passes_infer() {
        assert_eq!(
            required_passes(PassId::Infer),
            vec![PassId::Elaborate, PassId::Validate, PassId::Infer]
        );
    }

    #[test]
    fn cost_skips_simulate() {
        let passes = required_passes(PassId::Cost);
        assert!(!passes.contains(&PassId::Simulate));
        assert_eq!(passes.last(), Some(&PassId::Cost));
    }

    #[test]
    fn several_terminals_merge_in_execution_order() {
        assert_eq!(
            required_for(&[PassId::Cost, PassId::Simulate]),
            ALL_PASSES.to_vec()
        );
    }

    #[test]
    fn elaborate_is_minimal() {
        assert_eq!(required_passes(PassId::Elaborate), vec![PassId::Elaborate]);
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
            let order = required_passes(*pass);
            let self_pos = order.iter().position(|p| p == pass).unwrap();
            for dep in descriptor(*pass).inputs {
                let dep_pos = order.iter().position(|p| p == dep).unwrap();
                assert!(
                    dep_pos < self_pos,
                    "{:?} depends on {:?} but it comes later in execution order",
                    pass,
                    dep
                );
            }
        }
    }
}
