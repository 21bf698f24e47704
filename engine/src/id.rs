// id.rs — Stable identifiers shared by every phase
//
// Stage ids are allocated in declaration order by the pipeline builder, so
// sorting by id reproduces declaration order (the topological tie-breaker).
// Generation ids are allocated in simulation order.

use std::fmt;

use serde::Serialize;

/// Identifier of a stage within one `Pipeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StageId(pub u32);

impl StageId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Storage generation: one per stored realization of a stage in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Generation(pub u32);

/// Allocator for ids. Produces monotonically increasing ids in allocation
/// order, ensuring deterministic assignment.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_stage: u32,
    next_generation: u32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_stage(&mut self) -> StageId {
        let id = StageId(self.next_stage);
        self.next_stage += 1;
        id
    }

    /// Hand `id` back; it must be the last stage allocated.
    pub fn release_stage(&mut self, id: StageId) {
        if id.0 + 1 == self.next_stage {
            self.next_stage = id.0;
        }
    }

    pub fn alloc_generation(&mut self) -> Generation {
        let id = Generation(self.next_generation);
        self.next_generation += 1;
        id
    }

    /// Number of generations handed out so far.
    pub fn generations(&self) -> u32 {
        self.next_generation
    }
}
