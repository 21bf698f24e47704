// error.rs — Engine error taxonomy
//
// Every error is raised at the earliest point it can be detected: graph
// construction, schedule validation, or bounds inference. Once a validated
// schedule reaches the simulator nothing can fail except cancellation.

use std::fmt;

use thiserror::Error;

use crate::region::Region;

/// Engine result type.
pub type Result<T> = std::result::Result<T, Error>;

/// A cycle in the producer relation. `path` starts and ends at the same stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("producer cycle: {}", .path.join(" -> "))]
pub struct GraphCycleError {
    pub path: Vec<String>,
}

/// Stage-graph construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error(transparent)]
    Cycle(#[from] GraphCycleError),

    #[error("stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("unknown stage handle {0}")]
    UnknownHandle(u32),

    #[error("stage '{0}' is defined more than once")]
    Redefined(String),

    #[error("stage '{0}' was declared but never defined")]
    Undefined(String),

    #[error("stage '{stage}' has duplicate loop variable '{var}'")]
    DuplicateVar { stage: String, var: String },

    #[error("{consumer} reads {producer} with a {kind} footprint: {detail}")]
    FootprintRank {
        consumer: String,
        producer: String,
        kind: &'static str,
        detail: String,
    },

    #[error("{consumer} reads {producer} with a {kind} footprint, but '{producer}' has no valid domain")]
    UnboundedFootprint {
        consumer: String,
        producer: String,
        kind: &'static str,
    },

    #[error("domain {domain} of stage '{stage}' has rank {}, stage has {expected} dimensions", .domain.rank())]
    DomainRank {
        stage: String,
        domain: Region,
        expected: usize,
    },
}

impl GraphError {
    /// The stage whose declaration or definition is at fault.
    pub fn stage(&self) -> Option<&str> {
        match self {
            GraphError::Cycle(c) => c.path.first().map(String::as_str),
            GraphError::DuplicateStage(s) | GraphError::Redefined(s) | GraphError::Undefined(s) => {
                Some(s)
            }
            GraphError::UnknownHandle(_) => None,
            GraphError::DuplicateVar { stage, .. } | GraphError::DomainRank { stage, .. } => {
                Some(stage)
            }
            GraphError::FootprintRank { consumer, .. }
            | GraphError::UnboundedFootprint { consumer, .. } => Some(consumer),
        }
    }
}

/// Schedule validation errors. Raised by `ScheduleBuilder::build` and by the
/// per-run checks in bounds inference, never by the simulator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleValidationError {
    #[error("schedule names unknown stage '{0}'")]
    UnknownStage(String),

    #[error("input stage '{0}' cannot be scheduled; inputs are supplied externally")]
    InputScheduled(String),

    #[error("'{stage}' is computed at '{consumer}', which does not consume it")]
    NotAConsumer { stage: String, consumer: String },

    #[error("'{stage}' is computed at '{consumer}', which is inlined and has no loops")]
    InlineTarget { stage: String, consumer: String },

    #[error("'{stage}' is computed at {consumer}.{var}, but '{consumer}' has no loop '{var}' (loops: {})", .loops.join(", "))]
    UnknownLoopLevel {
        stage: String,
        consumer: String,
        var: String,
        loops: Vec<String>,
    },

    #[error("'{stage}' is computed at {consumer}.{var}, but '{user}' uses it outside that loop")]
    UseOutsideLevel {
        stage: String,
        consumer: String,
        var: String,
        user: String,
    },

    #[error("'{stage}': split of '{var}' by non-positive factor {factor}")]
    NonPositiveFactor {
        stage: String,
        var: String,
        factor: i64,
    },

    #[error("'{stage}': no loop named '{var}'")]
    UnknownVar { stage: String, var: String },

    #[error("'{stage}': loop name '{var}' is already in use")]
    VarInUse { stage: String, var: String },

    #[error("'{stage}': reorder lists '{var}' more than once")]
    DuplicateReorder { stage: String, var: String },

    #[error("'{stage}': cannot fuse '{outer}' and '{inner}'; '{outer}' must directly enclose '{inner}'")]
    FuseNotAdjacent {
        stage: String,
        outer: String,
        inner: String,
    },

    #[error("'{stage}': loop '{var}' is already marked {existing}")]
    AlreadyMarked {
        stage: String,
        var: String,
        existing: String,
    },

    #[error("'{stage}': vectorize/unroll width must be positive, got {width}")]
    NonPositiveWidth { stage: String, width: i64 },

    #[error("footprint of {consumer} on {producer} is not monotonic: {smaller} maps outside the image of {larger}")]
    NonMonotonicFootprint {
        consumer: String,
        producer: String,
        smaller: Region,
        larger: Region,
    },
}

impl ScheduleValidationError {
    /// The stage whose schedule is at fault.
    pub fn stage(&self) -> &str {
        use ScheduleValidationError::*;
        match self {
            UnknownStage(s) | InputScheduled(s) => s,
            NotAConsumer { stage, .. }
            | InlineTarget { stage, .. }
            | UnknownLoopLevel { stage, .. }
            | UseOutsideLevel { stage, .. }
            | NonPositiveFactor { stage, .. }
            | UnknownVar { stage, .. }
            | VarInUse { stage, .. }
            | DuplicateReorder { stage, .. }
            | FuseNotAdjacent { stage, .. }
            | AlreadyMarked { stage, .. }
            | NonPositiveWidth { stage, .. } => stage,
            NonMonotonicFootprint { consumer, .. } => consumer,
        }
    }
}

/// Per-dimension overshoot of a required region past an input's valid domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overshoot(pub Vec<(u64, u64)>);

impl fmt::Display for Overshoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (below, above)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "d{}: -{}/+{}", i, below, above)?;
        }
        Ok(())
    }
}

/// An inferred region of an input stage exceeds its declared valid domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("input '{stage}' is required over {required}, outside its valid domain {domain} (overshoot {overshoot}); insert a clamping stage if out-of-domain access is intended")]
pub struct OutOfBoundsError {
    pub stage: String,
    pub required: Region,
    pub domain: Region,
    pub overshoot: Overshoot,
}

/// Top-level engine error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Schedule(#[from] ScheduleValidationError),

    #[error(transparent)]
    OutOfBounds(#[from] OutOfBoundsError),

    #[error("no stage named '{0}'")]
    UnknownOutput(String),

    #[error("'{stage}' is realized over a rank-{got} region but has {expected} dimensions")]
    OutputRank {
        stage: String,
        expected: usize,
        got: usize,
    },

    #[error("input '{0}' cannot be realized; it has no definition")]
    RealizeInput(String),

    #[error("run cancelled after {completed} root realizations")]
    Cancelled { completed: usize },
}

impl From<GraphCycleError> for Error {
    fn from(e: GraphCycleError) -> Self {
        Error::Graph(GraphError::Cycle(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_names_full_path() {
        let e = GraphCycleError {
            path: vec!["a".into(), "b".into(), "c".into(), "a".into()],
        };
        assert_eq!(e.to_string(), "producer cycle: a -> b -> c -> a");
        let top: Error = e.into();
        assert!(top.to_string().contains("a -> b -> c -> a"));
    }

    #[test]
    fn out_of_bounds_names_stage_and_overshoot() {
        let e = OutOfBoundsError {
            stage: "input".into(),
            required: Region::half_open(&[(0, 6), (-1, 4)]),
            domain: Region::half_open(&[(0, 4), (0, 4)]),
            overshoot: Overshoot(vec![(0, 2), (1, 0)]),
        };
        let msg = e.to_string();
        assert!(msg.contains("'input'"));
        assert!(msg.contains("d0: -0/+2, d1: -1/+0"));
    }
}
