// psim — Pipeline Schedule Simulator
//
// Library root. Engine modules (region → graph → schedule → bounds →
// simulate → cost) followed by the `.psl` front end and the driver.

pub mod ast;
pub mod bounds;
pub mod cost;
pub mod diag;
pub mod dot;
pub mod driver;
pub mod elaborate;
pub mod error;
pub mod footprint;
pub mod graph;
pub mod id;
pub mod lexer;
pub mod nest;
pub mod parser;
pub mod pass;
pub mod region;
pub mod render;
pub mod schedule;
pub mod simulate;

pub use bounds::{infer, RequiredRegionMap};
pub use cost::{cost, Baseline, CostAccumulator, CostReport};
pub use error::{Error, Result};
pub use footprint::{Footprint, FootprintFn};
pub use graph::{Pipeline, PipelineBuilder};
pub use id::StageId;
pub use region::{Interval, Region};
pub use schedule::{Placement, Schedule, ScheduleBuilder};
pub use simulate::{simulate, simulate_into, CancelFlag, EvaluationEvent, EventSink};
