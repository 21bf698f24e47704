// cost.rs — Analytic cost model
//
// Counts element evaluations per stage from the event stream and compares
// them with the baseline: the same realize call with every computed stage at
// root, which computes each required element exactly once.
//
// Preconditions: events and bounds come from the same realize call.
// Postconditions: an all-root schedule reports a redundancy factor of 1.
// Failure modes: baseline inference can fail like any inference.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::bounds::{infer, RequiredRegionMap};
use crate::error::Result;
use crate::graph::Pipeline;
use crate::id::{Generation, StageId};
use crate::region::Region;
use crate::schedule::Schedule;
use crate::simulate::{EvaluationEvent, EventSink};

// ── Baseline ────────────────────────────────────────────────────────────────

/// Per-stage element counts of the all-root schedule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Baseline {
    elements: BTreeMap<StageId, u64>,
}

impl Baseline {
    pub fn compute(pipeline: &Pipeline, output: StageId, region: &Region) -> Result<Self> {
        let bounds = infer(pipeline, &Schedule::all_root(pipeline), output, region)?;
        let elements = bounds
            .iter()
            .filter(|b| !pipeline.stage(b.stage).is_input())
            .map(|b| (b.stage, b.required.volume()))
            .collect();
        Ok(Baseline { elements })
    }

    pub fn elements(&self, id: StageId) -> u64 {
        self.elements.get(&id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.elements.values().sum()
    }
}

// ── Accumulator ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct Tally {
    elements: u64,
    issue: f64,
    parallel: u64,
    generations: BTreeSet<Generation>,
}

/// An event sink that keeps only per-stage totals.
#[derive(Debug, Clone, Default)]
pub struct CostAccumulator {
    tallies: BTreeMap<StageId, Tally>,
}

impl EventSink for CostAccumulator {
    fn record(&mut self, event: EvaluationEvent) {
        self.add(&event);
    }
}

impl CostAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, event: &EvaluationEvent) {
        let t = self.tallies.entry(event.stage).or_default();
        t.elements += 1;
        t.issue += 1.0 / f64::from(event.lanes.max(1));
        if event.parallel {
            t.parallel += 1;
        }
        if let Some(g) = event.generation {
            t.generations.insert(g);
        }
    }

    pub fn elements(&self, id: StageId) -> u64 {
        self.tallies.get(&id).map_or(0, |t| t.elements)
    }

    /// Report over the computed stages of the run, in topological order.
    pub fn report(
        &self,
        pipeline: &Pipeline,
        bounds: &RequiredRegionMap,
        baseline: &Baseline,
    ) -> CostReport {
        let mut stages = Vec::new();
        for id in bounds.placements().live_topo(pipeline) {
            if pipeline.stage(id).is_input() {
                continue;
            }
            let tally = self.tallies.get(&id).cloned().unwrap_or_default();
            let base = baseline.elements(id);
            let granularity = bounds
                .get(id)
                .map(|b| b.placement.describe(pipeline))
                .unwrap_or_default();
            stages.push(StageCost {
                stage: pipeline.name(id).to_string(),
                granularity,
                elements: tally.elements,
                baseline: base,
                redundancy: ratio(tally.elements, base),
                issue_estimate: tally.issue,
                parallel_elements: tally.parallel,
                generations: tally.generations.len(),
            });
        }

        let total_elements = stages.iter().map(|s| s.elements).sum();
        let baseline_total = baseline.total();
        CostReport {
            output: pipeline.name(bounds.output).to_string(),
            region: bounds.output_region.clone(),
            total_elements,
            baseline_total,
            redundancy_factor: ratio(total_elements, baseline_total),
            issue_estimate: stages.iter().map(|s| s.issue_estimate).sum(),
            stages,
        }
    }
}

/// Cost of an already collected event sequence.
pub fn cost(
    pipeline: &Pipeline,
    events: &[EvaluationEvent],
    bounds: &RequiredRegionMap,
    baseline: &Baseline,
) -> CostReport {
    let mut acc = CostAccumulator::new();
    for e in events {
        acc.add(e);
    }
    acc.report(pipeline, bounds, baseline)
}

fn ratio(actual: u64, baseline: u64) -> f64 {
    match (actual, baseline) {
        (0, 0) => 1.0,
        (_, 0) => f64::INFINITY,
        _ => actual as f64 / baseline as f64,
    }
}

// ── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageCost {
    pub stage: String,
    pub granularity: String,
    pub elements: u64,
    /// Elements computed by the all-root schedule.
    pub baseline: u64,
    pub redundancy: f64,
    /// Σ 1/lanes: element count with vectorized elements charged per vector.
    /// A vector never has more lanes than its loop's extent.
    pub issue_estimate: f64,
    pub parallel_elements: u64,
    /// Distinct storage generations (stored realizations) observed.
    pub generations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostReport {
    pub output: String,
    pub region: Region,
    pub stages: Vec<StageCost>,
    pub total_elements: u64,
    pub baseline_total: u64,
    pub redundancy_factor: f64,
    pub issue_estimate: f64,
}

impl CostReport {
    pub fn stage(&self, name: &str) -> Option<&StageCost> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

impl fmt::Display for CostReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cost of {} over {}", self.output, self.region)?;
        writeln!(
            f,
            "  {:<12} {:<26} {:>9} {:>9} {:>6} {:>9}",
            "stage", "granularity", "elements", "baseline", "ratio", "issue"
        )?;
        for s in &self.stages {
            writeln!(
                f,
                "  {:<12} {:<26} {:>9} {:>9} {:>6.2} {:>9.1}",
                s.stage, s.granularity, s.elements, s.baseline, s.redundancy, s.issue_estimate
            )?;
        }
        writeln!(
            f,
            "  {:<12} {:<26} {:>9} {:>9} {:>6.2} {:>9.1}",
            "total",
            "",
            self.total_elements,
            self.baseline_total,
            self.redundancy_factor,
            self.issue_estimate
        )
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
