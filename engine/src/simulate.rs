// simulate.rs — Evaluation-order simulator
//
// Replays a realize call serially and emits one event per element computed,
// in the order a serial execution of the schedule computes them:
//
//   1. root stages, each once, in topological order
//   2. the realized stage's loops, depth first
//
// While walking a stored stage's loops, entering a new group at loop level L
// (the outermost changed index is at or above L) triggers every stage
// computed at that level, outer levels first, producers before consumers.
// Before each element, inlined producers are evaluated for exactly the
// coordinates that element reads, recursively and without memoization.
//
// Every stored realization gets a fresh storage generation; inlined
// evaluations carry none. Parallel and vector marks only annotate events.
//
// Preconditions: `bounds` was inferred for the same pipeline and schedule.
// Postconditions: per stored stage, the events of one generation cover its
//                 realization region.
// Failure modes: cancellation between root triggers → `Error::Cancelled`.
// Side effects: events pushed into the sink; `tracing` debug events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::bounds::{infer, RealizationRef, RequiredRegionMap, Site};
use crate::error::{Error, Result};
use crate::footprint::required_region;
use crate::graph::Pipeline;
use crate::id::{Generation, IdAllocator, StageId};
use crate::region::Region;
use crate::schedule::{Placement, Schedule};

// ── Events and sinks ────────────────────────────────────────────────────────

/// One element of one stage computed once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationEvent {
    pub stage: StageId,
    pub coord: Vec<i64>,
    /// Storage generation of the realization this element lands in; `None`
    /// for inlined evaluations.
    pub generation: Option<Generation>,
    /// Vector width the element is computed with.
    pub lanes: u32,
    /// Whether any enclosing loop of the computing stage is marked parallel.
    pub parallel: bool,
}

/// Receives events as they are produced.
pub trait EventSink {
    fn record(&mut self, event: EvaluationEvent);
}

impl EventSink for Vec<EvaluationEvent> {
    fn record(&mut self, event: EvaluationEvent) {
        self.push(event);
    }
}

/// Shared flag for aborting a run between root triggers.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulateOptions {
    pub cancel: Option<CancelFlag>,
}

/// Totals of one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RunSummary {
    pub events: u64,
    pub generations: u32,
    pub root_realizations: usize,
}

// ── Public entry points ─────────────────────────────────────────────────────

/// Infer bounds and collect the full event sequence of realizing `output`
/// over `region`.
pub fn simulate(
    pipeline: &Pipeline,
    schedule: &Schedule,
    output: StageId,
    region: &Region,
) -> Result<Vec<EvaluationEvent>> {
    let bounds = infer(pipeline, schedule, output, region)?;
    let mut events = Vec::new();
    simulate_into(pipeline, schedule, &bounds, &mut events, &SimulateOptions::default())?;
    Ok(events)
}

/// Stream the events of a realize call whose bounds are already inferred.
pub fn simulate_into<S: EventSink + ?Sized>(
    pipeline: &Pipeline,
    schedule: &Schedule,
    bounds: &RequiredRegionMap,
    sink: &mut S,
    options: &SimulateOptions,
) -> Result<RunSummary> {
    let run = bounds.placements();
    let topo = pipeline.topo_rank();

    let mut children: HashMap<StageId, Vec<(usize, StageId)>> = HashMap::new();
    let mut roots = Vec::new();
    for s in run.live_topo(pipeline) {
        match run.placement(s) {
            Placement::ComputeAt {
                consumer, level, ..
            } => children.entry(*consumer).or_default().push((*level, s)),
            Placement::Root if s != bounds.output => roots.push(s),
            _ => {}
        }
    }
    for list in children.values_mut() {
        list.sort_by_key(|&(level, s)| (level, topo[&s]));
    }

    let mut group_index = HashMap::new();
    for b in bounds.iter() {
        for (index, r) in b.realizations.iter().enumerate() {
            if let Site::Within { parent, prefix, .. } = &r.site {
                group_index.insert((b.stage, *parent, prefix.clone()), index);
            }
        }
    }

    let mut sim = Simulator {
        pipeline,
        schedule,
        bounds,
        sink,
        ids: IdAllocator::new(),
        children,
        group_index,
        events: 0,
    };

    let mut completed = 0;
    for s in roots.into_iter().chain(std::iter::once(bounds.output)) {
        if options.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
            return Err(Error::Cancelled { completed });
        }
        if bounds.realizations(s).is_empty() {
            continue;
        }
        debug!(stage = %pipeline.name(s), "root trigger");
        sim.realize(RealizationRef { stage: s, index: 0 });
        completed += 1;
    }

    Ok(RunSummary {
        events: sim.events,
        generations: sim.ids.generations(),
        root_realizations: completed,
    })
}

// ── Internal context ────────────────────────────────────────────────────────

struct Simulator<'a, S: ?Sized> {
    pipeline: &'a Pipeline,
    schedule: &'a Schedule,
    bounds: &'a RequiredRegionMap,
    sink: &'a mut S,
    ids: IdAllocator,
    /// Stages computed at each consumer, as `(level, stage)` in trigger order.
    children: HashMap<StageId, Vec<(usize, StageId)>>,
    /// (stage, parent realization, group prefix) → realization index.
    group_index: HashMap<(StageId, RealizationRef, Vec<i64>), usize>,
    events: u64,
}

impl<S: EventSink + ?Sized> Simulator<'_, S> {
    fn realize(&mut self, r: RealizationRef) {
        let (bounds, schedule) = (self.bounds, self.schedule);
        let Some(realization) = bounds.realization(r) else {
            return;
        };
        let generation = self.ids.alloc_generation();
        let plan = schedule.plan(r.stage);
        let nest = plan.instantiate(&realization.region);
        let lanes = nest.lanes();
        let parallel = plan.is_parallel();
        let children = self.children.get(&r.stage).cloned().unwrap_or_default();

        let mut cursor = nest.cursor();
        while let Some(changed_from) = cursor.advance() {
            for &(level, child) in &children {
                if changed_from > level {
                    continue;
                }
                let key = (child, r, cursor.indices()[..=level].to_vec());
                if let Some(&index) = self.group_index.get(&key) {
                    self.realize(RealizationRef {
                        stage: child,
                        index,
                    });
                }
            }
            let coord = cursor.coord();
            self.eval_inlined(r.stage, &coord, lanes, parallel);
            self.emit(r.stage, coord, Some(generation), lanes, parallel);
        }
    }

    /// Evaluate every inlined producer of `stage` needed at `coord`.
    fn eval_inlined(&mut self, stage: StageId, coord: &[i64], lanes: u32, parallel: bool) {
        let (pipeline, run) = (self.pipeline, self.bounds.placements());
        let point = Region::point(coord);
        for edge in pipeline.stage(stage).producers() {
            if !run.is_inline(edge.producer) {
                continue;
            }
            let producer = pipeline.stage(edge.producer);
            let needed = required_region(&edge.footprint, &point, producer);
            needed.for_each_point(|q| {
                self.eval_inlined(edge.producer, q, lanes, parallel);
                self.emit(edge.producer, q.to_vec(), None, lanes, parallel);
            });
        }
    }

    fn emit(
        &mut self,
        stage: StageId,
        coord: Vec<i64>,
        generation: Option<Generation>,
        lanes: u32,
        parallel: bool,
    ) {
        self.events += 1;
        self.sink.record(EvaluationEvent {
            stage,
            coord,
            generation,
            lanes,
            parallel,
        });
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footprint::Footprint;
    use crate::graph::PipelineBuilder;
    use crate::schedule::ScheduleBuilder;

    fn r(b: &[(i64, i64)]) -> Region {
        Region::half_open(b)
    }

    fn producer_consumer() -> (Pipeline, StageId, StageId) {
        let mut b = PipelineBuilder::new();
        let p = b.add_stage("producer", &["x", "y"], vec![]).unwrap();
        let c = b
            .add_stage("consumer", &["x", "y"], vec![(p, Footprint::Pointwise)])
            .unwrap();
        (b.build().unwrap(), p, c)
    }

    fn trace(events: &[EvaluationEvent], p: &Pipeline) -> Vec<String> {
        events
            .iter()
            .map(|e| format!("{}{:?}", p.name(e.stage), e.coord))
            .collect()
    }

    #[test]
    fn inline_interleaves_per_point() {
        let (p, _, c) = producer_consumer();
        let s = ScheduleBuilder::new().build(&p).unwrap();
        let events = simulate(&p, &s, c, &r(&[(0, 2), (0, 1)])).unwrap();
        assert_eq!(
            trace(&events, &p),
            ["producer[0, 0]", "consumer[0, 0]", "producer[1, 0]", "consumer[1, 0]"]
        );
        assert_eq!(events[0].generation, None);
        assert_eq!(events[1].generation, Some(Generation(0)));
    }

    #[test]
    fn root_runs_first() {
        let (p, pid, c) = producer_consumer();
        let mut b = ScheduleBuilder::new();
        b.stage("producer").compute_root();
        let s = b.build(&p).unwrap();
        let events = simulate(&p, &s, c, &r(&[(0, 2), (0, 1)])).unwrap();
        assert_eq!(
            trace(&events, &p),
            ["producer[0, 0]", "producer[1, 0]", "consumer[0, 0]", "consumer[1, 0]"]
        );
        assert!(events[..2].iter().all(|e| e.stage == pid && e.generation == Some(Generation(0))));
        assert!(events[2..].iter().all(|e| e.generation == Some(Generation(1))));
    }

    #[test]
    fn compute_at_row_triggers_once_per_row() {
        let (p, _, c) = producer_consumer();
        let mut b = ScheduleBuilder::new();
        b.stage("producer").compute_at("consumer", "y");
        let s = b.build(&p).unwrap();
        let events = simulate(&p, &s, c, &r(&[(0, 2), (0, 2)])).unwrap();
        assert_eq!(
            trace(&events, &p),
            [
                "producer[0, 0]",
                "producer[1, 0]",
                "consumer[0, 0]",
                "consumer[1, 0]",
                "producer[0, 1]",
                "producer[1, 1]",
                "consumer[0, 1]",
                "consumer[1, 1]",
            ]
        );
        let gens: Vec<Option<Generation>> = events.iter().map(|e| e.generation).collect();
        assert_eq!(gens[0], Some(Generation(1)));
        assert_eq!(gens[4], Some(Generation(2)));
        assert_eq!(gens[2], Some(Generation(0)));
    }

    #[test]
    fn marks_annotate_events() {
        let (p, _, c) = producer_consumer();
        let mut b = ScheduleBuilder::new();
        b.stage("consumer").vectorize("x", 4).parallel("y");
        let s = b.build(&p).unwrap();
        let events = simulate(&p, &s, c, &r(&[(0, 8), (0, 2)])).unwrap();
        assert_eq!(events.len(), 32);
        assert!(events.iter().all(|e| e.lanes == 4 && e.parallel));
    }

    #[test]
    fn cancelled_before_first_root() {
        let (p, _, c) = producer_consumer();
        let mut b = ScheduleBuilder::new();
        b.stage("producer").compute_root();
        let s = b.build(&p).unwrap();
        let bounds = infer(&p, &s, c, &r(&[(0, 2), (0, 2)])).unwrap();
        let flag = CancelFlag::new();
        flag.cancel();
        let opts = SimulateOptions {
            cancel: Some(flag),
        };
        let mut events = Vec::new();
        let err = simulate_into(&p, &s, &bounds, &mut events, &opts).unwrap_err();
        assert_eq!(err, Error::Cancelled { completed: 0 });
        assert!(events.is_empty());
    }

    #[test]
    fn summary_counts() {
        let (p, _, c) = producer_consumer();
        let mut b = ScheduleBuilder::new();
        b.stage("producer").compute_root();
        let s = b.build(&p).unwrap();
        let bounds = infer(&p, &s, c, &r(&[(0, 3), (0, 3)])).unwrap();
        let mut events = Vec::new();
        let summary =
            simulate_into(&p, &s, &bounds, &mut events, &SimulateOptions::default()).unwrap();
        assert_eq!(
            summary,
            RunSummary {
                events: 18,
                generations: 2,
                root_realizations: 2
            }
        );
    }

    #[test]
    fn empty_region_emits_nothing() {
        let (p, _, c) = producer_consumer();
        let s = ScheduleBuilder::new().build(&p).unwrap();
        assert!(simulate(&p, &s, c, &Region::empty(2)).unwrap().is_empty());
    }
}
