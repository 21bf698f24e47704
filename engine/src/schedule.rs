// schedule.rs — Storage granularity and loop shape per stage
//
// A `Schedule` is built once from a `ScheduleBuilder` and never mutated. The
// builder speaks the scheduling vocabulary by stage name; `build` resolves
// names against a pipeline and validates everything that can be validated
// without knowing which stage will be realized:
//
//   - policies name existing, non-input stages
//   - every transform list applies cleanly (see nest.rs)
//   - `compute_at(C, v)`: C transitively consumes the stage, C is not inlined,
//     `v` is a loop of C's transformed nest, and every stage that reads the
//     stage's values is C itself or is computed inside C at or below `v`
//   - custom footprints pass a monotonicity probe
//
// `Schedule::for_output` re-checks the enclosure rule for one realize call,
// where the realized stage becomes its own root and only stages it reads
// take part.
//
// Preconditions: the builder's names refer to stages of `pipeline`.
// Postconditions: a built `Schedule` has one placement and one plan per stage.
// Failure modes: `ScheduleValidationError`.
// Side effects: none.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::ScheduleValidationError;
use crate::footprint::probe_monotonic;
use crate::graph::Pipeline;
use crate::id::StageId;
use crate::nest::{LoopTransform, NestPlan};

// ── Policy vocabulary ───────────────────────────────────────────────────────

/// A loop of a named consumer, e.g. `blur_y.xo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopLevel {
    pub consumer: String,
    pub var: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub enum Granularity {
    /// Recomputed at every use; never stored.
    #[default]
    Inline,
    /// Computed once per run over everything any consumer needs.
    Root,
    /// Computed once per iteration of the named consumer loop.
    ComputeAt(LoopLevel),
}

/// The schedule of one stage, as written by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StagePolicy {
    pub granularity: Granularity,
    pub transforms: Vec<LoopTransform>,
}

impl StagePolicy {
    pub fn compute_root(&mut self) -> &mut Self {
        self.granularity = Granularity::Root;
        self
    }

    pub fn compute_inline(&mut self) -> &mut Self {
        self.granularity = Granularity::Inline;
        self
    }

    pub fn compute_at(&mut self, consumer: &str, var: &str) -> &mut Self {
        self.granularity = Granularity::ComputeAt(LoopLevel {
            consumer: consumer.to_string(),
            var: var.to_string(),
        });
        self
    }

    pub fn split(&mut self, var: &str, outer: &str, inner: &str, factor: i64) -> &mut Self {
        self.push(LoopTransform::Split {
            var: var.to_string(),
            outer: outer.to_string(),
            inner: inner.to_string(),
            factor,
        })
    }

    pub fn fuse(&mut self, outer: &str, inner: &str, fused: &str) -> &mut Self {
        self.push(LoopTransform::Fuse {
            outer: outer.to_string(),
            inner: inner.to_string(),
            fused: fused.to_string(),
        })
    }

    /// Loop names innermost first.
    pub fn reorder(&mut self, vars: &[&str]) -> &mut Self {
        self.push(LoopTransform::Reorder(
            vars.iter().map(|v| v.to_string()).collect(),
        ))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn tile(
        &mut self,
        x: &str,
        y: &str,
        xo: &str,
        yo: &str,
        xi: &str,
        yi: &str,
        width: i64,
        height: i64,
    ) -> &mut Self {
        self.push(LoopTransform::Tile {
            x: x.to_string(),
            y: y.to_string(),
            xo: xo.to_string(),
            yo: yo.to_string(),
            xi: xi.to_string(),
            yi: yi.to_string(),
            width,
            height,
        })
    }

    pub fn vectorize(&mut self, var: &str, width: i64) -> &mut Self {
        self.push(LoopTransform::Vectorize {
            var: var.to_string(),
            width,
        })
    }

    pub fn unroll(&mut self, var: &str, width: i64) -> &mut Self {
        self.push(LoopTransform::Unroll {
            var: var.to_string(),
            width,
        })
    }

    pub fn parallel(&mut self, var: &str) -> &mut Self {
        self.push(LoopTransform::Parallel {
            var: var.to_string(),
        })
    }

    pub fn push(&mut self, t: LoopTransform) -> &mut Self {
        self.transforms.push(t);
        self
    }

    /// Loops marked parallel, in the order they were marked.
    pub fn parallel_marks(&self) -> Vec<&str> {
        self.transforms
            .iter()
            .filter_map(|t| match t {
                LoopTransform::Parallel { var } => Some(var.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The last vectorize request, as `(var, width)`.
    pub fn vectorize_mark(&self) -> Option<(&str, i64)> {
        self.transforms.iter().rev().find_map(|t| match t {
            LoopTransform::Vectorize { var, width } => Some((var.as_str(), *width)),
            _ => None,
        })
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Collects policies by stage name. Stages without a policy are inlined.
#[derive(Debug, Clone, Default)]
pub struct ScheduleBuilder {
    policies: IndexMap<String, StagePolicy>,
}

impl ScheduleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy of `name`, created on first use.
    pub fn stage(&mut self, name: &str) -> &mut StagePolicy {
        self.policies.entry(name.to_string()).or_default()
    }

    pub fn build(&self, pipeline: &Pipeline) -> Result<Schedule, ScheduleValidationError> {
        let mut policies = vec![StagePolicy::default(); pipeline.len()];
        for (name, policy) in &self.policies {
            let id = pipeline
                .find(name)
                .ok_or_else(|| ScheduleValidationError::UnknownStage(name.clone()))?;
            if pipeline.stage(id).is_input() {
                return Err(ScheduleValidationError::InputScheduled(name.clone()));
            }
            policies[id.index()] = policy.clone();
        }

        let mut plans = Vec::with_capacity(pipeline.len());
        for stage in pipeline.stages() {
            plans.push(NestPlan::from_transforms(
                stage,
                &policies[stage.id.index()].transforms,
            )?);
        }

        let mut placements = Vec::with_capacity(pipeline.len());
        for stage in pipeline.stages() {
            let placement = if stage.is_input() {
                Placement::Input
            } else {
                match &policies[stage.id.index()].granularity {
                    Granularity::Inline => Placement::Inline,
                    Granularity::Root => Placement::Root,
                    Granularity::ComputeAt(level) => {
                        resolve_level(pipeline, &plans, stage.id, level)?
                    }
                }
            };
            placements.push(placement);
        }

        check_footprints(pipeline)?;

        let schedule = Schedule {
            placements,
            plans,
            policies,
        };
        RunPlacements::new(pipeline, &schedule, None)?;
        Ok(schedule)
    }
}

fn resolve_level(
    pipeline: &Pipeline,
    plans: &[NestPlan],
    stage: StageId,
    level: &LoopLevel,
) -> Result<Placement, ScheduleValidationError> {
    let name = pipeline.name(stage).to_string();
    let consumer = pipeline
        .find(&level.consumer)
        .ok_or_else(|| ScheduleValidationError::UnknownStage(level.consumer.clone()))?;
    if !pipeline.transitive_consumers(stage).contains(&consumer) {
        return Err(ScheduleValidationError::NotAConsumer {
            stage: name,
            consumer: level.consumer.clone(),
        });
    }
    let plan = &plans[consumer.index()];
    let pos = plan
        .loop_position(&level.var)
        .ok_or_else(|| ScheduleValidationError::UnknownLoopLevel {
            stage: name,
            consumer: level.consumer.clone(),
            var: level.var.clone(),
            loops: plan.loop_names(),
        })?;
    Ok(Placement::ComputeAt {
        consumer,
        var: level.var.clone(),
        level: pos,
    })
}

fn check_footprints(pipeline: &Pipeline) -> Result<(), ScheduleValidationError> {
    for stage in pipeline.stages() {
        for edge in stage.producers() {
            if !edge.footprint.is_custom() {
                continue;
            }
            let producer = pipeline.stage(edge.producer);
            if let Some((smaller, larger)) =
                probe_monotonic(&edge.footprint, stage.rank(), producer)
            {
                return Err(ScheduleValidationError::NonMonotonicFootprint {
                    consumer: stage.name.clone(),
                    producer: producer.name.clone(),
                    smaller,
                    larger,
                });
            }
        }
    }
    Ok(())
}

// ── Schedule ────────────────────────────────────────────────────────────────

/// A resolved granularity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Placement {
    /// Supplied externally; never computed.
    Input,
    Inline,
    Root,
    /// Computed per iteration of loop `level` (position, outermost 0) of
    /// `consumer`, named `var`.
    ComputeAt {
        consumer: StageId,
        var: String,
        level: usize,
    },
}

impl Placement {
    pub fn describe(&self, pipeline: &Pipeline) -> String {
        match self {
            Placement::Input => "input".to_string(),
            Placement::Inline => "inline".to_string(),
            Placement::Root => "root".to_string(),
            Placement::ComputeAt { consumer, var, .. } => {
                format!("compute_at({}, {})", pipeline.name(*consumer), var)
            }
        }
    }
}

/// A validated schedule for one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    placements: Vec<Placement>,
    plans: Vec<NestPlan>,
    policies: Vec<StagePolicy>,
}

impl Schedule {
    /// Every computed stage at root with untransformed loops: the schedule
    /// with no redundant work.
    pub fn all_root(pipeline: &Pipeline) -> Schedule {
        Schedule {
            placements: pipeline
                .stages()
                .map(|s| {
                    if s.is_input() {
                        Placement::Input
                    } else {
                        Placement::Root
                    }
                })
                .collect(),
            plans: pipeline.stages().map(NestPlan::new).collect(),
            policies: pipeline
                .stages()
                .map(|s| {
                    let mut p = StagePolicy::default();
                    if !s.is_input() {
                        p.compute_root();
                    }
                    p
                })
                .collect(),
        }
    }

    /// Placement as scheduled. The realized stage overrides this; see
    /// `for_output`.
    pub fn placement(&self, id: StageId) -> &Placement {
        &self.placements[id.index()]
    }

    pub fn plan(&self, id: StageId) -> &NestPlan {
        &self.plans[id.index()]
    }

    pub fn policy(&self, id: StageId) -> &StagePolicy {
        &self.policies[id.index()]
    }

    /// Effective placements for realizing `output`.
    pub fn for_output(
        &self,
        pipeline: &Pipeline,
        output: StageId,
    ) -> Result<RunPlacements, ScheduleValidationError> {
        RunPlacements::new(pipeline, self, Some(output))
    }

    /// Whether any loop of `id` is marked parallel.
    pub fn is_parallel(&self, id: StageId) -> bool {
        self.plan(id).is_parallel()
    }
}

// ── Per-run view ────────────────────────────────────────────────────────────

/// Placements in effect for one realize call: the realized stage is root,
/// and only stages it transitively reads are live. Without an output (at
/// build time) every stage is live and sinks are treated as roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlacements {
    output: Option<StageId>,
    live: BTreeSet<StageId>,
    placements: Vec<Placement>,
}

impl RunPlacements {
    fn new(
        pipeline: &Pipeline,
        schedule: &Schedule,
        output: Option<StageId>,
    ) -> Result<Self, ScheduleValidationError> {
        let live = match output {
            Some(o) => pipeline.upstream_of(o),
            None => pipeline.stages().map(|s| s.id).collect(),
        };
        let placements = pipeline
            .stages()
            .map(|s| {
                let scheduled = schedule.placement(s.id);
                let is_sink = !pipeline
                    .consumers_of(s.id)
                    .iter()
                    .any(|c| live.contains(c));
                if Some(s.id) == output {
                    Placement::Root
                } else if *scheduled == Placement::Inline && is_sink {
                    Placement::Root
                } else {
                    scheduled.clone()
                }
            })
            .collect();
        let run = RunPlacements {
            output,
            live,
            placements,
        };
        run.check_enclosure(pipeline)?;
        Ok(run)
    }

    pub fn output(&self) -> Option<StageId> {
        self.output
    }

    pub fn placement(&self, id: StageId) -> &Placement {
        &self.placements[id.index()]
    }

    pub fn is_live(&self, id: StageId) -> bool {
        self.live.contains(&id)
    }

    pub fn is_inline(&self, id: StageId) -> bool {
        *self.placement(id) == Placement::Inline
    }

    /// Live stages in topological order.
    pub fn live_topo(&self, pipeline: &Pipeline) -> Vec<StageId> {
        pipeline
            .topological_order()
            .iter()
            .copied()
            .filter(|s| self.is_live(*s))
            .collect()
    }

    /// Stored stages that read `id`'s values, looking through inlined
    /// consumers. Sorted by id.
    pub fn effective_consumers(&self, pipeline: &Pipeline, id: StageId) -> Vec<StageId> {
        let mut out = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(s) = stack.pop() {
            for &c in pipeline.consumers_of(s) {
                if !self.is_live(c) || !seen.insert(c) {
                    continue;
                }
                if self.is_inline(c) {
                    stack.push(c);
                } else {
                    out.insert(c);
                }
            }
        }
        out.into_iter().collect()
    }

    /// Whether `user` is `consumer` or is computed inside it at loop
    /// position `level` or deeper.
    fn encloses(&self, consumer: StageId, level: usize, user: StageId) -> bool {
        let mut cur = user;
        loop {
            if cur == consumer {
                return true;
            }
            match self.placement(cur) {
                Placement::ComputeAt {
                    consumer: parent,
                    level: l,
                    ..
                } => {
                    if *parent == consumer {
                        return *l >= level;
                    }
                    cur = *parent;
                }
                _ => return false,
            }
        }
    }

    fn check_enclosure(&self, pipeline: &Pipeline) -> Result<(), ScheduleValidationError> {
        for &s in &self.live {
            let Placement::ComputeAt {
                consumer,
                var,
                level,
            } = self.placement(s)
            else {
                continue;
            };
            let name = pipeline.name(s).to_string();
            let consumer_name = pipeline.name(*consumer).to_string();
            if self.is_inline(*consumer) {
                return Err(ScheduleValidationError::InlineTarget {
                    stage: name,
                    consumer: consumer_name,
                });
            }
            let users = self.effective_consumers(pipeline, s);
            let outside = users
                .iter()
                .find(|&&u| !self.is_live(*consumer) || !self.encloses(*consumer, *level, u));
            if let Some(&user) = outside {
                return Err(ScheduleValidationError::UseOutsideLevel {
                    stage: name,
                    consumer: consumer_name,
                    var: var.clone(),
                    user: pipeline.name(user).to_string(),
                });
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
