// bounds.rs — Bounds inference
//
// Walks the live stages of one realize call in reverse topological order and
// decides, for every stored stage, each region it will be computed over and
// where in the consumer's loops that computation happens (a realization):
//
//   - the realized stage: one realization over the requested region
//   - root: one realization over the union bound of everything its readers
//     need, across all their realizations
//   - compute_at(C, L): one realization per (realization of C, iteration of
//     C's loops down to L). Each covers what the group's coordinates need,
//     plus the needs of other readers computed inside that same group.
//
// Needs are propagated through inlined stages, which are evaluated per point
// and so never get a realization. Input stages are checked against their
// valid domain.
//
// Preconditions: `schedule` was built for `pipeline`.
// Postconditions: the map is a pure function of its inputs; running inference
//                 twice gives equal maps.
// Failure modes: realizing an input, rank mismatch, run-specific schedule
//                violations, input overshoot → `Error`.
// Side effects: `tracing` debug events.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, OutOfBoundsError, Overshoot, Result};
use crate::footprint::required_region;
use crate::graph::Pipeline;
use crate::id::StageId;
use crate::region::Region;
use crate::schedule::{Placement, RunPlacements, Schedule};

// ── Public types ────────────────────────────────────────────────────────────

/// Names one realization of a stored stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RealizationRef {
    pub stage: StageId,
    pub index: usize,
}

/// Where a realization is triggered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Site {
    /// Once, before the realized stage starts.
    Root,
    /// On entering the group of `parent`'s loops whose indices at positions
    /// `0..=level` equal `prefix`.
    Within {
        parent: RealizationRef,
        level: usize,
        prefix: Vec<i64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Realization {
    pub region: Region,
    pub site: Site,
}

/// Inference result for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageBounds {
    pub stage: StageId,
    pub name: String,
    pub placement: Placement,
    /// Union bound of everything required of the stage in this run.
    pub required: Region,
    /// Empty for inputs and inlined stages.
    pub realizations: Vec<Realization>,
}

/// Stage → required region for one realize call, with per-realization detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequiredRegionMap {
    pub output: StageId,
    pub output_region: Region,
    stages: BTreeMap<StageId, StageBounds>,
    #[serde(skip)]
    run: RunPlacements,
}

impl RequiredRegionMap {
    pub fn get(&self, id: StageId) -> Option<&StageBounds> {
        self.stages.get(&id)
    }

    pub fn required(&self, id: StageId) -> Option<&Region> {
        self.stages.get(&id).map(|b| &b.required)
    }

    pub fn realizations(&self, id: StageId) -> &[Realization] {
        self.stages
            .get(&id)
            .map_or(&[][..], |b| b.realizations.as_slice())
    }

    pub fn realization(&self, r: RealizationRef) -> Option<&Realization> {
        self.realizations(r.stage).get(r.index)
    }

    /// Stages in id order.
    pub fn iter(&self) -> impl Iterator<Item = &StageBounds> {
        self.stages.values()
    }

    /// Placements in effect for this run.
    pub fn placements(&self) -> &RunPlacements {
        &self.run
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

/// Infer the region of every live stage needed to realize `output` over
/// `region`.
pub fn infer(
    pipeline: &Pipeline,
    schedule: &Schedule,
    output: StageId,
    region: &Region,
) -> Result<RequiredRegionMap> {
    let stage = pipeline.stage(output);
    if stage.is_input() {
        return Err(Error::RealizeInput(stage.name.clone()));
    }
    if region.rank() != stage.rank() {
        return Err(Error::OutputRank {
            stage: stage.name.clone(),
            expected: stage.rank(),
            got: region.rank(),
        });
    }
    let run = schedule.for_output(pipeline, output)?;

    let mut inference = Inference {
        pipeline,
        schedule,
        run: &run,
        stages: BTreeMap::new(),
        demands: HashMap::new(),
    };
    for s in run.live_topo(pipeline).into_iter().rev() {
        inference.infer_stage(s, output, region)?;
    }

    Ok(RequiredRegionMap {
        output,
        output_region: region.clone(),
        stages: inference.stages,
        run,
    })
}

/// Look up a stage to realize by name.
pub fn resolve_output(pipeline: &Pipeline, name: &str) -> Result<StageId> {
    pipeline
        .find(name)
        .ok_or_else(|| Error::UnknownOutput(name.to_string()))
}

// ── Internal context ────────────────────────────────────────────────────────

type Demands = BTreeMap<StageId, Region>;

struct Inference<'a> {
    pipeline: &'a Pipeline,
    schedule: &'a Schedule,
    run: &'a RunPlacements,
    stages: BTreeMap<StageId, StageBounds>,
    /// What each stored realization reads, through inlined stages.
    demands: HashMap<RealizationRef, Demands>,
}

impl Inference<'_> {
    fn infer_stage(&mut self, s: StageId, output: StageId, region: &Region) -> Result<()> {
        let placement = self.run.placement(s).clone();
        let realizations = if s == output {
            if region.is_empty() {
                Vec::new()
            } else {
                vec![Realization {
                    region: region.clone(),
                    site: Site::Root,
                }]
            }
        } else {
            match &placement {
                Placement::Input | Placement::Inline => Vec::new(),
                Placement::Root => {
                    let needed = self.needed_by_all_readers(s);
                    if needed.is_empty() {
                        Vec::new()
                    } else {
                        vec![Realization {
                            region: needed,
                            site: Site::Root,
                        }]
                    }
                }
                Placement::ComputeAt {
                    consumer, level, ..
                } => self.group_realizations(s, *consumer, *level),
            }
        };

        let stage = self.pipeline.stage(s);
        let required = if realizations.is_empty() {
            self.needed_by_all_readers(s)
        } else {
            realizations
                .iter()
                .fold(Region::empty(stage.rank()), |acc, r| acc.union_bound(&r.region))
        };

        if let Some(domain) = stage.domain().filter(|_| stage.is_input()) {
            if !domain.contains(&required) {
                return Err(OutOfBoundsError {
                    stage: stage.name.clone(),
                    overshoot: Overshoot(required.overshoot(domain)),
                    required,
                    domain: domain.clone(),
                }
                .into());
            }
        }

        for (index, r) in realizations.iter().enumerate() {
            let d = self.demand(s, &r.region);
            self.demands.insert(RealizationRef { stage: s, index }, d);
        }

        debug!(
            stage = %stage.name,
            placement = %placement.describe(self.pipeline),
            required = %required,
            realizations = realizations.len(),
            "inferred bounds"
        );
        self.stages.insert(
            s,
            StageBounds {
                stage: s,
                name: stage.name.clone(),
                placement,
                required,
                realizations,
            },
        );
        Ok(())
    }

    /// Union bound of what every realization of every reader needs of `s`.
    fn needed_by_all_readers(&self, s: StageId) -> Region {
        let mut needed = Region::empty(self.pipeline.stage(s).rank());
        for u in self.run.effective_consumers(self.pipeline, s) {
            for index in 0..self.realization_count(u) {
                if let Some(r) = self.demands[&RealizationRef { stage: u, index }].get(&s) {
                    needed = needed.union_bound(r);
                }
            }
        }
        needed
    }

    fn group_realizations(&self, s: StageId, consumer: StageId, level: usize) -> Vec<Realization> {
        let rank = self.pipeline.stage(s).rank();
        let readers: Vec<StageId> = self
            .run
            .effective_consumers(self.pipeline, s)
            .into_iter()
            .filter(|&u| u != consumer)
            .collect();

        let mut out = Vec::new();
        let plan = self.schedule.plan(consumer);
        for (ci, parent) in self.stages[&consumer].realizations.iter().enumerate() {
            let parent_ref = RealizationRef {
                stage: consumer,
                index: ci,
            };
            let nest = plan.instantiate(&parent.region);
            for prefix in nest.groups(level) {
                let group = nest.group_region(&prefix);
                let mut needed = self
                    .demand(consumer, &group)
                    .remove(&s)
                    .unwrap_or_else(|| Region::empty(rank));
                for &u in &readers {
                    for index in 0..self.realization_count(u) {
                        let r = RealizationRef { stage: u, index };
                        if self.nested_in(r, parent_ref, level, &prefix) {
                            if let Some(d) = self.demands[&r].get(&s) {
                                needed = needed.union_bound(d);
                            }
                        }
                    }
                }
                if !needed.is_empty() {
                    out.push(Realization {
                        region: needed,
                        site: Site::Within {
                            parent: parent_ref,
                            level,
                            prefix,
                        },
                    });
                }
            }
        }
        out
    }

    /// Whether realization `r` runs inside the group of `target` whose outer
    /// loop indices down to `level` are `prefix`.
    fn nested_in(
        &self,
        r: RealizationRef,
        target: RealizationRef,
        level: usize,
        prefix: &[i64],
    ) -> bool {
        let mut cur = r;
        loop {
            let Some(real) = self.stages.get(&cur.stage).and_then(|b| b.realizations.get(cur.index))
            else {
                return false;
            };
            match &real.site {
                Site::Root => return false,
                Site::Within {
                    parent,
                    prefix: p,
                    ..
                } => {
                    if *parent == target {
                        return p.len() > level && p[..=level] == *prefix;
                    }
                    cur = *parent;
                }
            }
        }
    }

    fn realization_count(&self, s: StageId) -> usize {
        self.stages.get(&s).map_or(0, |b| b.realizations.len())
    }

    /// Regions of every producer read, directly or through inlined stages,
    /// when computing `consumer` over `region`.
    fn demand(&self, consumer: StageId, region: &Region) -> Demands {
        let mut out = Demands::new();
        self.demand_into(consumer, region, &mut out);
        out
    }

    fn demand_into(&self, consumer: StageId, region: &Region, out: &mut Demands) {
        for edge in self.pipeline.stage(consumer).producers() {
            let producer = self.pipeline.stage(edge.producer);
            let r = required_region(&edge.footprint, region, producer);
            if r.is_empty() {
                continue;
            }
            let merged = match out.get(&edge.producer) {
                Some(prev) => prev.union_bound(&r),
                None => r.clone(),
            };
            out.insert(edge.producer, merged);
            if self.run.is_inline(edge.producer) {
                self.demand_into(edge.producer, &r, out);
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
