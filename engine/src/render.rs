// render.rs — Text renderings of one realize call
//
// `LoopNestListing` prints the loop structure a serial execution follows,
// the way the tutorials write out "equivalent" loops: root stages first, then
// the realized stage, with each `compute_at` stage's `produce` block placed
// inside the consumer loop it is computed at. Loop extents are those of the
// stage's first realization.
//
// `EventLog` prints one line per evaluation event; `RegionTable` prints the
// inferred bounds.
//
// Preconditions: renderers receive artifacts of the same realize call.
// Postconditions: output is deterministic.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::collections::BTreeSet;
use std::fmt;

use crate::bounds::RequiredRegionMap;
use crate::graph::Pipeline;
use crate::id::StageId;
use crate::nest::LoopKind;
use crate::schedule::{Placement, Schedule};
use crate::simulate::EvaluationEvent;

// ── Loop nest ───────────────────────────────────────────────────────────────

pub struct LoopNestListing<'a> {
    pub pipeline: &'a Pipeline,
    pub schedule: &'a Schedule,
    pub bounds: &'a RequiredRegionMap,
}

impl fmt::Display for LoopNestListing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let run = self.bounds.placements();
        let roots = run
            .live_topo(self.pipeline)
            .into_iter()
            .filter(|&s| s != self.bounds.output && *run.placement(s) == Placement::Root);
        for s in roots.chain(std::iter::once(self.bounds.output)) {
            self.write_produce(f, s, 0)?;
        }
        Ok(())
    }
}

impl LoopNestListing<'_> {
    fn write_produce(&self, f: &mut fmt::Formatter<'_>, s: StageId, indent: usize) -> fmt::Result {
        let stage = self.pipeline.stage(s);
        writeln!(f, "{}produce {}:", pad(indent), stage.name)?;

        let plan = self.schedule.plan(s);
        let extents: Option<Vec<i64>> = self.bounds.realizations(s).first().map(|r| {
            plan.instantiate(&r.region)
                .loops()
                .map(|l| l.extent)
                .collect()
        });
        let children = self.children_of(s);

        for (pos, name) in plan.loop_names().iter().enumerate() {
            let kw = keyword(plan.loop_kind(pos));
            let depth = pad(indent + 1 + pos);
            match &extents {
                Some(e) => writeln!(f, "{}{} {} in 0..{}:", depth, kw, name, e[pos])?,
                None => writeln!(f, "{}{} {}:", depth, kw, name)?,
            }
            for &(level, child) in &children {
                if level == pos {
                    self.write_produce(f, child, indent + 2 + pos)?;
                }
            }
        }

        write!(
            f,
            "{}{}({})",
            pad(indent + 1 + plan.depth()),
            stage.name,
            stage.vars.join(", ")
        )?;
        let inlined = self.inlined_into(s);
        if !inlined.is_empty() {
            write!(f, " <- inline {}", inlined.join(", "))?;
        }
        writeln!(f)
    }

    /// Stages computed at `s`, as `(level, stage)` in topological order.
    fn children_of(&self, s: StageId) -> Vec<(usize, StageId)> {
        let run = self.bounds.placements();
        run.live_topo(self.pipeline)
            .into_iter()
            .filter_map(|c| match run.placement(c) {
                Placement::ComputeAt {
                    consumer, level, ..
                } if *consumer == s => Some((*level, c)),
                _ => None,
            })
            .collect()
    }

    /// Names of the inlined stages evaluated per element of `s`.
    fn inlined_into(&self, s: StageId) -> Vec<String> {
        let run = self.bounds.placements();
        let mut found = BTreeSet::new();
        let mut stack = vec![s];
        while let Some(cur) = stack.pop() {
            for edge in self.pipeline.stage(cur).producers() {
                if run.is_inline(edge.producer) && found.insert(edge.producer) {
                    stack.push(edge.producer);
                }
            }
        }
        let topo = self.pipeline.topo_rank();
        let mut ordered: Vec<StageId> = found.into_iter().collect();
        ordered.sort_by_key(|id| topo[id]);
        ordered
            .into_iter()
            .map(|id| self.pipeline.name(id).to_string())
            .collect()
    }
}

fn keyword(kind: LoopKind) -> String {
    match kind {
        LoopKind::Serial => "for".to_string(),
        LoopKind::Parallel => "parallel".to_string(),
        LoopKind::Vectorized(w) => format!("vectorized<{}>", w),
        LoopKind::Unrolled(w) => format!("unrolled<{}>", w),
    }
}

fn pad(indent: usize) -> String {
    "  ".repeat(indent)
}

// ── Event log ───────────────────────────────────────────────────────────────

pub struct EventLog<'a> {
    pub pipeline: &'a Pipeline,
    pub events: &'a [EvaluationEvent],
}

impl fmt::Display for EventLog<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in self.events {
            let coord: Vec<String> = e.coord.iter().map(|c| c.to_string()).collect();
            write!(f, "{} ({})", self.pipeline.name(e.stage), coord.join(", "))?;
            match e.generation {
                Some(g) => write!(f, " gen {}", g.0)?,
                None => write!(f, " inline")?,
            }
            if e.lanes > 1 {
                write!(f, " x{}", e.lanes)?;
            }
            if e.parallel {
                write!(f, " parallel")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ── Region table ────────────────────────────────────────────────────────────

pub struct RegionTable<'a> {
    pub pipeline: &'a Pipeline,
    pub bounds: &'a RequiredRegionMap,
}

impl fmt::Display for RegionTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<(String, String, String, usize)> = self
            .bounds
            .placements()
            .live_topo(self.pipeline)
            .into_iter()
            .filter_map(|s| self.bounds.get(s))
            .map(|b| {
                (
                    b.name.clone(),
                    b.placement.describe(self.pipeline),
                    b.required.to_string(),
                    b.realizations.len(),
                )
            })
            .collect();
        let name_w = rows.iter().map(|r| r.0.len()).max().unwrap_or(0);
        let place_w = rows.iter().map(|r| r.1.len()).max().unwrap_or(0);
        for (name, placement, region, n) in &rows {
            write!(f, "{:<name_w$}  {:<place_w$}  {}", name, placement, region)?;
            match n {
                0 => writeln!(f)?,
                1 => writeln!(f, "  1 realization")?,
                n => writeln!(f, "  {} realizations", n)?,
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::infer;
    use crate::footprint::Footprint;
    use crate::graph::PipelineBuilder;
    use crate::region::Region;
    use crate::schedule::ScheduleBuilder;
    use crate::simulate::simulate_into;
    use crate::simulate::SimulateOptions;
    use insta::assert_snapshot;

    fn blur() -> Pipeline {
        let mut b = PipelineBuilder::new();
        let input = b
            .input("input", &["x", "y"], Region::half_open(&[(-8, 16), (-8, 16)]))
            .unwrap();
        let bx = b
            .add_stage("blur_x", &["x", "y"], vec![(input, Footprint::stencil(&[1, 0]))])
            .unwrap();
        b.add_stage("blur_y", &["x", "y"], vec![(bx, Footprint::stencil(&[0, 1]))])
            .unwrap();
        b.build().unwrap()
    }

    fn bounds_for(p: &Pipeline, s: &Schedule, w: i64, h: i64) -> RequiredRegionMap {
        let out = p.find("blur_y").unwrap();
        infer(p, s, out, &Region::half_open(&[(0, w), (0, h)])).unwrap()
    }

    #[test]
    fn listing_of_tiled_compute_at() {
        let p = blur();
        let mut b = ScheduleBuilder::new();
        b.stage("blur_y")
            .tile("x", "y", "xo", "yo", "xi", "yi", 2, 2)
            .parallel("yo");
        b.stage("blur_x").compute_at("blur_y", "xo");
        let s = b.build(&p).unwrap();
        let bounds = bounds_for(&p, &s, 4, 4);
        let text = LoopNestListing {
            pipeline: &p,
            schedule: &s,
            bounds: &bounds,
        }
        .to_string();
        assert_snapshot!(text, @r"
        produce blur_y:
          parallel yo in 0..2:
            for xo in 0..2:
              produce blur_x:
                for y in 0..4:
                  for x in 0..2:
                    blur_x(x, y)
              for yi in 0..2:
                for xi in 0..2:
                  blur_y(x, y)
        ");
    }

    #[test]
    fn listing_of_root_and_inline() {
        let p = blur();
        let s = Schedule::all_root(&p);
        let bounds = bounds_for(&p, &s, 4, 2);
        let text = LoopNestListing {
            pipeline: &p,
            schedule: &s,
            bounds: &bounds,
        }
        .to_string();
        assert_snapshot!(text, @r"
        produce blur_x:
          for y in 0..4:
            for x in 0..4:
              blur_x(x, y)
        produce blur_y:
          for y in 0..2:
            for x in 0..4:
              blur_y(x, y)
        ");

        let s = ScheduleBuilder::new().build(&p).unwrap();
        let bounds = bounds_for(&p, &s, 4, 2);
        let text = LoopNestListing {
            pipeline: &p,
            schedule: &s,
            bounds: &bounds,
        }
        .to_string();
        assert_snapshot!(text, @r"
        produce blur_y:
          for y in 0..2:
            for x in 0..4:
              blur_y(x, y) <- inline blur_x
        ");
    }

    #[test]
    fn event_log_of_inline_blur() {
        let p = blur();
        let s = ScheduleBuilder::new().build(&p).unwrap();
        let bounds = bounds_for(&p, &s, 1, 1);
        let mut events = Vec::new();
        simulate_into(&p, &s, &bounds, &mut events, &SimulateOptions::default()).unwrap();
        let text = EventLog {
            pipeline: &p,
            events: &events,
        }
        .to_string();
        assert_snapshot!(text, @r"
        blur_x (0, -1) inline
        blur_x (0, 0) inline
        blur_x (0, 1) inline
        blur_y (0, 0) gen 0
        ");
    }

    #[test]
    fn region_table_aligns_columns() {
        let p = blur();
        let mut b = ScheduleBuilder::new();
        b.stage("blur_x").compute_at("blur_y", "x");
        let s = b.build(&p).unwrap();
        let bounds = bounds_for(&p, &s, 2, 2);
        let text = RegionTable {
            pipeline: &p,
            bounds: &bounds,
        }
        .to_string();
        assert_snapshot!(text, @r"
        input   input                  [-1, 3) x [-1, 3)
        blur_x  compute_at(blur_y, x)  [0, 2) x [-1, 3)  4 realizations
        blur_y  root                   [0, 2) x [0, 2)  1 realization
        ");
    }
}
