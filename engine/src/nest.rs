// nest.rs — Loop-nest builder
//
// A stage's loops start as one loop per dimension, last dimension outermost,
// and are reshaped by an ordered list of transforms. Shaping happens once per
// schedule on a region-independent `NestPlan`, so loop names and positions
// (what `compute_at` levels refer to) never depend on the realized region.
// `NestPlan::instantiate` then fixes the extents for one concrete region.
//
// Split reconstruction is clamped: `var = min(outer*f, E-f) + inner`, so the
// inner loop always runs its full factor and the last outer iteration slides
// back to stay inside the region. When `f` does not divide `E`, coordinates
// near the upper edge are visited twice; none is ever skipped. A factor
// larger than the extent degenerates to the extent.
//
// Fuse is row-major: `fuse(a, b, f)` requires `a` to directly enclose `b` and
// recovers `a = f / Eb`, `b = f % Eb`.
//
// Preconditions: `instantiate` gets a region of the stage's rank.
// Postconditions: walking a nest visits every coordinate of its region at
//                 least once and none outside it.
// Failure modes: invalid transforms → `ScheduleValidationError`.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::error::ScheduleValidationError;
use crate::graph::Stage;
use crate::region::Region;

// ── Transforms ──────────────────────────────────────────────────────────────

/// One loop transform, applied in the order given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LoopTransform {
    Split {
        var: String,
        outer: String,
        inner: String,
        factor: i64,
    },
    Fuse {
        outer: String,
        inner: String,
        fused: String,
    },
    /// Loop names listed innermost first.
    Reorder(Vec<String>),
    Tile {
        x: String,
        y: String,
        xo: String,
        yo: String,
        xi: String,
        yi: String,
        width: i64,
        height: i64,
    },
    Vectorize { var: String, width: i64 },
    Unroll { var: String, width: i64 },
    Parallel { var: String },
}

impl fmt::Display for LoopTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopTransform::Split {
                var,
                outer,
                inner,
                factor,
            } => write!(f, "split({}, {}, {}, {})", var, outer, inner, factor),
            LoopTransform::Fuse {
                outer,
                inner,
                fused,
            } => write!(f, "fuse({}, {}, {})", outer, inner, fused),
            LoopTransform::Reorder(vars) => write!(f, "reorder({})", vars.join(", ")),
            LoopTransform::Tile {
                x,
                y,
                xo,
                yo,
                xi,
                yi,
                width,
                height,
            } => write!(
                f,
                "tile({}, {}, {}, {}, {}, {}, {}, {})",
                x, y, xo, yo, xi, yi, width, height
            ),
            LoopTransform::Vectorize { var, width } => write!(f, "vectorize({}, {})", var, width),
            LoopTransform::Unroll { var, width } => write!(f, "unroll({}, {})", var, width),
            LoopTransform::Parallel { var } => write!(f, "parallel({})", var),
        }
    }
}

/// How a loop's iterations are declared to execute. Only the cost model
/// distinguishes these; the simulator always walks loops serially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoopKind {
    Serial,
    Parallel,
    Vectorized(u32),
    Unrolled(u32),
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopKind::Serial => write!(f, "serial"),
            LoopKind::Parallel => write!(f, "parallel"),
            LoopKind::Vectorized(w) => write!(f, "vectorized({})", w),
            LoopKind::Unrolled(w) => write!(f, "unrolled({})", w),
        }
    }
}

// ── Plan ────────────────────────────────────────────────────────────────────

/// Where a variable's extent comes from. Only ever refers to earlier vars.
#[derive(Debug, Clone, PartialEq)]
enum Origin {
    Dim(usize),
    SplitOuter { parent: usize, factor: i64 },
    SplitInner { parent: usize, factor: i64 },
    Fused { outer: usize, inner: usize },
}

/// How a variable's value is recovered once it is no longer a loop. Only
/// ever refers to later vars.
#[derive(Debug, Clone, PartialEq)]
enum Derived {
    Loop,
    Split { outer: usize, inner: usize },
    Fused { fused: usize, inner: usize, is_outer: bool },
}

#[derive(Debug, Clone, PartialEq)]
struct PlanVar {
    name: String,
    origin: Origin,
    derived: Derived,
    /// Extent known without a region: split factors and their products.
    static_extent: Option<i64>,
    kind: LoopKind,
}

/// Region-independent loop structure of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct NestPlan {
    stage: String,
    rank: usize,
    vars: Vec<PlanVar>,
    /// Indices into `vars`, outermost first.
    loops: Vec<usize>,
}

impl NestPlan {
    /// The untransformed nest: one serial loop per dimension, last dimension
    /// outermost.
    pub fn new(stage: &Stage) -> Self {
        let vars = stage
            .vars
            .iter()
            .enumerate()
            .map(|(d, name)| PlanVar {
                name: name.clone(),
                origin: Origin::Dim(d),
                derived: Derived::Loop,
                static_extent: None,
                kind: LoopKind::Serial,
            })
            .collect();
        NestPlan {
            stage: stage.name.clone(),
            rank: stage.rank(),
            vars,
            loops: (0..stage.rank()).rev().collect(),
        }
    }

    pub fn from_transforms(
        stage: &Stage,
        transforms: &[LoopTransform],
    ) -> Result<Self, ScheduleValidationError> {
        let mut plan = NestPlan::new(stage);
        for t in transforms {
            plan.apply(t)?;
        }
        Ok(plan)
    }

    pub fn apply(&mut self, t: &LoopTransform) -> Result<(), ScheduleValidationError> {
        match t {
            LoopTransform::Split {
                var,
                outer,
                inner,
                factor,
            } => self.split(var, outer, inner, *factor),
            LoopTransform::Fuse {
                outer,
                inner,
                fused,
            } => self.fuse(outer, inner, fused),
            LoopTransform::Reorder(vars) => self.reorder(vars),
            LoopTransform::Tile {
                x,
                y,
                xo,
                yo,
                xi,
                yi,
                width,
                height,
            } => {
                self.split(x, xo, xi, *width)?;
                self.split(y, yo, yi, *height)?;
                self.reorder(&[xi.clone(), yi.clone(), xo.clone(), yo.clone()])
            }
            LoopTransform::Vectorize { var, width } => {
                let w = self.check_width(*width)?;
                self.mark_with_split(var, *width, "_vi", LoopKind::Vectorized(w))
            }
            LoopTransform::Unroll { var, width } => {
                let w = self.check_width(*width)?;
                self.mark_with_split(var, *width, "_ui", LoopKind::Unrolled(w))
            }
            LoopTransform::Parallel { var } => self.mark(var, LoopKind::Parallel),
        }
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn depth(&self) -> usize {
        self.loops.len()
    }

    /// Position of loop `name`, 0 being outermost.
    pub fn loop_position(&self, name: &str) -> Option<usize> {
        self.loops.iter().position(|&v| self.vars[v].name == name)
    }

    /// Loop names, outermost first.
    pub fn loop_names(&self) -> Vec<String> {
        self.loops.iter().map(|&v| self.vars[v].name.clone()).collect()
    }

    pub fn loop_kind(&self, pos: usize) -> LoopKind {
        self.vars[self.loops[pos]].kind
    }

    pub fn is_parallel(&self) -> bool {
        self.loops
            .iter()
            .any(|&v| self.vars[v].kind == LoopKind::Parallel)
    }

    pub fn split(
        &mut self,
        var: &str,
        outer: &str,
        inner: &str,
        factor: i64,
    ) -> Result<(), ScheduleValidationError> {
        if factor <= 0 {
            return Err(ScheduleValidationError::NonPositiveFactor {
                stage: self.stage.clone(),
                var: var.to_string(),
                factor,
            });
        }
        let pos = self.find(var)?;
        let parent = self.loops[pos];
        self.check_unmarked(parent)?;
        if outer == inner {
            return Err(self.in_use(inner));
        }
        for name in [outer, inner] {
            if name != var && self.loop_position(name).is_some() {
                return Err(self.in_use(name));
            }
        }

        let parent_static = self.vars[parent].static_extent;
        let outer_static = parent_static.map(|e| {
            let f = factor.min(e).max(1);
            (e + f - 1) / f
        });
        let inner_static = Some(parent_static.map_or(factor, |e| factor.min(e)));
        let o = self.push_var(outer, Origin::SplitOuter { parent, factor }, outer_static);
        let i = self.push_var(inner, Origin::SplitInner { parent, factor }, inner_static);
        self.vars[parent].derived = Derived::Split { outer: o, inner: i };
        self.loops.splice(pos..=pos, [o, i]);
        Ok(())
    }

    pub fn fuse(&mut self, outer: &str, inner: &str, fused: &str) -> Result<(), ScheduleValidationError> {
        let pa = self.find(outer)?;
        let pb = self.find(inner)?;
        if pb != pa + 1 {
            return Err(ScheduleValidationError::FuseNotAdjacent {
                stage: self.stage.clone(),
                outer: outer.to_string(),
                inner: inner.to_string(),
            });
        }
        let (a, b) = (self.loops[pa], self.loops[pb]);
        self.check_unmarked(a)?;
        self.check_unmarked(b)?;
        if fused != outer && fused != inner && self.loop_position(fused).is_some() {
            return Err(self.in_use(fused));
        }

        let static_extent = match (self.vars[a].static_extent, self.vars[b].static_extent) {
            (Some(ea), Some(eb)) => Some(ea * eb),
            _ => None,
        };
        let f = self.push_var(fused, Origin::Fused { outer: a, inner: b }, static_extent);
        self.vars[a].derived = Derived::Fused {
            fused: f,
            inner: b,
            is_outer: true,
        };
        self.vars[b].derived = Derived::Fused {
            fused: f,
            inner: b,
            is_outer: false,
        };
        self.loops.splice(pa..=pb, [f]);
        Ok(())
    }

    /// Permute the listed loops (innermost first) among the positions they
    /// occupy. Unlisted loops stay where they are.
    pub fn reorder(&mut self, vars: &[String]) -> Result<(), ScheduleValidationError> {
        let mut positions = Vec::with_capacity(vars.len());
        for (i, v) in vars.iter().enumerate() {
            if vars[..i].contains(v) {
                return Err(ScheduleValidationError::DuplicateReorder {
                    stage: self.stage.clone(),
                    var: v.clone(),
                });
            }
            positions.push(self.find(v)?);
        }
        let moved: Vec<usize> = positions.iter().rev().map(|&p| self.loops[p]).collect();
        positions.sort_unstable();
        for (pos, var) in positions.into_iter().zip(moved) {
            self.loops[pos] = var;
        }
        Ok(())
    }

    pub fn mark(&mut self, var: &str, kind: LoopKind) -> Result<(), ScheduleValidationError> {
        let pos = self.find(var)?;
        let v = self.loops[pos];
        self.check_unmarked(v)?;
        self.vars[v].kind = kind;
        Ok(())
    }

    /// Mark `var` directly when its static extent is `width`, otherwise split
    /// off an inner loop of `width` named `var{suffix}` and mark that.
    fn mark_with_split(
        &mut self,
        var: &str,
        width: i64,
        suffix: &str,
        kind: LoopKind,
    ) -> Result<(), ScheduleValidationError> {
        let pos = self.find(var)?;
        if self.vars[self.loops[pos]].static_extent == Some(width) {
            return self.mark(var, kind);
        }
        let inner = format!("{}{}", var, suffix);
        self.split(var, var, &inner, width)?;
        self.mark(&inner, kind)
    }

    fn check_width(&self, width: i64) -> Result<u32, ScheduleValidationError> {
        u32::try_from(width)
            .ok()
            .filter(|&w| w > 0)
            .ok_or(ScheduleValidationError::NonPositiveWidth {
                stage: self.stage.clone(),
                width,
            })
    }

    fn find(&self, var: &str) -> Result<usize, ScheduleValidationError> {
        self.loop_position(var)
            .ok_or_else(|| ScheduleValidationError::UnknownVar {
                stage: self.stage.clone(),
                var: var.to_string(),
            })
    }

    fn check_unmarked(&self, v: usize) -> Result<(), ScheduleValidationError> {
        match self.vars[v].kind {
            LoopKind::Serial => Ok(()),
            existing => Err(ScheduleValidationError::AlreadyMarked {
                stage: self.stage.clone(),
                var: self.vars[v].name.clone(),
                existing: existing.to_string(),
            }),
        }
    }

    fn in_use(&self, name: &str) -> ScheduleValidationError {
        ScheduleValidationError::VarInUse {
            stage: self.stage.clone(),
            var: name.to_string(),
        }
    }

    fn push_var(&mut self, name: &str, origin: Origin, static_extent: Option<i64>) -> usize {
        self.vars.push(PlanVar {
            name: name.to_string(),
            origin,
            derived: Derived::Loop,
            static_extent,
            kind: LoopKind::Serial,
        });
        self.vars.len() - 1
    }

    /// Fix extents for `region`.
    pub fn instantiate(&self, region: &Region) -> LoopNest<'_> {
        assert_eq!(region.rank(), self.rank, "instantiate: rank mismatch");
        let Some(bounds) = region.intervals() else {
            return LoopNest {
                plan: self,
                base: vec![0; self.rank],
                extent: vec![0; self.vars.len()],
                empty: true,
            };
        };

        let mut extent = vec![0i64; self.vars.len()];
        for (i, var) in self.vars.iter().enumerate() {
            extent[i] = match var.origin {
                Origin::Dim(d) => bounds[d].extent() as i64,
                Origin::SplitOuter { parent, factor } => {
                    let e = extent[parent];
                    let f = effective_factor(factor, e);
                    (e + f - 1) / f
                }
                Origin::SplitInner { parent, factor } => effective_factor(factor, extent[parent]),
                Origin::Fused { outer, inner } => extent[outer] * extent[inner],
            };
        }
        LoopNest {
            plan: self,
            base: bounds.iter().map(|iv| iv.min).collect(),
            extent,
            empty: false,
        }
    }
}

fn effective_factor(factor: i64, extent: i64) -> i64 {
    factor.min(extent).max(1)
}

// ── Concrete nest ───────────────────────────────────────────────────────────

/// A loop shown to renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopInfo<'a> {
    pub name: &'a str,
    pub extent: i64,
    pub kind: LoopKind,
}

/// A plan with extents fixed for one region.
#[derive(Debug, Clone)]
pub struct LoopNest<'p> {
    plan: &'p NestPlan,
    base: Vec<i64>,
    extent: Vec<i64>,
    empty: bool,
}

impl<'p> LoopNest<'p> {
    pub fn plan(&self) -> &'p NestPlan {
        self.plan
    }

    /// Lanes charged per element, 1 when no loop is vectorized. The vector
    /// width is capped at the vectorized loop's extent in this instance.
    pub fn lanes(&self) -> u32 {
        self.plan
            .loops
            .iter()
            .find_map(|&v| match self.plan.vars[v].kind {
                LoopKind::Vectorized(w) => {
                    let e = u32::try_from(self.extent[v]).unwrap_or(u32::MAX);
                    Some(w.min(e).max(1))
                }
                _ => None,
            })
            .unwrap_or(1)
    }

    pub fn depth(&self) -> usize {
        self.plan.loops.len()
    }

    /// True when the nest has no iterations.
    pub fn is_empty(&self) -> bool {
        self.empty || self.plan.loops.iter().any(|&v| self.extent[v] == 0)
    }

    pub fn loops(&self) -> impl Iterator<Item = LoopInfo<'p>> + '_ {
        let plan = self.plan;
        plan.loops.iter().map(move |&v| LoopInfo {
            name: &plan.vars[v].name,
            extent: self.extent[v],
            kind: plan.vars[v].kind,
        })
    }

    /// Number of iterations, counting duplicates from clamped splits.
    pub fn iterations(&self) -> u64 {
        if self.is_empty() {
            return 0;
        }
        self.plan
            .loops
            .iter()
            .map(|&v| self.extent[v] as u64)
            .product()
    }

    pub fn cursor(&self) -> NestCursor<'_, 'p> {
        NestCursor {
            nest: self,
            indices: vec![0; self.depth()],
            started: false,
            done: false,
        }
    }

    /// Every visited coordinate in walk order.
    pub fn points(&self) -> Vec<Vec<i64>> {
        let mut out = Vec::new();
        let mut cursor = self.cursor();
        while cursor.advance().is_some() {
            out.push(cursor.coord());
        }
        out
    }

    /// Coordinate visited at the given loop indices (outermost first).
    pub fn coord_of(&self, indices: &[i64]) -> Vec<i64> {
        let fixed: Vec<(i64, i64)> = indices.iter().map(|&i| (i, i)).collect();
        self.evaluate(&fixed)
            .into_iter()
            .map(|(lo, _)| lo)
            .collect()
    }

    /// Bounding box of the coordinates visited while the outer
    /// `prefix.len()` loops hold the given indices.
    pub fn group_region(&self, prefix: &[i64]) -> Region {
        if self.is_empty() {
            return Region::empty(self.plan.rank);
        }
        let mut ranges: Vec<(i64, i64)> = self
            .plan
            .loops
            .iter()
            .map(|&v| (0, self.extent[v] - 1))
            .collect();
        for (r, &i) in ranges.iter_mut().zip(prefix) {
            *r = (i, i);
        }
        Region::new(&self.evaluate(&ranges))
    }

    /// The index prefixes of loops `0..=level` in walk order, one per group
    /// of a `compute_at` at that level.
    pub fn groups(&self, level: usize) -> Vec<Vec<i64>> {
        if self.is_empty() {
            return Vec::new();
        }
        let extents: Vec<i64> = self.plan.loops[..=level]
            .iter()
            .map(|&v| self.extent[v])
            .collect();
        let mut out = Vec::new();
        let mut idx = vec![0i64; extents.len()];
        loop {
            out.push(idx.clone());
            let mut pos = extents.len();
            loop {
                if pos == 0 {
                    return out;
                }
                pos -= 1;
                if idx[pos] + 1 < extents[pos] {
                    idx[pos] += 1;
                    break;
                }
                idx[pos] = 0;
            }
        }
    }

    /// Interval of every pure dimension, given an index interval per loop.
    /// Every reconstruction is monotone in its operands except `b = f % Eb`,
    /// which spans all of `[0, Eb)` once `f` crosses a block.
    fn evaluate(&self, loop_ranges: &[(i64, i64)]) -> Vec<(i64, i64)> {
        let plan = self.plan;
        let mut val = vec![(0i64, 0i64); plan.vars.len()];
        for (&v, &r) in plan.loops.iter().zip(loop_ranges) {
            val[v] = r;
        }
        for i in (0..plan.vars.len()).rev() {
            match plan.vars[i].derived {
                Derived::Loop => {}
                Derived::Split { outer, inner } => {
                    let e = self.extent[i];
                    let f = self.extent[inner];
                    let (olo, ohi) = val[outer];
                    let (ilo, ihi) = val[inner];
                    val[i] = ((olo * f).min(e - f) + ilo, (ohi * f).min(e - f) + ihi);
                }
                Derived::Fused {
                    fused,
                    inner,
                    is_outer,
                } => {
                    let eb = self.extent[inner];
                    let (lo, hi) = val[fused];
                    val[i] = if is_outer {
                        (lo / eb, hi / eb)
                    } else if lo / eb == hi / eb {
                        (lo % eb, hi % eb)
                    } else {
                        (0, eb - 1)
                    };
                }
            }
        }
        (0..plan.rank)
            .map(|d| (self.base[d] + val[d].0, self.base[d] + val[d].1))
            .collect()
    }
}

/// Lexicographic walk over a nest's loop indices.
#[derive(Debug)]
pub struct NestCursor<'n, 'p> {
    nest: &'n LoopNest<'p>,
    indices: Vec<i64>,
    started: bool,
    done: bool,
}

impl NestCursor<'_, '_> {
    /// Step to the next iteration. Returns the position of the outermost loop
    /// whose index changed (0 on the first step), or `None` when done.
    pub fn advance(&mut self) -> Option<usize> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            self.done = self.nest.is_empty();
            return if self.done { None } else { Some(0) };
        }
        let plan = self.nest.plan;
        let mut pos = self.indices.len();
        while pos > 0 {
            pos -= 1;
            if self.indices[pos] + 1 < self.nest.extent[plan.loops[pos]] {
                self.indices[pos] += 1;
                return Some(pos);
            }
            self.indices[pos] = 0;
        }
        self.done = true;
        None
    }

    pub fn indices(&self) -> &[i64] {
        &self.indices
    }

    pub fn coord(&self) -> Vec<i64> {
        self.nest.coord_of(&self.indices)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
