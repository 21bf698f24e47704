// region.rs — N-dimensional integer boxes
//
// The value type every other phase speaks in. A region is an ordered tuple of
// closed intervals `[min, max]`, one per dimension, or the canonical empty
// region of a given rank.
//
// `union_bound` is the smallest enclosing box of its operands, not a set
// union. Enclosing a non-rectangular required set in its bounding box
// over-requests work, and that over-request is where most of the redundant
// computation in tiled schedules comes from.
//
// Preconditions: binary operations take operands of equal rank.
// Postconditions: results are normalized (no interval with `min > max`).
// Failure modes: rank mismatch panics (programmer error).
// Side effects: none.

use std::fmt;

use serde::Serialize;

// ── Interval ────────────────────────────────────────────────────────────────

/// Closed integer interval `[min, max]`. Only ever stored with `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Interval {
    pub min: i64,
    pub max: i64,
}

impl Interval {
    pub fn new(min: i64, max: i64) -> Self {
        Interval { min, max }
    }

    /// Number of integers in the interval.
    pub fn extent(&self) -> u64 {
        (self.max - self.min + 1) as u64
    }

    pub fn contains(&self, v: i64) -> bool {
        self.min <= v && v <= self.max
    }
}

// ── Region ──────────────────────────────────────────────────────────────────

/// An axis-aligned integer box. Immutable; every operation returns a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Region {
    rank: usize,
    /// `None` is the canonical empty region.
    bounds: Option<Vec<Interval>>,
}

impl Region {
    /// Build from closed `[min, max]` pairs. Any `min > max` yields the empty
    /// region of that rank.
    pub fn new(bounds: &[(i64, i64)]) -> Self {
        let rank = bounds.len();
        if bounds.iter().any(|&(lo, hi)| lo > hi) {
            return Region::empty(rank);
        }
        Region {
            rank,
            bounds: Some(
                bounds
                    .iter()
                    .map(|&(min, max)| Interval::new(min, max))
                    .collect(),
            ),
        }
    }

    /// Build from half-open `[lo, hi)` pairs, e.g. `[(0, 4), (0, 4)]` for a 4x4 box.
    pub fn half_open(bounds: &[(i64, i64)]) -> Self {
        let closed: Vec<(i64, i64)> = bounds.iter().map(|&(lo, hi)| (lo, hi - 1)).collect();
        Region::new(&closed)
    }

    /// Build from `(min, extent)` pairs, the shape `realize(w, h)` asks for.
    pub fn from_extents(dims: &[(i64, u64)]) -> Self {
        let closed: Vec<(i64, i64)> = dims
            .iter()
            .map(|&(min, extent)| (min, min + extent as i64 - 1))
            .collect();
        Region::new(&closed)
    }

    pub fn empty(rank: usize) -> Self {
        Region { rank, bounds: None }
    }

    /// A single coordinate.
    pub fn point(coord: &[i64]) -> Self {
        Region {
            rank: coord.len(),
            bounds: Some(coord.iter().map(|&c| Interval::new(c, c)).collect()),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    /// Per-dimension intervals, or `None` when empty.
    pub fn intervals(&self) -> Option<&[Interval]> {
        self.bounds.as_deref()
    }

    pub fn interval(&self, dim: usize) -> Option<Interval> {
        self.bounds.as_ref().map(|b| b[dim])
    }

    /// Size along each dimension; all zeros when empty.
    pub fn extents(&self) -> Vec<u64> {
        match &self.bounds {
            Some(b) => b.iter().map(Interval::extent).collect(),
            None => vec![0; self.rank],
        }
    }

    /// Number of coordinates in the region.
    pub fn volume(&self) -> u64 {
        match &self.bounds {
            Some(b) => b.iter().map(Interval::extent).product(),
            None => 0,
        }
    }

    pub fn contains_point(&self, coord: &[i64]) -> bool {
        match &self.bounds {
            Some(b) => b.iter().zip(coord).all(|(iv, &c)| iv.contains(c)),
            None => false,
        }
    }

    /// Subset test. The empty region is contained in everything.
    pub fn contains(&self, other: &Region) -> bool {
        self.check_rank(other);
        match (&self.bounds, &other.bounds) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(b)) => a
                .iter()
                .zip(b)
                .all(|(outer, inner)| outer.min <= inner.min && inner.max <= outer.max),
        }
    }

    pub fn intersect(&self, other: &Region) -> Region {
        self.check_rank(other);
        match (&self.bounds, &other.bounds) {
            (Some(a), Some(b)) => {
                let pairs: Vec<(i64, i64)> = a
                    .iter()
                    .zip(b)
                    .map(|(x, y)| (x.min.max(y.min), x.max.min(y.max)))
                    .collect();
                Region::new(&pairs)
            }
            _ => Region::empty(self.rank),
        }
    }

    /// Smallest box enclosing both operands. The empty region is the identity.
    pub fn union_bound(&self, other: &Region) -> Region {
        self.check_rank(other);
        match (&self.bounds, &other.bounds) {
            (Some(a), Some(b)) => Region {
                rank: self.rank,
                bounds: Some(
                    a.iter()
                        .zip(b)
                        .map(|(x, y)| Interval::new(x.min.min(y.min), x.max.max(y.max)))
                        .collect(),
                ),
            },
            (Some(_), None) => self.clone(),
            (None, _) => other.clone(),
        }
    }

    pub fn translate(&self, offset: &[i64]) -> Region {
        assert_eq!(offset.len(), self.rank, "translate: rank mismatch");
        self.map_bounds(|dim, iv| (iv.min + offset[dim], iv.max + offset[dim]))
    }

    /// Grow by `radius[d]` on both sides of dimension `d`.
    pub fn expand(&self, radius: &[i64]) -> Region {
        assert_eq!(radius.len(), self.rank, "expand: rank mismatch");
        self.map_bounds(|dim, iv| (iv.min - radius[dim], iv.max + radius[dim]))
    }

    /// Grow by `r` on both sides of every dimension.
    pub fn expand_uniform(&self, r: i64) -> Region {
        self.expand(&vec![r; self.rank])
    }

    /// Shift the lower bound by `lo[d]` and the upper bound by `hi[d]`.
    pub fn widen(&self, lo: &[i64], hi: &[i64]) -> Region {
        assert_eq!(lo.len(), self.rank, "widen: rank mismatch");
        assert_eq!(hi.len(), self.rank, "widen: rank mismatch");
        self.map_bounds(|dim, iv| (iv.min + lo[dim], iv.max + hi[dim]))
    }

    /// Restrict to `domain`. Same as `intersect`; named for intent.
    pub fn clamp(&self, domain: &Region) -> Region {
        self.intersect(domain)
    }

    /// Clamp each bound into `domain` independently, the way a boundary
    /// condition clamps coordinates. Unlike `clamp`, a region lying entirely
    /// outside the domain maps onto the domain's nearest edge instead of
    /// vanishing.
    pub fn clamp_coordinates(&self, domain: &Region) -> Region {
        self.check_rank(domain);
        let Some(dom) = domain.intervals() else {
            return Region::empty(self.rank);
        };
        self.map_bounds(|dim, iv| {
            let d = dom[dim];
            (iv.min.clamp(d.min, d.max), iv.max.clamp(d.min, d.max))
        })
    }

    /// Per-dimension amount by which `self` sticks out of `domain`:
    /// `(below, above)`, zero where it fits.
    pub fn overshoot(&self, domain: &Region) -> Vec<(u64, u64)> {
        match (&self.bounds, &domain.bounds) {
            (Some(a), Some(d)) => a
                .iter()
                .zip(d)
                .map(|(iv, dom)| {
                    (
                        (dom.min - iv.min).max(0) as u64,
                        (iv.max - dom.max).max(0) as u64,
                    )
                })
                .collect(),
            (Some(a), None) => a.iter().map(|iv| (iv.extent(), 0)).collect(),
            (None, _) => vec![(0, 0); self.rank],
        }
    }

    /// Visit every coordinate, last dimension outermost and dimension 0
    /// innermost (row-major for `(x, y)`).
    pub fn for_each_point(&self, mut f: impl FnMut(&[i64])) {
        let Some(b) = &self.bounds else {
            return;
        };
        let mut coord: Vec<i64> = b.iter().map(|iv| iv.min).collect();
        loop {
            f(&coord);
            let mut d = 0;
            loop {
                if d == coord.len() {
                    return;
                }
                if coord[d] < b[d].max {
                    coord[d] += 1;
                    break;
                }
                coord[d] = b[d].min;
                d += 1;
            }
        }
    }

    fn map_bounds(&self, f: impl Fn(usize, &Interval) -> (i64, i64)) -> Region {
        match &self.bounds {
            Some(b) => {
                let pairs: Vec<(i64, i64)> =
                    b.iter().enumerate().map(|(d, iv)| f(d, iv)).collect();
                Region::new(&pairs)
            }
            None => self.clone(),
        }
    }

    fn check_rank(&self, other: &Region) {
        assert_eq!(
            self.rank, other.rank,
            "region rank mismatch: {} vs {}",
            self, other
        );
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bounds {
            None => write!(f, "<empty/{}>", self.rank),
            Some(b) if b.is_empty() => write!(f, "<scalar>"),
            Some(b) => {
                for (i, iv) in b.iter().enumerate() {
                    if i > 0 {
                        write!(f, " x ")?;
                    }
                    write!(f, "[{}, {})", iv.min, iv.max + 1)?;
                }
                Ok(())
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
