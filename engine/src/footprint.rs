// footprint.rs — Footprint resolver
//
// Maps a region of a consumer to the region of one producer it reads. Every
// kind maps the empty region to the empty region and is monotone: a larger
// consumer region never yields a smaller producer region. Bounds inference
// merges repeated requests with `union_bound`, which is only sound under
// monotonicity, so custom footprints are probed at schedule validation.
//
// Preconditions: edge ranks were checked by the pipeline builder.
// Postconditions: the result has the producer's rank.
// Failure modes: none at resolve time; rank errors surface from `check_ranks`.
// Side effects: none.

use std::fmt;
use std::sync::Arc;

use crate::graph::Stage;
use crate::region::Region;

// ── Custom footprints ───────────────────────────────────────────────────────

/// A user-supplied footprint. Implementations must be monotone and map the
/// empty region to the empty region.
pub trait FootprintFn: fmt::Debug + Send + Sync {
    /// Producer region read when computing `consumer`. `producer_domain` is
    /// the producer's declared valid domain, if any.
    fn required(&self, consumer: &Region, producer_domain: Option<&Region>) -> Region;

    /// Short label used by renderers.
    fn describe(&self) -> String {
        "custom".to_string()
    }
}

// ── Footprint kinds ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Footprint {
    /// Producer region equals consumer region.
    Pointwise,
    /// Symmetric stencil: grow by `radii[d]` on both sides of dimension `d`.
    Stencil { radii: Vec<i64> },
    /// Asymmetric window of inclusive offsets: consumer `x` reads
    /// `x + lo[d] ..= x + hi[d]`.
    Window { lo: Vec<i64>, hi: Vec<i64> },
    /// The producer's entire valid domain, whatever the consumer region.
    Reduction,
    /// Boundary condition: coordinates clamped into the producer's domain.
    Clamp,
    Custom(Arc<dyn FootprintFn>),
}

impl PartialEq for Footprint {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Footprint::Pointwise, Footprint::Pointwise) => true,
            (Footprint::Stencil { radii: a }, Footprint::Stencil { radii: b }) => a == b,
            (Footprint::Window { lo: a, hi: b }, Footprint::Window { lo: c, hi: d }) => {
                a == c && b == d
            }
            (Footprint::Reduction, Footprint::Reduction) => true,
            (Footprint::Clamp, Footprint::Clamp) => true,
            (Footprint::Custom(a), Footprint::Custom(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Footprint {
    pub fn stencil(radii: &[i64]) -> Self {
        Footprint::Stencil {
            radii: radii.to_vec(),
        }
    }

    /// Window from `(lo, hi)` offset pairs, one per dimension.
    pub fn window(offsets: &[(i64, i64)]) -> Self {
        Footprint::Window {
            lo: offsets.iter().map(|&(lo, _)| lo).collect(),
            hi: offsets.iter().map(|&(_, hi)| hi).collect(),
        }
    }

    pub fn custom(f: impl FootprintFn + 'static) -> Self {
        Footprint::Custom(Arc::new(f))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Footprint::Pointwise => "pointwise",
            Footprint::Stencil { .. } => "stencil",
            Footprint::Window { .. } => "window",
            Footprint::Reduction => "reduction",
            Footprint::Clamp => "clamp",
            Footprint::Custom(_) => "custom",
        }
    }

    /// Whether resolving this footprint needs the producer's valid domain.
    pub fn needs_domain(&self) -> bool {
        matches!(self, Footprint::Reduction | Footprint::Clamp)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Footprint::Custom(_))
    }

    /// Check that this footprint fits a consumer of rank `consumer` reading a
    /// producer of rank `producer`. Returns a description of the mismatch.
    pub fn check_ranks(&self, consumer: usize, producer: usize) -> Result<(), String> {
        let same_rank = || {
            if consumer == producer {
                Ok(())
            } else {
                Err(format!(
                    "consumer has {} dimensions, producer has {}",
                    consumer, producer
                ))
            }
        };
        match self {
            Footprint::Pointwise | Footprint::Clamp => same_rank(),
            Footprint::Stencil { radii } => {
                same_rank()?;
                if radii.len() != consumer {
                    return Err(format!("{} radii for {} dimensions", radii.len(), consumer));
                }
                if let Some(r) = radii.iter().find(|&&r| r < 0) {
                    return Err(format!("negative radius {}", r));
                }
                Ok(())
            }
            Footprint::Window { lo, hi } => {
                same_rank()?;
                if lo.len() != consumer || hi.len() != consumer {
                    return Err(format!("{} offsets for {} dimensions", lo.len(), consumer));
                }
                if let Some((l, h)) = lo.iter().zip(hi).find(|(l, h)| l > h) {
                    return Err(format!("inverted window {}:{}", l, h));
                }
                Ok(())
            }
            Footprint::Reduction | Footprint::Custom(_) => Ok(()),
        }
    }
}

impl fmt::Display for Footprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Footprint::Pointwise => write!(f, "pointwise"),
            Footprint::Stencil { radii } => {
                let r: Vec<String> = radii.iter().map(|r| r.to_string()).collect();
                write!(f, "stencil({})", r.join(", "))
            }
            Footprint::Window { lo, hi } => {
                let w: Vec<String> = lo
                    .iter()
                    .zip(hi)
                    .map(|(l, h)| format!("{}:{}", l, h))
                    .collect();
                write!(f, "window({})", w.join(", "))
            }
            Footprint::Reduction => write!(f, "reduce"),
            Footprint::Clamp => write!(f, "clamp"),
            Footprint::Custom(c) => write!(f, "{}", c.describe()),
        }
    }
}

// ── Resolution ──────────────────────────────────────────────────────────────

/// Region of `producer` read when computing `consumer_region` through
/// `footprint`.
///
/// Stencils, windows and pointwise reads are clipped to a computed producer's
/// declared domain. They are never clipped to an input's domain: reading an
/// input outside its domain is an out-of-bounds request, reported by bounds
/// inference.
pub fn required_region(footprint: &Footprint, consumer_region: &Region, producer: &Stage) -> Region {
    let rank = producer.rank();
    if consumer_region.is_empty() {
        return Region::empty(rank);
    }
    let clip = |r: Region| match producer.computed_domain() {
        Some(dom) => r.clamp(dom),
        None => r,
    };
    match footprint {
        Footprint::Pointwise => clip(consumer_region.clone()),
        Footprint::Stencil { radii } => clip(consumer_region.expand(radii)),
        Footprint::Window { lo, hi } => clip(consumer_region.widen(lo, hi)),
        Footprint::Reduction => producer
            .domain()
            .cloned()
            .unwrap_or_else(|| Region::empty(rank)),
        Footprint::Clamp => match producer.domain() {
            Some(dom) => consumer_region.clamp_coordinates(dom),
            None => Region::empty(rank),
        },
        Footprint::Custom(f) => f.required(consumer_region, producer.domain()),
    }
}

/// Probe a footprint with nested consumer regions and return the first pair
/// `(smaller, larger)` whose images are not nested.
pub fn probe_monotonic(
    footprint: &Footprint,
    consumer_rank: usize,
    producer: &Stage,
) -> Option<(Region, Region)> {
    let cube = |lo: i64, hi: i64| Region::new(&vec![(lo, hi); consumer_rank]);
    let probes = [
        (Region::empty(consumer_rank), cube(0, 0)),
        (cube(0, 0), cube(-2, 2)),
        (cube(0, 3), cube(-1, 5)),
        (cube(4, 7), cube(0, 15)),
        (cube(-8, -5), cube(-16, 0)),
    ];
    for (small, large) in probes {
        let a = required_region(footprint, &small, producer);
        let b = required_region(footprint, &large, producer);
        if a.rank() != b.rank() || !b.contains(&a) {
            return Some((small, large));
        }
    }
    None
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PipelineBuilder;

    fn r(b: &[(i64, i64)]) -> Region {
        Region::half_open(b)
    }

    /// A pipeline holding one input over [0,8)^2 and one bounded computed
    /// stage over [0,4)^2, both rank 2.
    fn stages() -> (Stage, Stage) {
        let mut b = PipelineBuilder::new();
        let input = b.input("in", &["x", "y"], r(&[(0, 8), (0, 8)])).unwrap();
        let f = b
            .add_stage("f", &["x", "y"], vec![(input, Footprint::Pointwise)])
            .unwrap();
        b.with_domain(f, r(&[(0, 4), (0, 4)])).unwrap();
        let p = b.build().unwrap();
        (p.stage(input).clone(), p.stage(f).clone())
    }

    #[test]
    fn stencil_is_not_clipped_to_input_domain() {
        let (input, _) = stages();
        let got = required_region(&Footprint::stencil(&[1, 0]), &r(&[(0, 8), (0, 8)]), &input);
        assert_eq!(got, r(&[(-1, 9), (0, 8)]));
    }

    #[test]
    fn stencil_is_clipped_to_computed_domain() {
        let (_, f) = stages();
        let got = required_region(&Footprint::stencil(&[1, 1]), &r(&[(0, 4), (0, 4)]), &f);
        assert_eq!(got, r(&[(0, 4), (0, 4)]));
    }

    #[test]
    fn window_reads_forward() {
        let (input, _) = stages();
        let fp = Footprint::window(&[(0, 2), (0, 0)]);
        assert_eq!(
            required_region(&fp, &r(&[(0, 4), (0, 4)]), &input),
            r(&[(0, 6), (0, 4)])
        );
    }

    #[test]
    fn reduction_ignores_consumer_size() {
        let (input, _) = stages();
        let small = required_region(&Footprint::Reduction, &Region::point(&[3, 3]), &input);
        let large = required_region(&Footprint::Reduction, &r(&[(0, 2), (0, 2)]), &input);
        assert_eq!(small, r(&[(0, 8), (0, 8)]));
        assert_eq!(small, large);
        assert!(required_region(&Footprint::Reduction, &Region::empty(2), &input).is_empty());
    }

    #[test]
    fn clamp_maps_outside_reads_to_edge() {
        let (input, _) = stages();
        let got = required_region(&Footprint::Clamp, &r(&[(-3, 2), (6, 12)]), &input);
        assert_eq!(got, r(&[(0, 2), (6, 8)]));
    }

    #[test]
    fn empty_maps_to_empty_for_every_kind() {
        let (input, _) = stages();
        for fp in [
            Footprint::Pointwise,
            Footprint::stencil(&[1, 1]),
            Footprint::window(&[(-1, 1), (0, 3)]),
            Footprint::Reduction,
            Footprint::Clamp,
        ] {
            assert!(required_region(&fp, &Region::empty(2), &input).is_empty(), "{}", fp);
        }
    }

    #[derive(Debug)]
    struct Shrinking;

    impl FootprintFn for Shrinking {
        fn required(&self, consumer: &Region, _: Option<&Region>) -> Region {
            // Smaller output for larger input: the larger the box, the more it shrinks.
            let grow = consumer.extents().first().map_or(0, |&e| 4 - e as i64);
            consumer.expand_uniform(grow)
        }
    }

    #[test]
    fn probe_flags_shrinking_custom() {
        let (input, _) = stages();
        assert!(probe_monotonic(&Footprint::custom(Shrinking), 2, &input).is_some());
        assert!(probe_monotonic(&Footprint::stencil(&[2, 1]), 2, &input).is_none());
    }

    #[test]
    fn rank_checks() {
        assert!(Footprint::Pointwise.check_ranks(2, 2).is_ok());
        assert!(Footprint::Pointwise.check_ranks(2, 3).is_err());
        assert!(Footprint::stencil(&[1]).check_ranks(2, 2).is_err());
        assert!(Footprint::stencil(&[-1, 0]).check_ranks(2, 2).is_err());
        assert!(Footprint::window(&[(2, 0), (0, 0)]).check_ranks(2, 2).is_err());
        assert!(Footprint::Reduction.check_ranks(1, 3).is_ok());
    }

    #[test]
    fn display() {
        assert_eq!(Footprint::window(&[(0, 2), (0, 0)]).to_string(), "window(0:2, 0:0)");
        assert_eq!(Footprint::stencil(&[1, 0]).to_string(), "stencil(1, 0)");
    }
}
