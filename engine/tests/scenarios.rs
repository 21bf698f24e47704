// Scenario tests for the separable box blur and the tutorial loop orders.
//
// Covers:
// 1. Bounds and cost of the blur under root, per-pixel and tiled schedules
// 2. Inline recomputation and storage generations
// 3. Loop orders of the scheduling tutorials (reorder, split, fuse, tile)
// 4. Error taxonomy: cycles, invalid schedules, out-of-bounds inputs, empty regions

use std::collections::BTreeSet;

use psim::error::{Error, GraphError, ScheduleValidationError};
use psim::{
    cost, infer, simulate, Baseline, EvaluationEvent, Footprint, Pipeline, PipelineBuilder, Region,
    Schedule, ScheduleBuilder, StageId,
};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn r(b: &[(i64, i64)]) -> Region {
    Region::half_open(b)
}

fn out4() -> Region {
    r(&[(0, 4), (0, 4)])
}

/// 3×3 separable box blur over an input large enough for any 4×4 request.
fn blur() -> Pipeline {
    let mut b = PipelineBuilder::new();
    let input = b
        .input("input", &["x", "y"], r(&[(-8, 72), (-8, 72)]))
        .unwrap();
    let bx = b
        .add_stage("blur_x", &["x", "y"], vec![(input, Footprint::stencil(&[1, 0]))])
        .unwrap();
    b.add_stage("blur_y", &["x", "y"], vec![(bx, Footprint::stencil(&[0, 1]))])
        .unwrap();
    b.build().unwrap()
}

fn id(p: &Pipeline, name: &str) -> StageId {
    p.find(name).unwrap()
}

fn events_of<'a>(events: &'a [EvaluationEvent], s: StageId) -> Vec<&'a EvaluationEvent> {
    events.iter().filter(|e| e.stage == s).collect()
}

/// A single computed stage with no producers, for loop-order tests.
fn gradient() -> (Pipeline, StageId) {
    let mut b = PipelineBuilder::new();
    let g = b.add_stage("gradient", &["x", "y"], vec![]).unwrap();
    (b.build().unwrap(), g)
}

fn order(schedule: &ScheduleBuilder, region: &Region) -> Vec<(i64, i64)> {
    let (p, g) = gradient();
    let s = schedule.build(&p).unwrap();
    simulate(&p, &s, g, region)
        .unwrap()
        .into_iter()
        .map(|e| (e.coord[0], e.coord[1]))
        .collect()
}

// ── Blur scenarios ──────────────────────────────────────────────────────────

#[test]
fn scenario_a_all_root() {
    let p = blur();
    let (bx, by) = (id(&p, "blur_x"), id(&p, "blur_y"));
    let s = Schedule::all_root(&p);
    let bounds = infer(&p, &s, by, &out4()).unwrap();
    assert_eq!(bounds.required(by), Some(&out4()));
    assert_eq!(bounds.required(bx), Some(&r(&[(0, 4), (-1, 5)])));

    let events = simulate(&p, &s, by, &out4()).unwrap();
    assert_eq!(events_of(&events, bx).len(), 24);
    assert_eq!(events_of(&events, by).len(), 16);

    let baseline = Baseline::compute(&p, by, &out4()).unwrap();
    let report = cost(&p, &events, &bounds, &baseline);
    assert_eq!(report.stage("blur_x").unwrap().redundancy, 1.0);
    assert_eq!(report.redundancy_factor, 1.0);
}

#[test]
fn scenario_b_compute_at_innermost() {
    let p = blur();
    let (bx, by) = (id(&p, "blur_x"), id(&p, "blur_y"));
    let mut b = ScheduleBuilder::new();
    b.stage("blur_y").compute_root();
    b.stage("blur_x").compute_at("blur_y", "x");
    let s = b.build(&p).unwrap();

    let bounds = infer(&p, &s, by, &out4()).unwrap();
    assert_eq!(bounds.realizations(bx).len(), 16);

    let events = simulate(&p, &s, by, &out4()).unwrap();
    let bx_events = events_of(&events, bx);
    assert_eq!(bx_events.len(), 48);
    let generations: BTreeSet<_> = bx_events.iter().map(|e| e.generation).collect();
    assert_eq!(generations.len(), 16);

    // First group: the 1×3 column under blur_y(0, 0), then blur_y(0, 0) itself.
    let head: Vec<(StageId, Vec<i64>)> = events[..4]
        .iter()
        .map(|e| (e.stage, e.coord.clone()))
        .collect();
    assert_eq!(
        head,
        [
            (bx, vec![0, -1]),
            (bx, vec![0, 0]),
            (bx, vec![0, 1]),
            (by, vec![0, 0]),
        ]
    );
    // Groups follow blur_y's row-major walk.
    assert_eq!(events[7].coord, vec![1, 0]);

    let baseline = Baseline::compute(&p, by, &out4()).unwrap();
    let report = cost(&p, &events, &bounds, &baseline);
    assert_eq!(report.stage("blur_x").unwrap().redundancy, 2.0);
    assert_eq!(report.stage("blur_x").unwrap().generations, 16);
    assert_eq!(report.total_elements, 64);
    assert_eq!(report.baseline_total, 40);
}

#[test]
fn scenario_c_tiled() {
    let p = blur();
    let (bx, by) = (id(&p, "blur_x"), id(&p, "blur_y"));
    let mut b = ScheduleBuilder::new();
    b.stage("blur_y").tile("x", "y", "xo", "yo", "xi", "yi", 2, 2);
    b.stage("blur_x").compute_at("blur_y", "xo");
    let s = b.build(&p).unwrap();

    let bounds = infer(&p, &s, by, &out4()).unwrap();
    let regions: Vec<Region> = bounds
        .realizations(bx)
        .iter()
        .map(|re| re.region.clone())
        .collect();
    assert_eq!(
        regions,
        [
            r(&[(0, 2), (-1, 3)]),
            r(&[(2, 4), (-1, 3)]),
            r(&[(0, 2), (1, 5)]),
            r(&[(2, 4), (1, 5)]),
        ]
    );

    let events = simulate(&p, &s, by, &out4()).unwrap();
    assert_eq!(events_of(&events, bx).len(), 32);

    let baseline = Baseline::compute(&p, by, &out4()).unwrap();
    let report = cost(&p, &events, &bounds, &baseline);
    let factor = report.stage("blur_x").unwrap().redundancy;
    assert!((factor - 4.0 / 3.0).abs() < 1e-12, "factor {}", factor);
}

#[test]
fn inline_recomputes_per_pixel() {
    let p = blur();
    let (bx, by) = (id(&p, "blur_x"), id(&p, "blur_y"));
    let s = ScheduleBuilder::new().build(&p).unwrap();
    let bounds = infer(&p, &s, by, &out4()).unwrap();
    assert!(bounds.realizations(bx).is_empty());

    let events = simulate(&p, &s, by, &out4()).unwrap();
    let bx_events = events_of(&events, bx);
    assert_eq!(bx_events.len(), 48);
    assert!(bx_events.iter().all(|e| e.generation.is_none()));
}

#[test]
fn realized_stage_is_root_regardless_of_policy() {
    let p = blur();
    let bx = id(&p, "blur_x");
    let mut b = ScheduleBuilder::new();
    b.stage("blur_x").compute_inline();
    let s = b.build(&p).unwrap();
    let events = simulate(&p, &s, bx, &out4()).unwrap();
    assert_eq!(events.len(), 16);
    assert!(events.iter().all(|e| e.generation.is_some()));
}

#[test]
fn shared_producer_is_union_bounded() {
    // diamond: input → {left, right} → out
    let mut b = PipelineBuilder::new();
    let input = b.input("input", &["x"], r(&[(-8, 16)])).unwrap();
    let left = b
        .add_stage("left", &["x"], vec![(input, Footprint::window(&[(-2, 0)]))])
        .unwrap();
    let right = b
        .add_stage("right", &["x"], vec![(input, Footprint::window(&[(0, 3)]))])
        .unwrap();
    let out = b
        .add_stage(
            "out",
            &["x"],
            vec![(left, Footprint::Pointwise), (right, Footprint::Pointwise)],
        )
        .unwrap();
    let p = b.build().unwrap();
    let bounds = infer(&p, &Schedule::all_root(&p), out, &r(&[(0, 4)])).unwrap();
    assert_eq!(bounds.required(input), Some(&r(&[(-2, 7)])));
}

/// p → a (3×3 stencil) → c (pointwise), all domainless.
fn stencil_chain() -> (Pipeline, StageId) {
    let mut b = PipelineBuilder::new();
    let p = b.add_stage("p", &["x", "y"], vec![]).unwrap();
    let a = b
        .add_stage("a", &["x", "y"], vec![(p, Footprint::stencil(&[1, 1]))])
        .unwrap();
    let c = b
        .add_stage("c", &["x", "y"], vec![(a, Footprint::Pointwise)])
        .unwrap();
    (b.build().unwrap(), c)
}

#[test]
fn row_group_covers_readers_computed_inside_it() {
    let (p, c) = stencil_chain();
    let (sp, sa) = (id(&p, "p"), id(&p, "a"));
    let mut b = ScheduleBuilder::new();
    b.stage("p").compute_at("c", "y");
    b.stage("a").compute_at("c", "x");
    let s = b.build(&p).unwrap();
    let region = r(&[(0, 3), (0, 2)]);

    // c never reads p itself; each row of p is sized by the a pixels in it.
    let bounds = infer(&p, &s, c, &region).unwrap();
    let rows: Vec<Region> = bounds
        .realizations(sp)
        .iter()
        .map(|re| re.region.clone())
        .collect();
    assert_eq!(rows, [r(&[(-1, 4), (-1, 2)]), r(&[(-1, 4), (0, 3)])]);
    assert_eq!(bounds.realizations(sa).len(), 6);

    let events = simulate(&p, &s, c, &region).unwrap();
    assert_eq!(events_of(&events, sp).len(), 30);
    assert_eq!(events_of(&events, sa).len(), 6);
    // The whole first row of p is stored before a(0, 0) reads it.
    assert!(events[..15].iter().all(|e| e.stage == sp));
    assert_eq!((events[15].stage, events[15].coord.clone()), (sa, vec![0, 0]));
    assert_eq!((events[16].stage, events[16].coord.clone()), (c, vec![0, 0]));
}

#[test]
fn compute_at_inside_compute_at() {
    let (p, c) = stencil_chain();
    let (sp, sa) = (id(&p, "p"), id(&p, "a"));
    let mut b = ScheduleBuilder::new();
    b.stage("a").compute_at("c", "y");
    b.stage("p").compute_at("a", "x");
    let s = b.build(&p).unwrap();
    let region = r(&[(0, 3), (0, 2)]);

    let bounds = infer(&p, &s, c, &region).unwrap();
    assert_eq!(
        bounds
            .realizations(sa)
            .iter()
            .map(|re| re.region.clone())
            .collect::<Vec<_>>(),
        [r(&[(0, 3), (0, 1)]), r(&[(0, 3), (1, 2)])]
    );
    assert_eq!(bounds.realizations(sp).len(), 6);
    assert_eq!(bounds.realizations(sp)[0].region, r(&[(-1, 2), (-1, 2)]));

    let events = simulate(&p, &s, c, &region).unwrap();
    assert_eq!(events_of(&events, sp).len(), 54);
    // Row 0 of a: each pixel triggers its own 3×3 block of p first.
    assert!(events[..9].iter().all(|e| e.stage == sp));
    assert_eq!((events[9].stage, events[9].coord.clone()), (sa, vec![0, 0]));
    assert!(events[10..19].iter().all(|e| e.stage == sp));
    assert_eq!(events[10].coord, vec![0, -1]);

    let generations = |s: StageId| {
        events_of(&events, s)
            .iter()
            .map(|e| e.generation)
            .collect::<BTreeSet<_>>()
            .len()
    };
    assert_eq!(generations(sp), 6);
    assert_eq!(generations(sa), 2);
}

#[test]
fn empty_region_yields_no_events() {
    let p = blur();
    let by = id(&p, "blur_y");
    let s = Schedule::all_root(&p);
    let empty = Region::empty(2);
    assert!(simulate(&p, &s, by, &empty).unwrap().is_empty());

    let bounds = infer(&p, &s, by, &empty).unwrap();
    let mut sink = Vec::new();
    let summary = psim::simulate_into(&p, &s, &bounds, &mut sink, &Default::default()).unwrap();
    assert_eq!(summary.events, 0);
    assert!(sink.is_empty());
}

#[test]
fn infer_is_idempotent() {
    let p = blur();
    let by = id(&p, "blur_y");
    let mut b = ScheduleBuilder::new();
    b.stage("blur_y").tile("x", "y", "xo", "yo", "xi", "yi", 2, 2);
    b.stage("blur_x").compute_at("blur_y", "xo");
    let s = b.build(&p).unwrap();
    let first = infer(&p, &s, by, &out4()).unwrap();
    let second = infer(&p, &s, by, &out4()).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        simulate(&p, &s, by, &out4()).unwrap(),
        simulate(&p, &s, by, &out4()).unwrap()
    );
}

// ── Tutorial loop orders ────────────────────────────────────────────────────

#[test]
fn default_order_is_row_major() {
    let got = order(&ScheduleBuilder::new(), &r(&[(0, 2), (0, 2)]));
    assert_eq!(got, [(0, 0), (1, 0), (0, 1), (1, 1)]);
}

#[test]
fn reorder_walks_columns() {
    let mut b = ScheduleBuilder::new();
    b.stage("gradient").reorder(&["y", "x"]);
    let got = order(&b, &r(&[(0, 2), (0, 2)]));
    assert_eq!(got, [(0, 0), (0, 1), (1, 0), (1, 1)]);
}

#[test]
fn split_keeps_row_major_order() {
    let mut b = ScheduleBuilder::new();
    b.stage("gradient").split("x", "x_outer", "x_inner", 2);
    let got = order(&b, &r(&[(0, 4), (0, 2)]));
    let plain = order(&ScheduleBuilder::new(), &r(&[(0, 4), (0, 2)]));
    assert_eq!(got, plain);
}

#[test]
fn fuse_then_walk_matches_original() {
    let mut b = ScheduleBuilder::new();
    b.stage("gradient").fuse("y", "x", "fused");
    let got = order(&b, &r(&[(0, 3), (0, 2)]));
    let plain = order(&ScheduleBuilder::new(), &r(&[(0, 3), (0, 2)]));
    assert_eq!(got, plain);
}

#[test]
fn tile_walks_tile_by_tile() {
    let mut b = ScheduleBuilder::new();
    b.stage("gradient")
        .tile("x", "y", "x_outer", "y_outer", "x_inner", "y_inner", 2, 2);
    let got = order(&b, &r(&[(0, 4), (0, 4)]));
    assert_eq!(
        &got[..8],
        [
            (0, 0),
            (1, 0),
            (0, 1),
            (1, 1),
            (2, 0),
            (3, 0),
            (2, 1),
            (3, 1)
        ]
    );
    assert_eq!(got.len(), 16);
}

#[test]
fn uneven_split_recomputes_edge() {
    let mut b = ScheduleBuilder::new();
    b.stage("gradient").split("x", "x_outer", "x_inner", 3);
    let got: Vec<i64> = order(&b, &r(&[(0, 7), (0, 1)]))
        .into_iter()
        .map(|(x, _)| x)
        .collect();
    assert_eq!(got, [0, 1, 2, 3, 4, 5, 4, 5, 6]);
}

#[test]
fn vectorize_and_parallel_only_annotate() {
    let (p, g) = gradient();
    let mut b = ScheduleBuilder::new();
    b.stage("gradient")
        .tile("x", "y", "x_outer", "y_outer", "x_inner", "y_inner", 4, 4)
        .vectorize("x_inner", 4)
        .parallel("y_outer");
    let s = b.build(&p).unwrap();
    let events = simulate(&p, &s, g, &r(&[(0, 8), (0, 8)])).unwrap();
    assert_eq!(events.len(), 64);
    assert!(events.iter().all(|e| e.lanes == 4 && e.parallel));

    let mut plain = ScheduleBuilder::new();
    plain
        .stage("gradient")
        .tile("x", "y", "x_outer", "y_outer", "x_inner", "y_inner", 4, 4);
    let coords = |evs: &[EvaluationEvent]| -> Vec<Vec<i64>> {
        evs.iter().map(|e| e.coord.clone()).collect()
    };
    let plain_events = simulate(&p, &plain.build(&p).unwrap(), g, &r(&[(0, 8), (0, 8)])).unwrap();
    assert_eq!(coords(&events), coords(&plain_events));
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[test]
fn cycle_names_full_path() {
    let mut b = PipelineBuilder::new();
    let a = b.declare("a", &["x"]).unwrap();
    let c = b.add_stage("b", &["x"], vec![(a, Footprint::Pointwise)]).unwrap();
    let err = b.define(a, vec![(c, Footprint::Pointwise)]).unwrap_err();
    match err {
        GraphError::Cycle(cycle) => {
            assert_eq!(cycle.path.first(), cycle.path.last());
            assert!(cycle.path.contains(&"a".to_string()));
            assert!(cycle.path.contains(&"b".to_string()));
        }
        other => panic!("expected cycle, got {:?}", other),
    }
}

#[test]
fn compute_at_non_consumer_is_rejected() {
    let p = blur();
    let mut b = ScheduleBuilder::new();
    b.stage("blur_y").compute_at("blur_x", "x");
    let err = b.build(&p).unwrap_err();
    assert!(matches!(err, ScheduleValidationError::NotAConsumer { .. }));
}

#[test]
fn compute_at_unknown_level_lists_loops() {
    let p = blur();
    let mut b = ScheduleBuilder::new();
    b.stage("blur_x").compute_at("blur_y", "xo");
    match b.build(&p).unwrap_err() {
        ScheduleValidationError::UnknownLoopLevel { loops, .. } => assert_eq!(loops, ["y", "x"]),
        other => panic!("expected unknown loop level, got {:?}", other),
    }
}

#[test]
fn non_positive_split_factor_is_rejected() {
    let p = blur();
    let mut b = ScheduleBuilder::new();
    b.stage("blur_y").split("x", "xo", "xi", 0);
    assert!(matches!(
        b.build(&p).unwrap_err(),
        ScheduleValidationError::NonPositiveFactor { factor: 0, .. }
    ));
}

#[test]
fn input_overshoot_is_out_of_bounds() {
    let mut b = PipelineBuilder::new();
    let input = b.input("input", &["x", "y"], r(&[(0, 4), (0, 4)])).unwrap();
    let bx = b
        .add_stage("blur_x", &["x", "y"], vec![(input, Footprint::stencil(&[1, 0]))])
        .unwrap();
    let p = b.build().unwrap();
    let err = infer(&p, &Schedule::all_root(&p), bx, &out4()).unwrap_err();
    match err {
        Error::OutOfBounds(oob) => {
            assert_eq!(oob.stage, "input");
            assert_eq!(oob.overshoot.0, vec![(1, 1), (0, 0)]);
        }
        other => panic!("expected out of bounds, got {:?}", other),
    }
}

#[test]
fn clamp_stage_keeps_input_in_bounds() {
    let mut b = PipelineBuilder::new();
    let input = b.input("input", &["x", "y"], r(&[(0, 4), (0, 4)])).unwrap();
    let clamped = b
        .add_stage("clamped", &["x", "y"], vec![(input, Footprint::Clamp)])
        .unwrap();
    let bx = b
        .add_stage("blur_x", &["x", "y"], vec![(clamped, Footprint::stencil(&[1, 0]))])
        .unwrap();
    let p = b.build().unwrap();
    let bounds = infer(&p, &Schedule::all_root(&p), bx, &out4()).unwrap();
    assert_eq!(bounds.required(clamped), Some(&r(&[(-1, 5), (0, 4)])));
    assert_eq!(bounds.required(input), Some(&out4()));
}
