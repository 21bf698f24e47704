// End-to-end tests: .psl source → session → rendered output, and the psim
// binary on the demo files.
//
// The binary tests check exit codes, stderr diagnostics and that identical
// inputs give byte-identical output.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use psim::diag::codes;
use psim::driver::{Emit, Session, SessionOptions};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn psim_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_psim"))
}

fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

fn demo(name: &str) -> PathBuf {
    project_root().join("demos").join(name)
}

fn run_psim(args: &[&str]) -> Output {
    Command::new(psim_binary())
        .args(args)
        .output()
        .expect("failed to run psim")
}

fn stdout_of(args: &[&str]) -> String {
    let output = run_psim(args);
    assert!(
        output.status.success(),
        "psim failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("utf-8 output")
}

fn session(source: &str, emit: Emit) -> Session {
    let mut session = Session::new(source, SessionOptions::default());
    let result = session.run(emit, |_, _| {});
    assert!(result.is_ok(), "run failed: {:#?}", session.diagnostics);
    session
}

fn write_temp(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("psim-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

// ── Library ─────────────────────────────────────────────────────────────────

#[test]
fn tiled_blur_costs_four_thirds() {
    let src = std::fs::read_to_string(demo("blur.psl")).unwrap();
    let s = session(&src, Emit::Cost);
    let report = s.runs[0].cost.as_ref().unwrap();
    let blur_x = report.stage("blur_x").unwrap();
    assert_eq!(blur_x.elements, 32);
    assert_eq!(blur_x.baseline, 24);
    assert_eq!(blur_x.generations, 4);
    assert!(report.stage("blur_y").unwrap().parallel_elements == 16);
}

#[test]
fn tiled_blur_nest_places_producer_in_tile() {
    let src = std::fs::read_to_string(demo("blur.psl")).unwrap();
    let s = session(&src, Emit::Nest);
    let nest = s.render(Emit::Nest).unwrap();
    let produce_y = nest.find("produce blur_y:").unwrap();
    let loop_xo = nest.find("for xo in 0..2:").unwrap();
    let produce_x = nest.find("produce blur_x:").unwrap();
    assert!(produce_y < loop_xo && loop_xo < produce_x, "{}", nest);
    assert!(nest.contains("parallel yo in 0..2:"), "{}", nest);
}

#[test]
fn sharpen_reads_clamped_image_in_bounds() {
    let src = std::fs::read_to_string(demo("sharpen.psl")).unwrap();
    let s = session(&src, Emit::Json);
    let run = &s.runs[0];
    let p = &s.elaborated.as_ref().unwrap().pipeline;
    let image = p.find("image").unwrap();
    let clamped = p.find("clamped").unwrap();
    assert_eq!(
        run.bounds.required(image),
        Some(&psim::Region::half_open(&[(0, 16), (0, 16)]))
    );
    assert_eq!(
        run.bounds.required(clamped),
        Some(&psim::Region::half_open(&[(-1, 17), (-1, 17)]))
    );
    let cost = run.cost.as_ref().unwrap();
    let sharpen = cost.stage("sharpen").unwrap();
    assert_eq!(sharpen.elements, 256);
    assert_eq!(sharpen.issue_estimate, 64.0);
    assert_eq!(cost.stage("blur").unwrap().generations, 16);
}

#[test]
fn tutorial_orders() {
    let src = std::fs::read_to_string(demo("orders.psl")).unwrap();
    let s = session(&src, Emit::Events);
    let first_coords = |stage: &str, n: usize| -> Vec<Vec<i64>> {
        let run = s.runs.iter().find(|r| r.request.name == stage).unwrap();
        run.events.as_ref().unwrap()[..n]
            .iter()
            .map(|e| e.coord.clone())
            .collect()
    };
    assert_eq!(
        first_coords("row_major", 3),
        [vec![0, 0], vec![1, 0], vec![2, 0]]
    );
    assert_eq!(
        first_coords("col_major", 3),
        [vec![0, 0], vec![0, 1], vec![0, 2]]
    );
    assert_eq!(first_coords("split_x", 4), first_coords("row_major", 4));
    assert_eq!(first_coords("fused", 5), first_coords("row_major", 5));
    assert_eq!(
        first_coords("tiled", 6),
        [
            vec![0, 8],
            vec![1, 8],
            vec![2, 8],
            vec![3, 8],
            vec![0, 9],
            vec![1, 9]
        ]
    );
}

#[test]
fn diagnostics_locate_the_statement() {
    let src = "\
input input[x, y] domain [0..8, 0..8]
func blur_x[x, y] = stencil(inptu, 1, 0)
realize blur_x [0..4, 0..4]
";
    let mut s = Session::new(src, SessionOptions::default());
    assert!(s.run(Emit::Regions, |_, _| {}).is_err());
    let d = s
        .diagnostics
        .iter()
        .find(|d| d.code == Some(codes::E0101))
        .expect("unknown stage diagnostic");
    assert_eq!(d.location(src), Some((2, 29)));
}

#[test]
fn unknown_directive_suggests_vocabulary() {
    let src = "\
func f[x]
f.vectorise(x, 4)
realize f [0..8]
";
    let mut s = Session::new(src, SessionOptions::default());
    assert!(s.run(Emit::Regions, |_, _| {}).is_err());
    let d = s
        .diagnostics
        .iter()
        .find(|d| d.code == Some(codes::E0201))
        .expect("unknown directive diagnostic");
    assert!(d.hint.as_deref().unwrap_or("").contains("vectorize"));
}

#[test]
fn unused_stage_is_only_a_warning() {
    let src = "\
func used[x]
func unused[x]
realize used [0..2]
";
    let s = session(src, Emit::Regions);
    assert!(s
        .diagnostics
        .iter()
        .any(|d| d.code == Some(codes::W0002) && !d.is_error()));
    assert_eq!(s.runs.len(), 1);
}

// ── Binary ──────────────────────────────────────────────────────────────────

#[test]
fn cli_regions_table() {
    let path = demo("blur.psl");
    let out = stdout_of(&[path.to_str().unwrap(), "--emit", "regions"]);
    assert!(out.contains("compute_at(blur_y, xo)"), "{}", out);
    assert!(out.contains("4 realizations"), "{}", out);
}

#[test]
fn cli_json_is_reproducible() {
    let path = demo("sharpen.psl");
    let args = [path.to_str().unwrap(), "--emit", "json"];
    let a = stdout_of(&args);
    let b = stdout_of(&args);
    assert_eq!(a, b);
    let value: serde_json::Value = serde_json::from_str(&a).unwrap();
    assert_eq!(
        value["provenance"]["engine_version"],
        env!("CARGO_PKG_VERSION")
    );
    assert_eq!(
        value["provenance"]["source_hash"].as_str().map(str::len),
        Some(64)
    );
}

#[test]
fn cli_realize_filter() {
    let path = demo("orders.psl");
    let out = stdout_of(&[path.to_str().unwrap(), "--emit", "nest", "--realize", "tiled"]);
    assert!(out.contains("produce tiled:"), "{}", out);
    assert!(!out.contains("produce row_major:"), "{}", out);
}

#[test]
fn cli_dot_graph() {
    let path = demo("blur.psl");
    let out = stdout_of(&[path.to_str().unwrap(), "--emit", "dot"]);
    assert!(out.starts_with("digraph pipeline {"), "{}", out);
    assert!(out.contains("input -> blur_x"), "{}", out);
}

#[test]
fn cli_errors_exit_1_with_location() {
    let path = write_temp("bad.psl", "func f[x] = pointwise(g)\nrealize f [0..4]\n");
    let output = run_psim(&[path.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[E0101]"), "{}", stderr);
    assert!(stderr.contains("bad.psl:1:23"), "{}", stderr);
}

#[test]
fn cli_missing_file_exits_2() {
    let output = run_psim(&["/nonexistent/pipeline.psl"]);
    assert_eq!(output.status.code(), Some(2));
}
