// driver.rs — Session state and pass orchestration
//
// A `Session` owns the source text, its provenance, every pass artifact and
// the accumulated diagnostics. `Session::run` executes the minimal set of
// passes for an emit target; `Session::render` turns the artifacts into the
// requested output.
//
// Preconditions: none; parse errors are recorded when the session is created.
// Postconditions: artifacts for all passes in `Emit::terminals` are populated,
//                 or `has_error` is set.
// Failure modes: any pass producing error-level diagnostics.
// Side effects: calls `on_pass_complete` after each pass; `tracing` events.

use std::fmt::Write as _;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::ast::{Program, Span};
use crate::bounds::{infer, RequiredRegionMap};
use crate::cost::{cost, Baseline, CostAccumulator, CostReport};
use crate::diag::{codes, has_errors, Diagnostic};
use crate::dot::Dot;
use crate::elaborate::{elaborate, Elaborated, RealizeRequest};
use crate::error::Error;
use crate::pass::{descriptor, required_for, PassId};
use crate::region::Region;
use crate::render::{EventLog, LoopNestListing, RegionTable};
use crate::schedule::Schedule;
use crate::simulate::{simulate_into, CancelFlag, EvaluationEvent, RunSummary, SimulateOptions};

// ── Provenance ─────────────────────────────────────────────────────────────

/// Identifies the input a report was produced from.
///
/// `source_hash`: SHA-256 of the raw `.psl` source text.
/// `engine_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub engine_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.source_hash {
            let _ = write!(s, "{:02x}", b);
        }
        s
    }
}

pub fn compute_provenance(source: &str) -> Provenance {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let mut source_hash = [0u8; 32];
    source_hash.copy_from_slice(&hasher.finalize());

    Provenance {
        source_hash,
        engine_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Options and emit targets ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emit {
    Regions,
    Nest,
    Events,
    Cost,
    Dot,
    Json,
}

impl Emit {
    /// Passes whose artifacts this target renders.
    pub fn terminals(self) -> &'static [PassId] {
        match self {
            Emit::Regions | Emit::Nest => &[PassId::Infer],
            Emit::Events => &[PassId::Simulate],
            Emit::Cost => &[PassId::Cost],
            Emit::Dot => &[PassId::Validate],
            Emit::Json => &[PassId::Simulate, PassId::Cost],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Only run realize statements of this stage.
    pub realize: Option<String>,
    pub cancel: Option<CancelFlag>,
}

// ── Artifacts ──────────────────────────────────────────────────────────────

/// Artifacts of one realize statement.
#[derive(Debug)]
pub struct Run {
    pub request: RealizeRequest,
    pub bounds: RequiredRegionMap,
    pub events: Option<Vec<EvaluationEvent>>,
    pub summary: Option<RunSummary>,
    pub cost: Option<CostReport>,
}

pub struct Session {
    pub source: String,
    pub provenance: Provenance,
    pub options: SessionOptions,
    pub program: Option<Program>,
    pub elaborated: Option<Elaborated>,
    pub schedule: Option<Schedule>,
    pub runs: Vec<Run>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
}

/// A pass reported error-level diagnostics (available in
/// `Session::diagnostics`), or could not start because an earlier pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassError {
    pub failing_pass: PassId,
}

impl Session {
    /// Parse `source` and set up an empty session around it.
    pub fn new(source: impl Into<String>, options: SessionOptions) -> Self {
        let source = source.into();
        let provenance = compute_provenance(&source);
        let parsed = crate::parser::parse(&source);
        let has_error = has_errors(&parsed.diagnostics);
        debug!(
            statements = parsed.program.as_ref().map_or(0, |p| p.statements.len()),
            "parsed"
        );
        Self {
            source,
            provenance,
            options,
            program: if has_error { None } else { parsed.program },
            elaborated: None,
            schedule: None,
            runs: Vec::new(),
            diagnostics: parsed.diagnostics,
            has_error,
        }
    }

    /// Run the minimal set of passes for `emit`.
    ///
    /// Per-pass sequence: execute → on_pass_complete(callback) → log → error check.
    pub fn run(
        &mut self,
        emit: Emit,
        mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
    ) -> Result<(), PassError> {
        for pass in required_for(emit.terminals()) {
            if self.has_error {
                return Err(PassError { failing_pass: pass });
            }
            let t = Instant::now();
            let diags = match pass {
                PassId::Elaborate => self.run_elaborate(),
                PassId::Validate => self.run_validate(),
                PassId::Infer => self.run_infer(),
                PassId::Simulate => self.run_simulate(),
                PassId::Cost => self.run_cost(),
            };
            self.finish_pass(pass, diags, t.elapsed(), &mut on_pass_complete)?;
        }
        Ok(())
    }

    fn finish_pass(
        &mut self,
        pass: PassId,
        diags: Vec<Diagnostic>,
        elapsed: Duration,
        on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
    ) -> Result<(), PassError> {
        on_pass_complete(pass, &diags);
        let is_err = has_errors(&diags);
        self.diagnostics.extend(diags);
        debug!(
            pass = descriptor(pass).name,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "pass complete"
        );
        if is_err {
            self.has_error = true;
            return Err(PassError { failing_pass: pass });
        }
        Ok(())
    }

    // ── Passes ─────────────────────────────────────────────────────────────

    fn run_elaborate(&mut self) -> Vec<Diagnostic> {
        let Some(program) = &self.program else {
            return vec![missing("parsed program")];
        };
        let result = elaborate(program);
        let mut diags = result.diagnostics;
        if let Some(mut el) = result.elaborated {
            if let Some(name) = &self.options.realize {
                el.requests.retain(|r| &r.name == name);
                if el.requests.is_empty() {
                    diags.push(
                        Diagnostic::error(
                            codes::E0301,
                            None,
                            format!("no realize statement for '{}'", name),
                        )
                        .with_hint(format!("add `realize {} [..]` to the file", name)),
                    );
                }
            }
            info!(
                stages = el.pipeline.len(),
                requests = el.requests.len(),
                "elaborated"
            );
            self.elaborated = Some(el);
        }
        diags
    }

    fn run_validate(&mut self) -> Vec<Diagnostic> {
        let Some(el) = &self.elaborated else {
            return vec![missing("pipeline")];
        };
        match el.schedule.build(&el.pipeline) {
            Ok(schedule) => {
                self.schedule = Some(schedule);
                Vec::new()
            }
            Err(e) => vec![el.schedule_diagnostic(&e)],
        }
    }

    fn run_infer(&mut self) -> Vec<Diagnostic> {
        let (Some(el), Some(schedule)) = (&self.elaborated, &self.schedule) else {
            return vec![missing("schedule")];
        };
        let mut diags = Vec::new();
        for request in &el.requests {
            match infer(&el.pipeline, schedule, request.stage, &request.region) {
                Ok(bounds) => self.runs.push(Run {
                    request: request.clone(),
                    bounds,
                    events: None,
                    summary: None,
                    cost: None,
                }),
                Err(e) => diags.push(engine_diagnostic(&e, request.span)),
            }
        }
        diags
    }

    fn run_simulate(&mut self) -> Vec<Diagnostic> {
        let (Some(el), Some(schedule)) = (&self.elaborated, &self.schedule) else {
            return vec![missing("schedule")];
        };
        let options = SimulateOptions {
            cancel: self.options.cancel.clone(),
        };
        let mut diags = Vec::new();
        for run in &mut self.runs {
            let mut events = Vec::new();
            match simulate_into(&el.pipeline, schedule, &run.bounds, &mut events, &options) {
                Ok(summary) => {
                    debug!(stage = %run.request.name, events = summary.events, "simulated");
                    run.events = Some(events);
                    run.summary = Some(summary);
                }
                Err(e) => diags.push(engine_diagnostic(&e, run.request.span)),
            }
        }
        diags
    }

    /// Costs collected events when Simulate ran, otherwise streams a fresh
    /// simulation through an accumulator.
    fn run_cost(&mut self) -> Vec<Diagnostic> {
        let (Some(el), Some(schedule)) = (&self.elaborated, &self.schedule) else {
            return vec![missing("schedule")];
        };
        let options = SimulateOptions {
            cancel: self.options.cancel.clone(),
        };
        let mut diags = Vec::new();
        for run in &mut self.runs {
            let request = &run.request;
            let baseline = match Baseline::compute(&el.pipeline, request.stage, &request.region) {
                Ok(b) => b,
                Err(e) => {
                    diags.push(engine_diagnostic(&e, request.span));
                    continue;
                }
            };
            let report = match &run.events {
                Some(events) => cost(&el.pipeline, events, &run.bounds, &baseline),
                None => {
                    let mut acc = CostAccumulator::new();
                    match simulate_into(&el.pipeline, schedule, &run.bounds, &mut acc, &options) {
                        Ok(summary) => run.summary = Some(summary),
                        Err(e) => {
                            diags.push(engine_diagnostic(&e, request.span));
                            continue;
                        }
                    }
                    acc.report(&el.pipeline, &run.bounds, &baseline)
                }
            };
            run.cost = Some(report);
        }
        diags
    }

    // ── Output ─────────────────────────────────────────────────────────────

    /// Render the artifacts for `emit`. Call after a successful `run`.
    pub fn render(&self, emit: Emit) -> serde_json::Result<String> {
        let Some(el) = &self.elaborated else {
            return Ok(String::new());
        };
        let pipeline = &el.pipeline;
        if emit == Emit::Json {
            return self.json_report();
        }
        if emit == Emit::Dot {
            return Ok(match &self.schedule {
                Some(schedule) => Dot { pipeline, schedule }.to_string(),
                None => String::new(),
            });
        }
        let Some(schedule) = &self.schedule else {
            return Ok(String::new());
        };

        let mut out = String::new();
        for (i, run) in self.runs.iter().enumerate() {
            if self.runs.len() > 1 {
                if i > 0 {
                    out.push('\n');
                }
                let _ = writeln!(out, "# realize {} {}", run.request.name, run.request.region);
            }
            let bounds = &run.bounds;
            let _ = match emit {
                Emit::Regions => write!(out, "{}", RegionTable { pipeline, bounds }),
                Emit::Nest => write!(
                    out,
                    "{}",
                    LoopNestListing {
                        pipeline,
                        schedule,
                        bounds
                    }
                ),
                Emit::Events => match &run.events {
                    Some(events) => write!(out, "{}", EventLog { pipeline, events }),
                    None => Ok(()),
                },
                Emit::Cost => match &run.cost {
                    Some(report) => write!(out, "{}", report),
                    None => Ok(()),
                },
                Emit::Dot | Emit::Json => Ok(()),
            };
        }
        Ok(out)
    }

    fn json_report(&self) -> serde_json::Result<String> {
        let Some(el) = &self.elaborated else {
            return Ok(String::new());
        };
        let pipeline = &el.pipeline;
        let runs = self
            .runs
            .iter()
            .map(|run| RunReport {
                stage: &run.request.name,
                region: &run.request.region,
                regions: run
                    .bounds
                    .placements()
                    .live_topo(pipeline)
                    .into_iter()
                    .filter_map(|id| run.bounds.get(id))
                    .map(|b| RegionRow {
                        stage: &b.name,
                        placement: b.placement.describe(pipeline),
                        required: &b.required,
                        realizations: b.realizations.len(),
                    })
                    .collect(),
                summary: run.summary,
                cost: run.cost.as_ref(),
            })
            .collect();
        let report = Report {
            provenance: ProvenanceReport {
                source_hash: self.provenance.source_hash_hex(),
                engine_version: self.provenance.engine_version,
            },
            diagnostics: &self.diagnostics,
            runs,
        };
        let mut json = serde_json::to_string_pretty(&report)?;
        json.push('\n');
        Ok(json)
    }
}

// ── JSON report ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Report<'a> {
    provenance: ProvenanceReport,
    diagnostics: &'a [Diagnostic],
    runs: Vec<RunReport<'a>>,
}

#[derive(Serialize)]
struct ProvenanceReport {
    source_hash: String,
    engine_version: &'static str,
}

#[derive(Serialize)]
struct RunReport<'a> {
    stage: &'a str,
    region: &'a Region,
    regions: Vec<RegionRow<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<RunSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cost: Option<&'a CostReport>,
}

#[derive(Serialize)]
struct RegionRow<'a> {
    stage: &'a str,
    placement: String,
    required: &'a Region,
    realizations: usize,
}

// ── Error mapping ──────────────────────────────────────────────────────────

/// Wrap an engine error raised while running the realize statement at `span`.
pub fn engine_diagnostic(err: &Error, span: Span) -> Diagnostic {
    let span = Some(span);
    match err {
        Error::OutOfBounds(_) => Diagnostic::error(codes::E0302, span, err.to_string())
            .with_hint("read the input through a clamp(...) stage, or realize a smaller region"),
        Error::Cancelled { .. } => Diagnostic::error(codes::E0303, span, err.to_string()),
        Error::Schedule(_) => Diagnostic::error(codes::E0203, span, err.to_string()),
        Error::Graph(_) => Diagnostic::error(codes::E0106, span, err.to_string()),
        Error::UnknownOutput(_) | Error::OutputRank { .. } | Error::RealizeInput(_) => {
            Diagnostic::error(codes::E0301, span, err.to_string())
        }
    }
}

fn missing(what: &str) -> Diagnostic {
    Diagnostic::error(
        codes::E0106,
        None,
        format!("internal: {} not available for this pass", what),
    )
}

// ── Tests ──────────────────────────────────────────────────────────────────
