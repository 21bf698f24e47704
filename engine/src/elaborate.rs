// elaborate.rs — AST → pipeline, schedule and realize requests
//
// Pass 1 declares every stage, so funcs may read stages defined further down
// the file. Pass 2 binds each func's accesses, applies schedule directives to
// a `ScheduleBuilder` and collects realize statements. The pipeline is built
// last; the schedule is only validated later (see `driver`), so elaboration
// hands back the builder together with the span of each stage's first
// schedule statement for error reporting.
//
// Preconditions: `program` is a well-formed AST from the parser.
// Postconditions: on success the pipeline is acyclic and every realize
//                 request names a computed stage with a region of its rank.
// Failure modes: unknown names, malformed accesses or directives and graph
//                errors produce `Diagnostic` entries. Elaboration continues
//                past errors but yields no result if any error was reported.
// Side effects: none.

use std::collections::{BTreeSet, HashMap};

use crate::ast::*;
use crate::diag::{codes, DiagCode, Diagnostic};
use crate::error::{GraphError, ScheduleValidationError};
use crate::footprint::Footprint;
use crate::graph::{Pipeline, PipelineBuilder};
use crate::id::StageId;
use crate::region::Region;
use crate::schedule::{ScheduleBuilder, StagePolicy};

// ── Public types ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ElaborateResult {
    pub elaborated: Option<Elaborated>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealizeRequest {
    pub stage: StageId,
    pub name: String,
    pub region: Region,
    pub span: Span,
}

#[derive(Debug)]
pub struct Elaborated {
    pub pipeline: Pipeline,
    pub schedule: ScheduleBuilder,
    pub requests: Vec<RealizeRequest>,
    /// Declaration span of each stage.
    pub stage_spans: HashMap<String, Span>,
    /// Span of the first schedule statement of each scheduled stage.
    pub schedule_spans: HashMap<String, Span>,
}

impl Elaborated {
    /// Diagnostic for a schedule that failed validation, located at the
    /// offending stage's schedule statement when there is one.
    pub fn schedule_diagnostic(&self, err: &ScheduleValidationError) -> Diagnostic {
        let span = self
            .schedule_spans
            .get(err.stage())
            .or_else(|| self.stage_spans.get(err.stage()))
            .copied();
        let d = Diagnostic::error(codes::E0203, span, err.to_string());
        match err {
            ScheduleValidationError::UseOutsideLevel { user, .. } => d.with_hint(format!(
                "compute '{}' inside the same loop, or move this stage further out",
                user
            )),
            ScheduleValidationError::NonPositiveFactor { .. } => {
                d.with_hint("split factors must be at least 1")
            }
            _ => d,
        }
    }
}

/// Elaborate a parsed program.
pub fn elaborate(program: &Program) -> ElaborateResult {
    let mut ctx = ElaborateCtx::default();

    // Pass 1: declare every stage
    ctx.declare_stages(program);

    // Pass 2: bodies, schedules, realize statements
    for stmt in &program.statements {
        match &stmt.kind {
            StatementKind::Func(f) => ctx.define_func(f, stmt.span),
            StatementKind::Schedule(s) => ctx.apply_schedule(s, stmt.span),
            StatementKind::Realize(r) => ctx.pending_realizes.push((r.clone(), stmt.span)),
            StatementKind::Input(_) => {}
        }
    }

    let elaborated = ctx.finish();
    ElaborateResult {
        elaborated,
        diagnostics: ctx.diagnostics,
    }
}

// ── Directive signatures ────────────────────────────────────────────────────

const DIRECTIVES: &[(&str, &str)] = &[
    ("compute_root", "compute_root()"),
    ("compute_inline", "compute_inline()"),
    ("compute_at", "compute_at(consumer, var)"),
    ("split", "split(var, outer, inner, factor)"),
    ("fuse", "fuse(outer, inner, fused)"),
    ("reorder", "reorder(innermost, ..., outermost)"),
    ("tile", "tile(x, y, xo, yo, xi, yi, width, height)"),
    ("vectorize", "vectorize(var, width)"),
    ("unroll", "unroll(var, width)"),
    ("parallel", "parallel(var)"),
];

const ACCESS_KINDS: &str = "pointwise, stencil, window, reduce, clamp";

// ── Internal context ────────────────────────────────────────────────────────

#[derive(Default)]
struct ElaborateCtx {
    builder: PipelineBuilder,
    schedule: ScheduleBuilder,
    stages: HashMap<String, StageId>,
    stage_spans: HashMap<String, Span>,
    schedule_spans: HashMap<String, Span>,
    pending_realizes: Vec<(RealizeStmt, Span)>,
    diagnostics: Vec<Diagnostic>,
}

impl ElaborateCtx {
    fn error(&mut self, code: DiagCode, span: Span, message: String) {
        self.diagnostics
            .push(Diagnostic::error(code, Some(span), message));
    }

    fn graph_error(&mut self, err: GraphError, span: Span) {
        let code = match err {
            GraphError::Cycle(_) => codes::E0105,
            GraphError::DuplicateStage(_) => codes::E0102,
            _ => codes::E0106,
        };
        self.error(code, span, err.to_string());
    }

    // ── Pass 1: declarations ────────────────────────────────────────────

    fn declare_stages(&mut self, program: &Program) {
        for stmt in &program.statements {
            let (name, result) = match &stmt.kind {
                StatementKind::Input(i) => {
                    let domain = region_of(&i.domain);
                    (&i.name, self.builder.input(&i.name.name, &names(&i.vars), domain))
                }
                StatementKind::Func(f) => (&f.name, self.builder.declare(&f.name.name, &names(&f.vars))),
                _ => continue,
            };
            match result {
                Ok(id) => {
                    self.stages.insert(name.name.clone(), id);
                    self.stage_spans.insert(name.name.clone(), stmt.span);
                }
                Err(e) => self.graph_error(e, name.span),
            }
        }
    }

    // ── Pass 2: func bodies ─────────────────────────────────────────────

    fn define_func(&mut self, func: &FuncStmt, span: Span) {
        let Some(&id) = self.stages.get(&func.name.name) else {
            // declaration already failed and was reported
            return;
        };
        if self.stage_spans.get(&func.name.name) != Some(&span) {
            return;
        }

        let mut producers = Vec::with_capacity(func.accesses.len());
        let mut ok = true;
        for access in &func.accesses {
            match self.resolve_access(access) {
                Some(p) => producers.push(p),
                None => ok = false,
            }
        }
        if !ok {
            return;
        }

        if let Err(e) = self.builder.define(id, producers) {
            self.graph_error(e, span);
            return;
        }
        if let Some(domain) = &func.domain {
            if let Err(e) = self.builder.with_domain(id, region_of(domain)) {
                self.graph_error(e, span);
            }
        }
    }

    fn resolve_access(&mut self, access: &Access) -> Option<(StageId, Footprint)> {
        let Some(&producer) = self.stages.get(&access.producer.name) else {
            self.diagnostics.push(
                Diagnostic::error(
                    codes::E0101,
                    Some(access.producer.span),
                    format!("no stage named '{}'", access.producer.name),
                )
                .with_hint("declare it with `input` or `func`"),
            );
            return None;
        };

        let kind = access.kind.name.as_str();
        let footprint = match kind {
            "pointwise" | "reduce" | "clamp" => {
                if let Some(extra) = access.args.first() {
                    self.error(
                        codes::E0104,
                        extra.span(),
                        format!("{} takes no arguments besides the producer", kind),
                    );
                    return None;
                }
                match kind {
                    "pointwise" => Footprint::Pointwise,
                    "reduce" => Footprint::Reduction,
                    _ => Footprint::Clamp,
                }
            }
            "stencil" => {
                let mut radii = Vec::with_capacity(access.args.len());
                for arg in &access.args {
                    match arg {
                        AccessArg::Int(r, _) => radii.push(*r),
                        AccessArg::Offsets(_, _, s) => {
                            self.error(
                                codes::E0104,
                                *s,
                                "stencil takes one radius per dimension, not lo:hi offsets"
                                    .to_string(),
                            );
                            return None;
                        }
                    }
                }
                Footprint::stencil(&radii)
            }
            "window" => {
                let mut offsets = Vec::with_capacity(access.args.len());
                for arg in &access.args {
                    match arg {
                        AccessArg::Offsets(lo, hi, _) => offsets.push((*lo, *hi)),
                        AccessArg::Int(_, s) => {
                            self.error(
                                codes::E0104,
                                *s,
                                "window takes lo:hi offsets per dimension".to_string(),
                            );
                            return None;
                        }
                    }
                }
                Footprint::window(&offsets)
            }
            _ => {
                self.diagnostics.push(
                    Diagnostic::error(
                        codes::E0103,
                        Some(access.kind.span),
                        format!("unknown access kind '{}'", kind),
                    )
                    .with_hint(format!("expected one of: {}", ACCESS_KINDS)),
                );
                return None;
            }
        };
        Some((producer, footprint))
    }

    // ── Pass 2: schedules ───────────────────────────────────────────────

    fn apply_schedule(&mut self, stmt: &ScheduleStmt, span: Span) {
        self.schedule_spans
            .entry(stmt.stage.name.clone())
            .or_insert(span);
        for d in &stmt.directives {
            if let Err(diag) = apply_directive(self.schedule.stage(&stmt.stage.name), d) {
                self.diagnostics.push(diag);
            }
        }
    }

    // ── Finish ──────────────────────────────────────────────────────────

    fn finish(&mut self) -> Option<Elaborated> {
        if crate::diag::has_errors(&self.diagnostics) {
            return None;
        }
        let builder = std::mem::take(&mut self.builder);
        let pipeline = match builder.build() {
            Ok(p) => p,
            Err(e) => {
                let span = e
                    .stage()
                    .and_then(|s| self.stage_spans.get(s))
                    .copied();
                self.diagnostics
                    .push(Diagnostic::error(codes::E0106, span, e.to_string()));
                return None;
            }
        };

        let mut requests = Vec::new();
        for (r, span) in std::mem::take(&mut self.pending_realizes) {
            if let Some(req) = self.resolve_realize(&pipeline, &r, span) {
                requests.push(req);
            }
        }
        if crate::diag::has_errors(&self.diagnostics) {
            return None;
        }

        if requests.is_empty() {
            self.diagnostics.push(
                Diagnostic::warning(codes::W0001, None, "nothing to realize")
                    .with_hint("add `realize <stage> [lo..hi, ...]`"),
            );
        } else {
            let used: BTreeSet<StageId> = requests
                .iter()
                .flat_map(|r| pipeline.upstream_of(r.stage))
                .collect();
            for stage in pipeline.stages() {
                if !used.contains(&stage.id) {
                    self.diagnostics.push(Diagnostic::warning(
                        codes::W0002,
                        self.stage_spans.get(&stage.name).copied(),
                        format!("stage '{}' is not read by any realize request", stage.name),
                    ));
                }
            }
        }

        Some(Elaborated {
            pipeline,
            schedule: std::mem::take(&mut self.schedule),
            requests,
            stage_spans: std::mem::take(&mut self.stage_spans),
            schedule_spans: std::mem::take(&mut self.schedule_spans),
        })
    }

    fn resolve_realize(
        &mut self,
        pipeline: &Pipeline,
        r: &RealizeStmt,
        span: Span,
    ) -> Option<RealizeRequest> {
        let Some(id) = pipeline.find(&r.stage.name) else {
            self.error(
                codes::E0301,
                r.stage.span,
                format!("no stage named '{}'", r.stage.name),
            );
            return None;
        };
        let stage = pipeline.stage(id);
        if stage.is_input() {
            self.error(
                codes::E0301,
                r.stage.span,
                format!("input '{}' cannot be realized; it has no definition", stage.name),
            );
            return None;
        }
        if r.region.len() != stage.rank() {
            self.error(
                codes::E0301,
                span,
                format!(
                    "'{}' has {} dimensions, but the realize region has {}",
                    stage.name,
                    stage.rank(),
                    r.region.len()
                ),
            );
            return None;
        }
        Some(RealizeRequest {
            stage: id,
            name: stage.name.clone(),
            region: region_of(&r.region),
            span,
        })
    }
}

// ── Directives ──────────────────────────────────────────────────────────────

fn apply_directive(policy: &mut StagePolicy, d: &Directive) -> Result<(), Diagnostic> {
    use crate::ast::DirectiveArg::{Ident as Id, Int};

    let name = d.name.name.as_str();
    match (name, d.args.as_slice()) {
        ("compute_root", []) => {
            policy.compute_root();
        }
        ("compute_inline", []) => {
            policy.compute_inline();
        }
        ("compute_at", [Id(c), Id(v)]) => {
            policy.compute_at(&c.name, &v.name);
        }
        ("split", [Id(v), Id(o), Id(i), Int(f, _)]) => {
            policy.split(&v.name, &o.name, &i.name, *f);
        }
        ("fuse", [Id(o), Id(i), Id(f)]) => {
            policy.fuse(&o.name, &i.name, &f.name);
        }
        ("reorder", vars) if !vars.is_empty() && vars.iter().all(|a| matches!(a, Id(_))) => {
            let names: Vec<&str> = vars
                .iter()
                .filter_map(|a| match a {
                    Id(id) => Some(id.name.as_str()),
                    Int(..) => None,
                })
                .collect();
            policy.reorder(&names);
        }
        ("tile", [Id(x), Id(y), Id(xo), Id(yo), Id(xi), Id(yi), Int(w, _), Int(h, _)]) => {
            policy.tile(
                &x.name, &y.name, &xo.name, &yo.name, &xi.name, &yi.name, *w, *h,
            );
        }
        ("vectorize", [Id(v), Int(w, _)]) => {
            policy.vectorize(&v.name, *w);
        }
        ("unroll", [Id(v), Int(w, _)]) => {
            policy.unroll(&v.name, *w);
        }
        ("parallel", [Id(v)]) => {
            policy.parallel(&v.name);
        }
        _ => {
            return Err(match DIRECTIVES.iter().find(|(n, _)| *n == name) {
                Some((_, signature)) => Diagnostic::error(
                    codes::E0202,
                    Some(d.span),
                    format!("malformed arguments to '{}'", name),
                )
                .with_hint(format!("expected {}", signature)),
                None => Diagnostic::error(
                    codes::E0201,
                    Some(d.name.span),
                    format!("unknown schedule directive '{}'", name),
                )
                .with_hint(format!(
                    "expected one of: {}",
                    DIRECTIVES
                        .iter()
                        .map(|(n, _)| *n)
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            });
        }
    }
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn names(idents: &[Ident]) -> Vec<&str> {
    idents.iter().map(|i| i.name.as_str()).collect()
}

fn region_of(ranges: &[Range]) -> Region {
    let bounds: Vec<(i64, i64)> = ranges.iter().map(|r| (r.lo, r.hi)).collect();
    Region::half_open(&bounds)
}

// ── Tests ───────────────────────────────────────────────────────────────────
