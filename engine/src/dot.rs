// dot.rs — Graphviz DOT output for stage graphs
//
// One node per stage, styled by its scheduled placement, and one edge per
// producer read, labelled with the footprint. A `compute_at` placement adds a
// dashed edge from the consumer to the stage computed inside it, labelled
// with the loop variable.
//
// Preconditions: `schedule` was built for `pipeline`.
// Postconditions: output is deterministic (stages in id order).
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt;

use crate::graph::Pipeline;
use crate::schedule::{Placement, Schedule};

pub struct Dot<'a> {
    pub pipeline: &'a Pipeline,
    pub schedule: &'a Schedule,
}

impl fmt::Display for Dot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "digraph pipeline {{")?;
        writeln!(f, "    rankdir=LR;")?;
        writeln!(f, "    node [fontname=\"Helvetica\", fontsize=10];")?;
        writeln!(f, "    edge [fontname=\"Helvetica\", fontsize=9];")?;

        writeln!(f)?;
        for stage in self.pipeline.stages() {
            let placement = self.schedule.placement(stage.id);
            writeln!(
                f,
                "    {} [{}, label=\"{}\\n{}\"];",
                sanitize(&stage.name),
                node_attrs(placement),
                stage.name,
                placement.describe(self.pipeline)
            )?;
        }

        writeln!(f)?;
        for stage in self.pipeline.stages() {
            for edge in stage.producers() {
                writeln!(
                    f,
                    "    {} -> {} [label=\"{}\"];",
                    sanitize(self.pipeline.name(edge.producer)),
                    sanitize(&stage.name),
                    edge.footprint
                )?;
            }
        }

        let nested: Vec<_> = self
            .pipeline
            .stages()
            .filter_map(|s| match self.schedule.placement(s.id) {
                Placement::ComputeAt { consumer, var, .. } => Some((s, *consumer, var)),
                _ => None,
            })
            .collect();
        if !nested.is_empty() {
            writeln!(f)?;
            writeln!(f, "    // compute_at")?;
            for (stage, consumer, var) in nested {
                writeln!(
                    f,
                    "    {} -> {} [label=\"at {}\", style=dashed, color=gray40, constraint=false];",
                    sanitize(self.pipeline.name(consumer)),
                    sanitize(&stage.name),
                    var
                )?;
            }
        }

        writeln!(f, "}}")
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn node_attrs(placement: &Placement) -> String {
    let (shape, style, color) = match placement {
        Placement::Input => ("cylinder", "filled", "lightsalmon"),
        Placement::Inline => ("box", "\"filled,dashed\"", "white"),
        Placement::Root => ("box", "filled", "lightblue"),
        Placement::ComputeAt { .. } => ("box", "filled", "lightyellow"),
    };
    format!("shape={shape}, style={style}, fillcolor={color}")
}

// ── Tests ───────────────────────────────────────────────────────────────────
