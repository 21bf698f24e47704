// graph.rs — Stage graph construction
//
// A pipeline is a DAG of named stages. Each computed stage lists its producer
// edges, each carrying the footprint through which it reads that producer.
// Inputs have no definition, only a valid domain.
//
// Construction goes through `PipelineBuilder`, which supports declaring a
// name first and defining it later. Cycles are rejected when the closing edge
// is defined, with the full cycle path.
//
// Preconditions: none.
// Postconditions: a built `Pipeline` is acyclic, every declared stage is
//                 defined, and every footprint's ranks fit its edge.
// Failure modes: duplicate names, unknown handles, rank mismatches, cycles,
//                undefined declarations → `GraphError`.
// Side effects: none.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use indexmap::IndexMap;

use crate::error::{GraphCycleError, GraphError};
use crate::footprint::Footprint;
use crate::id::{IdAllocator, StageId};
use crate::region::Region;

// ── Public types ────────────────────────────────────────────────────────────

/// One producer read by a computed stage.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerEdge {
    pub producer: StageId,
    pub footprint: Footprint,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageKind {
    /// Supplied externally over `domain`; never computed by the engine.
    Input { domain: Region },
    /// Defined in terms of its producers. `domain` optionally bounds the
    /// coordinates at which it may be computed.
    Computed {
        producers: Vec<ProducerEdge>,
        domain: Option<Region>,
    },
}

/// A node of the pipeline DAG.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub id: StageId,
    pub name: String,
    /// Pure dimension names, innermost first: `[x, y]` iterates `for y: for x:`.
    pub vars: Vec<String>,
    pub kind: StageKind,
}

impl Stage {
    pub fn rank(&self) -> usize {
        self.vars.len()
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, StageKind::Input { .. })
    }

    pub fn producers(&self) -> &[ProducerEdge] {
        match &self.kind {
            StageKind::Input { .. } => &[],
            StageKind::Computed { producers, .. } => producers,
        }
    }

    /// Valid domain, declared for inputs and optional for computed stages.
    pub fn domain(&self) -> Option<&Region> {
        match &self.kind {
            StageKind::Input { domain } => Some(domain),
            StageKind::Computed { domain, .. } => domain.as_ref(),
        }
    }

    /// Declared domain of a computed stage; `None` for inputs.
    pub fn computed_domain(&self) -> Option<&Region> {
        match &self.kind {
            StageKind::Input { .. } => None,
            StageKind::Computed { domain, .. } => domain.as_ref(),
        }
    }

}

/// An immutable, validated stage DAG.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
    by_name: IndexMap<String, StageId>,
    topo: Vec<StageId>,
    /// Direct consumers of each stage, deduplicated, in id order.
    consumers: Vec<Vec<StageId>>,
}

impl Pipeline {
    pub fn stage(&self, id: StageId) -> &Stage {
        &self.stages[id.index()]
    }

    pub fn stages(&self) -> impl Iterator<Item = &Stage> {
        self.stages.iter()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<StageId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: StageId) -> &str {
        &self.stage(id).name
    }

    /// Producers before consumers; ties broken by declaration order.
    pub fn topological_order(&self) -> &[StageId] {
        &self.topo
    }

    /// Always true for a built pipeline: construction rejects cycles.
    pub fn is_acyclic(&self) -> bool {
        self.topo.len() == self.stages.len()
    }

    pub fn consumers_of(&self, id: StageId) -> &[StageId] {
        &self.consumers[id.index()]
    }

    pub fn transitive_consumers(&self, id: StageId) -> BTreeSet<StageId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        while let Some(s) = stack.pop() {
            for &c in self.consumers_of(s) {
                if seen.insert(c) {
                    stack.push(c);
                }
            }
        }
        seen
    }

    /// `id` and every stage it transitively reads.
    pub fn upstream_of(&self, id: StageId) -> BTreeSet<StageId> {
        let mut seen = BTreeSet::from([id]);
        let mut stack = vec![id];
        while let Some(s) = stack.pop() {
            for edge in self.stage(s).producers() {
                if seen.insert(edge.producer) {
                    stack.push(edge.producer);
                }
            }
        }
        seen
    }

    /// Position of each stage in the topological order.
    pub fn topo_rank(&self) -> HashMap<StageId, usize> {
        self.topo.iter().enumerate().map(|(i, &s)| (s, i)).collect()
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Slot {
    Declared,
    Input(Region),
    Defined(Vec<ProducerEdge>),
}

#[derive(Debug)]
struct Entry {
    name: String,
    vars: Vec<String>,
    slot: Slot,
    domain: Option<Region>,
}

/// Two-phase pipeline builder. Handles returned by `declare` may be used as
/// producers before they are defined.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    ids: IdAllocator,
    entries: Vec<Entry>,
    by_name: IndexMap<String, StageId>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a name. The stage must be defined before `build`.
    pub fn declare(&mut self, name: &str, vars: &[&str]) -> Result<StageId, GraphError> {
        if self.by_name.contains_key(name) {
            return Err(GraphError::DuplicateStage(name.to_string()));
        }
        let mut seen = BTreeSet::new();
        for v in vars {
            if !seen.insert(*v) {
                return Err(GraphError::DuplicateVar {
                    stage: name.to_string(),
                    var: v.to_string(),
                });
            }
        }
        let id = self.ids.alloc_stage();
        self.entries.push(Entry {
            name: name.to_string(),
            vars: vars.iter().map(|v| v.to_string()).collect(),
            slot: Slot::Declared,
            domain: None,
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Declare an externally supplied stage valid over `domain`.
    pub fn input(&mut self, name: &str, vars: &[&str], domain: Region) -> Result<StageId, GraphError> {
        check_domain_rank(name, &domain, vars.len())?;
        let id = self.declare(name, vars)?;
        self.entries[id.index()].slot = Slot::Input(domain);
        Ok(id)
    }

    /// Bind the definition of a declared stage. Rejects the definition,
    /// leaving the builder unchanged, if it would close a cycle.
    pub fn define(
        &mut self,
        id: StageId,
        producers: Vec<(StageId, Footprint)>,
    ) -> Result<(), GraphError> {
        let entry = self.entry(id)?;
        if !matches!(entry.slot, Slot::Declared) {
            return Err(GraphError::Redefined(entry.name.clone()));
        }
        let consumer_rank = entry.vars.len();
        let mut edges = Vec::with_capacity(producers.len());
        for (producer, footprint) in producers {
            let p = self.entry(producer)?;
            footprint
                .check_ranks(consumer_rank, p.vars.len())
                .map_err(|detail| GraphError::FootprintRank {
                    consumer: self.entries[id.index()].name.clone(),
                    producer: p.name.clone(),
                    kind: footprint.kind_name(),
                    detail,
                })?;
            edges.push(ProducerEdge {
                producer,
                footprint,
            });
        }

        self.entries[id.index()].slot = Slot::Defined(edges);
        if let Some(cycle) = self.find_cycle() {
            self.entries[id.index()].slot = Slot::Declared;
            return Err(GraphCycleError { path: cycle }.into());
        }
        Ok(())
    }

    /// Declare and define in one step.
    pub fn add_stage(
        &mut self,
        name: &str,
        vars: &[&str],
        producers: Vec<(StageId, Footprint)>,
    ) -> Result<StageId, GraphError> {
        let id = self.declare(name, vars)?;
        if let Err(e) = self.define(id, producers) {
            self.undeclare(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Drop the most recent declaration. Only valid for the last id handed out.
    fn undeclare(&mut self, id: StageId) {
        debug_assert_eq!(id.index() + 1, self.entries.len());
        if let Some(entry) = self.entries.pop() {
            self.by_name.shift_remove(&entry.name);
            self.ids.release_stage(id);
        }
    }

    /// Bound a computed stage to `domain`. Stencil and window reads of it are
    /// clipped to this domain.
    pub fn with_domain(&mut self, id: StageId, domain: Region) -> Result<(), GraphError> {
        let entry = self.entry(id)?;
        check_domain_rank(&entry.name, &domain, entry.vars.len())?;
        let entry = &mut self.entries[id.index()];
        match &mut entry.slot {
            Slot::Input(d) => *d = domain,
            _ => entry.domain = Some(domain),
        }
        Ok(())
    }

    pub fn build(self) -> Result<Pipeline, GraphError> {
        let mut stages = Vec::with_capacity(self.entries.len());
        for (i, entry) in self.entries.into_iter().enumerate() {
            let kind = match entry.slot {
                Slot::Declared => return Err(GraphError::Undefined(entry.name)),
                Slot::Input(domain) => StageKind::Input { domain },
                Slot::Defined(producers) => StageKind::Computed {
                    producers,
                    domain: entry.domain,
                },
            };
            stages.push(Stage {
                id: StageId(i as u32),
                name: entry.name,
                vars: entry.vars,
                kind,
            });
        }

        for stage in &stages {
            for edge in stage.producers() {
                let producer = &stages[edge.producer.index()];
                if edge.footprint.needs_domain() && producer.domain().is_none() {
                    return Err(GraphError::UnboundedFootprint {
                        consumer: stage.name.clone(),
                        producer: producer.name.clone(),
                        kind: edge.footprint.kind_name(),
                    });
                }
            }
        }

        let mut consumers: Vec<Vec<StageId>> = vec![Vec::new(); stages.len()];
        for stage in &stages {
            for edge in stage.producers() {
                let list = &mut consumers[edge.producer.index()];
                if !list.contains(&stage.id) {
                    list.push(stage.id);
                }
            }
        }

        let topo = topological_sort(&stages, &consumers);
        Ok(Pipeline {
            stages,
            by_name: self.by_name,
            topo,
            consumers,
        })
    }

    fn entry(&self, id: StageId) -> Result<&Entry, GraphError> {
        self.entries
            .get(id.index())
            .ok_or(GraphError::UnknownHandle(id.0))
    }

    /// First cycle along producer → consumer edges, as stage names starting
    /// and ending at the same stage.
    fn find_cycle(&self) -> Option<Vec<String>> {
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); self.entries.len()];
        for (consumer, entry) in self.entries.iter().enumerate() {
            if let Slot::Defined(edges) = &entry.slot {
                for e in edges {
                    adj[e.producer.index()].push(consumer);
                }
            }
        }

        let mut visited = vec![0u8; self.entries.len()]; // 0 = unvisited, 1 = in progress, 2 = done
        let mut path = Vec::new();
        for start in 0..self.entries.len() {
            if visited[start] == 0 {
                if let Some(cycle) = dfs_cycle(start, &adj, &mut visited, &mut path) {
                    return Some(
                        cycle
                            .into_iter()
                            .map(|i| self.entries[i].name.clone())
                            .collect(),
                    );
                }
            }
        }
        None
    }
}

fn check_domain_rank(stage: &str, domain: &Region, expected: usize) -> Result<(), GraphError> {
    if domain.rank() != expected {
        return Err(GraphError::DomainRank {
            stage: stage.to_string(),
            domain: domain.clone(),
            expected,
        });
    }
    Ok(())
}

fn dfs_cycle(
    node: usize,
    adj: &[Vec<usize>],
    visited: &mut [u8],
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    visited[node] = 1;
    path.push(node);

    for &next in &adj[node] {
        match visited[next] {
            0 => {
                if let Some(cycle) = dfs_cycle(next, adj, visited, path) {
                    return Some(cycle);
                }
            }
            1 => {
                if let Some(pos) = path.iter().position(|&n| n == next) {
                    let mut cycle = path[pos..].to_vec();
                    cycle.push(next);
                    return Some(cycle);
                }
            }
            _ => {}
        }
    }

    path.pop();
    visited[node] = 2;
    None
}

/// Kahn's algorithm; the ready set is ordered by id so ties fall back to
/// declaration order.
fn topological_sort(stages: &[Stage], consumers: &[Vec<StageId>]) -> Vec<StageId> {
    let mut in_degree: Vec<usize> = stages
        .iter()
        .map(|s| {
            let distinct: BTreeSet<StageId> = s.producers().iter().map(|e| e.producer).collect();
            distinct.len()
        })
        .collect();

    let mut ready: BTreeSet<StageId> = stages
        .iter()
        .filter(|s| in_degree[s.id.index()] == 0)
        .map(|s| s.id)
        .collect();

    let mut order = Vec::with_capacity(stages.len());
    while let Some(id) = ready.pop_first() {
        order.push(id);
        for &c in &consumers[id.index()] {
            in_degree[c.index()] -= 1;
            if in_degree[c.index()] == 0 {
                ready.insert(c);
            }
        }
    }
    order
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline ({} stages)", self.stages.len())?;
        for &id in &self.topo {
            let stage = self.stage(id);
            write!(f, "  {}[{}]", stage.name, stage.vars.join(", "))?;
            match &stage.kind {
                StageKind::Input { domain } => write!(f, " input {}", domain)?,
                StageKind::Computed { producers, domain } => {
                    let reads: Vec<String> = producers
                        .iter()
                        .map(|e| format!("{} {}", self.name(e.producer), e.footprint))
                        .collect();
                    write!(f, " <- {}", reads.join(", "))?;
                    if let Some(d) = domain {
                        write!(f, " domain {}", d)?;
                    }
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
