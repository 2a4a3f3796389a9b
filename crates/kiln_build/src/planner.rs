//! Groups modules into chunks and orders the chunks for compilation.
//!
//! Modules that depend on each other cyclically must be translated
//! together, so each strongly-connected component of the module graph
//! becomes one [`ModuleChunk`]. Chunks are emitted in dependency order;
//! ties keep the declaration order of the project.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::model::{ModuleId, ProjectModel};

/// A set of modules compiled together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleChunk {
    modules: Vec<ModuleId>,
}

impl ModuleChunk {
    /// Creates a chunk from its modules.
    pub fn new(mut modules: Vec<ModuleId>) -> Self {
        modules.sort();
        modules.dedup();
        Self { modules }
    }

    /// The chunk's modules, sorted.
    pub fn modules(&self) -> &[ModuleId] {
        &self.modules
    }

    /// Returns `true` if `module` is part of the chunk.
    pub fn contains(&self, module: ModuleId) -> bool {
        self.modules.binary_search(&module).is_ok()
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Returns `true` if the chunk holds no module.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module names, for display.
    pub fn names(&self, project: &ProjectModel) -> Vec<String> {
        self.modules
            .iter()
            .map(|id| project.module(*id).name.clone())
            .collect()
    }
}

/// Splits the project into chunks, dependencies first.
pub fn plan_chunks(project: &ProjectModel) -> Vec<ModuleChunk> {
    let mut graph: DiGraph<ModuleId, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = project
        .modules()
        .iter()
        .map(|m| graph.add_node(m.id))
        .collect();
    for module in project.modules() {
        let to = nodes[module.id.as_raw() as usize];
        for dep in &module.dependencies {
            let from = nodes[dep.as_raw() as usize];
            graph.add_edge(from, to, ());
        }
    }

    let components: Vec<ModuleChunk> = tarjan_scc(&graph)
        .into_iter()
        .map(|scc| ModuleChunk::new(scc.into_iter().map(|n| graph[n]).collect()))
        .collect();

    let mut component_of = vec![0usize; nodes.len()];
    for (c, chunk) in components.iter().enumerate() {
        for id in chunk.modules() {
            component_of[id.as_raw() as usize] = c;
        }
    }

    // Kahn's algorithm over the condensation, smallest first module first.
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); components.len()];
    let mut in_degree = vec![0usize; components.len()];
    for module in project.modules() {
        let to = component_of[module.id.as_raw() as usize];
        for dep in &module.dependencies {
            let from = component_of[dep.as_raw() as usize];
            if from != to && !successors[from].contains(&to) {
                successors[from].push(to);
                in_degree[to] += 1;
            }
        }
    }

    let first_module = |c: usize| components[c].modules()[0];
    let mut ready: BinaryHeap<Reverse<(ModuleId, usize)>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(c, _)| Reverse((first_module(c), c)))
        .collect();

    let mut order = Vec::with_capacity(components.len());
    while let Some(Reverse((_, c))) = ready.pop() {
        order.push(c);
        for &next in &successors[c] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse((first_module(next), next)));
            }
        }
    }

    let mut slots: Vec<Option<ModuleChunk>> = components.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|c| slots[c].take())
        .collect()
}
