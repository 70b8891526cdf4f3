// src/dag/graph.rs

use std::collections::{HashMap, VecDeque};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::plan::{Plan, TaskId};

/// In-memory task graph keyed by task id.
///
/// Edge direction is `dependency -> dependent`. Node indices follow
/// insertion order, so sorting neighbours by index gives declaration order
/// and keeps every traversal deterministic.
///
/// Building a graph never fails: duplicate ids keep their first occurrence
/// and references to unknown ids are dropped. Reporting those problems is
/// the validator's job.
#[derive(Debug, Clone)]
pub struct DagGraph {
    graph: DiGraph<TaskId, ()>,
    index: HashMap<TaskId, NodeIndex>,
}

impl DagGraph {
    /// Build a graph from a plan (not necessarily valid).
    pub fn from_plan(plan: &Plan) -> Self {
        Self::from_edges(
            plan.tasks
                .iter()
                .map(|t| (t.id.as_str(), t.dependencies.iter().map(|d| d.as_str()))),
        )
    }

    /// Build a graph from `(task, dependencies)` pairs.
    pub fn from_edges<'a, I, D>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, D)>,
        D: IntoIterator<Item = &'a str>,
    {
        let mut graph: DiGraph<TaskId, ()> = DiGraph::new();
        let mut index: HashMap<TaskId, NodeIndex> = HashMap::new();
        let mut pending_edges: Vec<(&'a str, &'a str)> = Vec::new();

        // First pass: nodes, so that forward references resolve.
        for (id, deps) in nodes {
            if !index.contains_key(id) {
                let idx = graph.add_node(id.to_string());
                index.insert(id.to_string(), idx);
                pending_edges.extend(deps.into_iter().map(|dep| (dep, id)));
            }
        }

        // Second pass: edges between known nodes.
        for (dep, task) in pending_edges {
            if let (Some(&from), Some(&to)) = (index.get(dep), index.get(task)) {
                if graph.find_edge(from, to).is_none() {
                    graph.add_edge(from, to, ());
                }
            }
        }

        Self { graph, index }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All task ids in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.graph.node_indices().map(|idx| self.graph[idx].as_str())
    }

    /// Immediate (known) dependencies of a task, in declaration order.
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, Direction::Incoming)
    }

    /// Immediate dependents of a task, in declaration order.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, Direction::Outgoing)
    }

    /// Stable topological order (Kahn's algorithm; ties broken by insertion
    /// order). Returns `None` if the graph has a cycle.
    pub fn topological_order(&self) -> Option<Vec<&str>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| self.graph.neighbors_directed(idx, Direction::Incoming).count())
            .collect();

        let mut ready: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(idx) = ready.pop_front() {
            order.push(self.graph[idx].as_str());

            let mut next = self.sorted_neighbours(idx, Direction::Outgoing);
            next.retain(|n| {
                in_degree[n.index()] -= 1;
                in_degree[n.index()] == 0
            });
            // Keep the ready queue ordered by insertion index.
            for n in next {
                let pos = ready
                    .iter()
                    .position(|r| r.index() > n.index())
                    .unwrap_or(ready.len());
                ready.insert(pos, n);
            }
        }

        if order.len() == self.len() {
            Some(order)
        } else {
            None
        }
    }

    fn neighbours(&self, id: &str, direction: Direction) -> Vec<&str> {
        match self.index.get(id) {
            Some(&idx) => self
                .sorted_neighbours(idx, direction)
                .into_iter()
                .map(|n| self.graph[n].as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    fn sorted_neighbours(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        out.sort_by_key(|n| n.index());
        out.dedup();
        out
    }
}
