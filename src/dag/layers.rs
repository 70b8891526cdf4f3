// src/dag/layers.rs

//! Topological layering and parallelism metrics.

use std::collections::HashMap;

use serde::Serialize;

use crate::dag::graph::DagGraph;
use crate::errors::{DagstackError, Result};
use crate::plan::{Plan, TaskId};

/// Coarse parallelism figures for a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DagMetrics {
    pub task_count: usize,
    /// Largest number of tasks in any single layer.
    pub max_parallelism: usize,
    /// Number of layers, i.e. the critical path length in tasks.
    pub layer_count: usize,
    /// `task_count / layer_count`. Not a wall-clock estimate.
    pub estimated_speedup: f64,
}

impl DagMetrics {
    pub fn from_layers(layers: &[Vec<TaskId>]) -> Self {
        let task_count: usize = layers.iter().map(Vec::len).sum();
        let layer_count = layers.len();
        let max_parallelism = layers.iter().map(Vec::len).max().unwrap_or(0);
        let estimated_speedup = if layer_count == 0 {
            0.0
        } else {
            task_count as f64 / layer_count as f64
        };

        Self {
            task_count,
            max_parallelism,
            layer_count,
            estimated_speedup,
        }
    }
}

/// Layer index of every task: 0 without dependencies, otherwise one more
/// than the deepest dependency.
///
/// Walks a topological order, so every dependency is layered before its
/// dependents and deep chains need no recursion.
///
/// Fails with [`DagstackError::InvalidPlan`] if the graph has a cycle; run
/// cycle detection first to get a useful trace.
pub fn layer_indices(graph: &DagGraph) -> Result<HashMap<TaskId, usize>> {
    let order = graph.topological_order().ok_or_else(|| {
        DagstackError::InvalidPlan("cannot layer tasks: dependency graph has a cycle".to_string())
    })?;

    let mut layers: HashMap<&str, usize> = HashMap::with_capacity(order.len());
    for id in order {
        let layer = graph
            .dependencies_of(id)
            .into_iter()
            .filter_map(|dep| layers.get(dep))
            .map(|&l| l + 1)
            .max()
            .unwrap_or(0);
        layers.insert(id, layer);
    }

    Ok(layers.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
}

/// Group tasks into execution layers. Within a layer tasks keep the order
/// in which they were declared, so the result is a pure function of the plan.
pub fn compute_layers(plan: &Plan) -> Result<Vec<Vec<TaskId>>> {
    let graph = DagGraph::from_plan(plan);
    layers_for_graph(&graph)
}

pub(crate) fn layers_for_graph(graph: &DagGraph) -> Result<Vec<Vec<TaskId>>> {
    let indices = layer_indices(graph)?;
    let depth = indices.values().copied().max().map_or(0, |m| m + 1);

    let mut layers: Vec<Vec<TaskId>> = vec![Vec::new(); depth];
    for id in graph.tasks() {
        if let Some(&layer) = indices.get(id) {
            layers[layer].push(id.to_string());
        }
    }

    Ok(layers)
}

/// Metrics for a plan; fails like [`compute_layers`] on cyclic plans.
pub fn calculate_metrics(plan: &Plan) -> Result<DagMetrics> {
    let layers = compute_layers(plan)?;
    Ok(DagMetrics::from_layers(&layers))
}
