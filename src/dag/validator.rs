// src/dag/validator.rs

//! Structural validation of a plan.
//!
//! Problems are collected into a [`ValidationReport`] instead of being
//! returned as errors: the caller decides whether an invalid plan blocks the
//! run (the engine refuses to execute) or is merely reported (`validate`
//! mode).

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::dag::graph::DagGraph;
use crate::dag::layers::{DagMetrics, layers_for_graph};
use crate::plan::{Plan, TaskId};

/// A file claimed (`touches ∪ produces`) by more than one task of a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileConflict {
    pub file: String,
    pub layer: usize,
    pub tasks: Vec<TaskId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// Full cycle path, first node repeated at the end (`A -> B -> A`).
    pub cycle: Option<Vec<TaskId>>,
    pub conflicts: Vec<FileConflict>,
    /// Human readable description of every problem found.
    pub errors: Vec<String>,
    /// Computed layers; empty when the graph could not be layered.
    pub layers: Vec<Vec<TaskId>>,
    pub metrics: Option<DagMetrics>,
}

impl ValidationReport {
    /// Every file involved in a same-layer conflict, sorted.
    pub fn conflicting_files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = self.conflicts.iter().map(|c| c.file.as_str()).collect();
        files.sort_unstable();
        files.dedup();
        files
    }
}

/// Validate a plan: duplicates, dangling references, cycles, same-layer
/// file conflicts; plus layers and metrics when the graph allows it.
pub fn validate(plan: &Plan) -> ValidationReport {
    let mut errors = check_references(plan);

    let graph = DagGraph::from_plan(plan);
    let cycle = detect_cycle(&graph);

    let mut layers = Vec::new();
    let mut metrics = None;
    let mut conflicts = Vec::new();

    match &cycle {
        Some(path) => {
            errors.push(format!("dependency cycle: {}", path.join(" -> ")));
        }
        None => match layers_for_graph(&graph) {
            Ok(computed) => {
                conflicts = detect_conflicts(plan, &computed);
                for c in &conflicts {
                    errors.push(format!(
                        "file '{}' is claimed by tasks {} in layer {}",
                        c.file,
                        c.tasks.join(", "),
                        c.layer
                    ));
                }
                metrics = Some(DagMetrics::from_layers(&computed));
                layers = computed;
            }
            Err(e) => errors.push(e.to_string()),
        },
    }

    let valid = errors.is_empty();
    debug!(
        plan = %plan.name,
        valid,
        errors = errors.len(),
        layers = layers.len(),
        "plan validated"
    );

    ValidationReport {
        valid,
        cycle,
        conflicts,
        errors,
        layers,
        metrics,
    }
}

/// Ids, duplicates, dangling dependencies and phases.
fn check_references(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();

    if plan.tasks.is_empty() {
        errors.push("plan must contain at least one task".to_string());
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for task in &plan.tasks {
        if task.id.is_empty() {
            errors.push(format!("task '{}' has an empty id", task.title));
            continue;
        }
        if !seen.insert(task.id.as_str()) {
            errors.push(format!("duplicate task id '{}'", task.id));
        }
    }

    let known: HashSet<&str> = plan.task_ids().collect();
    for task in &plan.tasks {
        for dep in &task.dependencies {
            if dep == &task.id {
                errors.push(format!("task '{}' depends on itself", task.id));
            } else if !known.contains(dep.as_str()) {
                errors.push(format!(
                    "task '{}' depends on unknown task '{}'",
                    task.id, dep
                ));
            }
        }
    }

    for phase in &plan.phases {
        for id in &phase.tasks {
            if !known.contains(id.as_str()) {
                errors.push(format!(
                    "phase '{}' references unknown task '{}'",
                    phase.name, id
                ));
            }
        }
    }

    errors
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    OnStack,
    Done,
}

/// Depth-first search over dependency edges with an explicit stack of
/// frames rather than call recursion. Returns the first cycle found, as a
/// path that starts and ends on the same task.
pub fn detect_cycle(graph: &DagGraph) -> Option<Vec<TaskId>> {
    let mut state: HashMap<&str, Visit> = HashMap::new();

    for id in graph.tasks() {
        if state.contains_key(id) {
            continue;
        }
        if let Some(cycle) = visit(graph, id, &mut state) {
            return Some(cycle);
        }
    }
    None
}

/// A task on the current DFS path and the index of its next dependency.
struct Frame<'a> {
    node: &'a str,
    deps: Vec<&'a str>,
    next: usize,
}

fn visit<'a>(
    graph: &'a DagGraph,
    root: &'a str,
    state: &mut HashMap<&'a str, Visit>,
) -> Option<Vec<TaskId>> {
    state.insert(root, Visit::OnStack);
    let mut path = vec![Frame {
        node: root,
        deps: graph.dependencies_of(root),
        next: 0,
    }];

    while let Some(frame) = path.last_mut() {
        let Some(&dep) = frame.deps.get(frame.next) else {
            state.insert(frame.node, Visit::Done);
            path.pop();
            continue;
        };
        frame.next += 1;

        match state.get(dep) {
            Some(Visit::OnStack) => {
                let start = path.iter().position(|f| f.node == dep).unwrap_or(0);
                let mut cycle: Vec<TaskId> = path[start..].iter().map(|f| f.node.to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
            Some(Visit::Done) => {}
            None => {
                state.insert(dep, Visit::OnStack);
                path.push(Frame {
                    node: dep,
                    deps: graph.dependencies_of(dep),
                    next: 0,
                });
            }
        }
    }

    None
}

/// Same-layer overlap of `touches ∪ produces`. Cross-layer sharing is fine:
/// execution order already serializes it.
pub fn detect_conflicts(plan: &Plan, layers: &[Vec<TaskId>]) -> Vec<FileConflict> {
    let mut conflicts = Vec::new();

    for (layer_idx, layer) in layers.iter().enumerate() {
        // BTreeMap keeps the report sorted by file.
        let mut claims: BTreeMap<&str, Vec<TaskId>> = BTreeMap::new();
        for id in layer {
            if let Some(task) = plan.task(id) {
                for file in task.claimed_files() {
                    claims.entry(file).or_default().push(task.id.clone());
                }
            }
        }

        for (file, tasks) in claims {
            if tasks.len() > 1 {
                conflicts.push(FileConflict {
                    file: file.to_string(),
                    layer: layer_idx,
                    tasks,
                });
            }
        }
    }

    conflicts
}
