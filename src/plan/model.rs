// src/plan/model.rs

use serde::{Deserialize, Serialize};

use crate::types::{Complexity, ExecutionStrategy};

/// Canonical task identifier type used throughout the crate.
pub type TaskId = String;

/// Default retry budget for a task that does not declare one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// A plan document as written by a planner or a human:
///
/// ```json
/// {
///   "name": "split auth refactor",
///   "strategy": "parallel",
///   "tasks": [
///     { "id": "A", "name": "Extract trait", "description": "...",
///       "files": ["src/auth.rs"], "dependencies": [] },
///     { "id": "B", "name": "Port callers", "description": "...",
///       "files": ["src/api.rs"], "dependencies": ["A"] }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDocument {
    pub name: String,

    #[serde(default)]
    pub strategy: ExecutionStrategy,

    #[serde(default)]
    pub phases: Vec<Phase>,

    #[serde(default)]
    pub tasks: Vec<TaskDocument>,
}

/// A named group of tasks. Informational; the executed grouping is always
/// the computed layering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<TaskId>,
}

/// `tasks[]` entry of a [`PlanDocument`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDocument {
    pub id: TaskId,

    /// Human readable title.
    pub name: String,

    #[serde(default)]
    pub complexity: Complexity,

    /// Free-text instructions for the agent.
    #[serde(default)]
    pub description: String,

    /// Files the task may modify.
    #[serde(default, alias = "touches")]
    pub files: Vec<String>,

    /// Files the task creates.
    #[serde(default)]
    pub produces: Vec<String>,

    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    #[serde(default)]
    pub dependencies: Vec<TaskId>,

    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Runtime plan: an ordered list of tasks plus the preferred strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub name: String,
    pub strategy: ExecutionStrategy,
    pub phases: Vec<Phase>,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub instructions: String,
    pub touches: Vec<String>,
    pub produces: Vec<String>,
    pub dependencies: Vec<TaskId>,
    pub acceptance_criteria: Vec<String>,
    pub complexity: Complexity,
    pub max_retries: u32,
}

impl Task {
    /// Minimal task with defaults for everything but id and title.
    pub fn new(id: impl Into<TaskId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            instructions: String::new(),
            touches: Vec::new(),
            produces: Vec::new(),
            dependencies: Vec::new(),
            acceptance_criteria: Vec::new(),
            complexity: Complexity::default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// `touches ∪ produces`, in declaration order, without duplicates.
    pub fn claimed_files(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::with_capacity(self.touches.len() + self.produces.len());
        for file in self.touches.iter().chain(self.produces.iter()) {
            if !out.contains(&file.as_str()) {
                out.push(file.as_str());
            }
        }
        out
    }
}

impl Plan {
    pub fn new(name: impl Into<String>, strategy: ExecutionStrategy, tasks: Vec<Task>) -> Self {
        Self {
            name: name.into(),
            strategy,
            phases: Vec::new(),
            tasks,
        }
    }

    /// First task with the given id.
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.id.as_str())
    }
}

impl From<TaskDocument> for Task {
    fn from(doc: TaskDocument) -> Self {
        Self {
            id: doc.id.trim().to_string(),
            title: doc.name,
            instructions: doc.description,
            touches: normalize_paths(doc.files),
            produces: normalize_paths(doc.produces),
            dependencies: doc
                .dependencies
                .into_iter()
                .map(|d| d.trim().to_string())
                .collect(),
            acceptance_criteria: doc.acceptance_criteria,
            complexity: doc.complexity,
            max_retries: doc.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        }
    }
}

impl From<PlanDocument> for Plan {
    fn from(doc: PlanDocument) -> Self {
        Self {
            name: doc.name,
            strategy: doc.strategy,
            phases: doc.phases,
            tasks: doc.tasks.into_iter().map(Task::from).collect(),
        }
    }
}

/// Paths are compared textually when detecting conflicts, so strip the
/// trivial differences (`./` prefixes, surrounding whitespace).
fn normalize_paths(paths: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(paths.len());
    for p in paths {
        let trimmed = p.trim();
        let trimmed = trimmed.strip_prefix("./").unwrap_or(trimmed);
        if trimmed.is_empty() {
            continue;
        }
        let owned = trimmed.to_string();
        if !out.contains(&owned) {
            out.push(owned);
        }
    }
    out
}
