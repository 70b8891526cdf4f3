// src/engine/core.rs

//! Pure run core.
//!
//! Owns the execution record of every task for one run and applies state
//! transitions to them. It has no channels, no Tokio types and performs no
//! IO; the async shell ([`super::runtime`]) feeds it job outcomes and acts
//! on the decisions it returns. Every change it makes is returned as a
//! [`TaskStateChange`] so the shell can publish progress events.

use std::collections::HashMap;
use std::time::Duration;

use crate::errors::{DagstackError, Result};
use crate::plan::{Plan, Task, TaskId};
use crate::stack::CompletedTask;
use crate::state::{TaskExecutionRecord, TaskState, TaskStateChange};
use crate::workspace::WorkspaceHandle;

use super::retry::RetryPolicy;

/// How one attempt of a task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded {
        output: String,
        commit: Option<String>,
        exit_code: Option<i32>,
    },
    Failed {
        error: String,
        output: Option<String>,
        exit_code: Option<i32>,
    },
    /// Interrupted by cancellation.
    Stopped { reason: String },
}

impl AttemptOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        AttemptOutcome::Failed {
            error: error.into(),
            output: None,
            exit_code: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Succeeded { .. })
    }
}

/// What a job reports back for one attempt.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub outcome: AttemptOutcome,
    pub duration_ms: u64,
    pub workspace: Option<WorkspaceHandle>,
    pub workspace_retained: bool,
}

impl AttemptReport {
    pub fn new(outcome: AttemptOutcome, duration_ms: u64) -> Self {
        Self {
            outcome,
            duration_ms,
            workspace: None,
            workspace_retained: false,
        }
    }
}

/// What the shell should do after an attempt was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Completed,
    /// Wait `delay`, then re-queue for attempt number `attempt`.
    Retry { attempt: u32, delay: Duration },
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub stopped: usize,
}

/// Tasks promoted at the start of a layer.
#[derive(Debug, Clone, Default)]
pub struct LayerStart {
    /// Tasks whose dependencies all completed, now `ready`.
    pub ready: Vec<TaskId>,
    pub changes: Vec<TaskStateChange>,
}

#[derive(Debug)]
pub struct RunCore {
    plan: Plan,
    layers: Vec<Vec<TaskId>>,
    records: Vec<TaskExecutionRecord>,
    index: HashMap<TaskId, usize>,
    retry: RetryPolicy,
    retries_enabled: bool,
    /// Each task is judged on its own: no retries, no dependency gate.
    independent: bool,
}

impl RunCore {
    /// `retry_attempts == 0` disables task retries; otherwise each task may
    /// make `task.max_retries` attempts. `retry` supplies the back-off.
    pub fn new(plan: &Plan, layers: Vec<Vec<TaskId>>, retry: RetryPolicy, retry_attempts: u32) -> Self {
        let retries_enabled = retry_attempts != 0;
        let mut records = Vec::with_capacity(plan.tasks.len());
        let mut index = HashMap::with_capacity(plan.tasks.len());

        for task in &plan.tasks {
            if index.contains_key(&task.id) {
                continue;
            }
            let budget = if retries_enabled { task.max_retries } else { 1 };
            index.insert(task.id.clone(), records.len());
            records.push(TaskExecutionRecord::new(task.id.clone(), budget));
        }

        Self {
            plan: plan.clone(),
            layers,
            records,
            index,
            retry,
            retries_enabled,
            independent: false,
        }
    }

    /// Judge every task on its own, as `validate` mode does: a single
    /// attempt each, and dependencies do not gate promotion.
    pub fn with_independent_tasks(mut self) -> Self {
        self.independent = true;
        self.retries_enabled = false;
        for record in &mut self.records {
            record.max_attempts = 1;
        }
        self
    }

    pub fn tasks_are_independent(&self) -> bool {
        self.independent
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn layers(&self) -> &[Vec<TaskId>] {
        &self.layers
    }

    pub fn records(&self) -> &[TaskExecutionRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TaskExecutionRecord> {
        self.records
    }

    pub fn record(&self, id: &str) -> Option<&TaskExecutionRecord> {
        self.index.get(id).map(|&i| &self.records[i])
    }

    pub fn state_of(&self, id: &str) -> Option<TaskState> {
        self.record(id).map(|r| r.state)
    }

    fn record_mut(&mut self, id: &str) -> Result<&mut TaskExecutionRecord> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.records[i]),
            None => Err(DagstackError::TaskNotFound(id.to_string())),
        }
    }

    pub fn transition(&mut self, id: &str, to: TaskState) -> Result<TaskStateChange> {
        self.record_mut(id)?.transition_to(to)
    }

    /// Move the layer's pending tasks to `ready`, or to `failed` naming the
    /// first dependency that did not complete.
    pub fn promote_layer(&mut self, layer: usize) -> Result<LayerStart> {
        let ids = self.layers.get(layer).cloned().unwrap_or_default();
        let mut start = LayerStart::default();

        for id in ids {
            if self.state_of(&id) != Some(TaskState::Pending) {
                continue;
            }
            let blocking = if self.independent {
                None
            } else {
                self.plan.task(&id).and_then(|task| {
                    task.dependencies
                        .iter()
                        .find(|dep| self.state_of(dep) != Some(TaskState::Completed))
                        .cloned()
                })
            };

            match blocking {
                None => {
                    start.changes.push(self.transition(&id, TaskState::Ready)?);
                    start.ready.push(id);
                }
                Some(dep) => {
                    let state = self
                        .state_of(&dep)
                        .map_or_else(|| "missing".to_string(), |s| s.to_string());
                    let record = self.record_mut(&id)?;
                    let change = record.transition_to(TaskState::Failed)?;
                    record.error = Some(format!("dependency '{dep}' did not complete ({state})"));
                    start.changes.push(change);
                }
            }
        }

        Ok(start)
    }

    /// Apply the report of one attempt of a `running` task.
    pub fn apply_attempt(
        &mut self,
        id: &str,
        report: AttemptReport,
    ) -> Result<(Decision, TaskStateChange)> {
        let retry = self.retry;
        let retries_enabled = self.retries_enabled;
        let record = self.record_mut(id)?;

        record.duration_ms = Some(report.duration_ms);
        if report.workspace.is_some() {
            record.workspace = report.workspace;
        }
        record.workspace_retained = report.workspace_retained;

        match report.outcome {
            AttemptOutcome::Succeeded {
                output,
                commit,
                exit_code,
            } => {
                let change = record.transition_to(TaskState::Completed)?;
                record.output = Some(output);
                record.commit = commit;
                record.exit_code = exit_code;
                record.error = None;
                Ok((Decision::Completed, change))
            }
            AttemptOutcome::Failed {
                error,
                output,
                exit_code,
            } => {
                let change = record.transition_to(TaskState::Failed)?;
                record.note_failure(error);
                record.output = output;
                record.exit_code = exit_code;

                let decision = if retries_enabled && record.can_retry() {
                    Decision::Retry {
                        attempt: record.retry_count + 1,
                        delay: retry.delay_for(record.retry_count),
                    }
                } else {
                    Decision::Failed
                };
                Ok((decision, change))
            }
            AttemptOutcome::Stopped { reason } => {
                let change = record.transition_to(TaskState::Stopped)?;
                record.error = Some(reason);
                Ok((Decision::Stopped, change))
            }
        }
    }

    /// Whether the next attempt of a task is its last one.
    pub fn is_final_attempt(&self, id: &str) -> bool {
        self.record(id)
            .map(|r| !self.retries_enabled || r.retry_count + 1 >= r.max_attempts)
            .unwrap_or(true)
    }

    /// Every task not yet started becomes `skipped`.
    pub fn skip_remaining(&mut self) -> Vec<TaskStateChange> {
        let mut changes = Vec::new();
        for record in &mut self.records {
            if matches!(
                record.state,
                TaskState::Pending | TaskState::Ready | TaskState::Queued
            ) {
                if let Ok(change) = record.transition_to(TaskState::Skipped) {
                    changes.push(change);
                }
            }
        }
        changes
    }

    /// Fail every pending task with the same error.
    pub fn fail_all(&mut self, error: &str) -> Vec<TaskStateChange> {
        let mut changes = Vec::new();
        for record in &mut self.records {
            if let Ok(change) = record.transition_to(TaskState::Failed) {
                record.error = Some(error.to_string());
                changes.push(change);
            }
        }
        changes
    }

    /// First task of the layer that ended `failed`.
    pub fn first_failure(&self, layer: usize) -> Option<&str> {
        self.layers
            .get(layer)?
            .iter()
            .find(|id| self.state_of(id) == Some(TaskState::Failed))
            .map(String::as_str)
    }

    /// Commit a task's workspace starts from: the commit of its only
    /// dependency that produced one, else `run_base`.
    pub fn base_commit_for(&self, task: &Task, run_base: &str) -> String {
        let mut commits = task
            .dependencies
            .iter()
            .filter_map(|dep| self.record(dep).and_then(|r| r.commit.as_deref()));
        match (commits.next(), commits.next()) {
            (Some(only), None) => only.to_string(),
            _ => run_base.to_string(),
        }
    }

    /// Completed tasks in layer order, ready for stacking.
    pub fn completed_tasks(&self) -> Vec<CompletedTask> {
        self.layers
            .iter()
            .flatten()
            .filter_map(|id| {
                let record = self.record(id)?;
                if record.state != TaskState::Completed {
                    return None;
                }
                let task = self.plan.task(id)?;
                Some(CompletedTask {
                    id: task.id.clone(),
                    title: task.title.clone(),
                    dependencies: task.dependencies.clone(),
                    commit: record.commit.clone(),
                })
            })
            .collect()
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts {
            total: self.records.len(),
            ..TaskCounts::default()
        };
        for record in &self.records {
            match record.state {
                TaskState::Completed => counts.completed += 1,
                TaskState::Failed => counts.failed += 1,
                TaskState::Skipped => counts.skipped += 1,
                TaskState::Stopped => counts.stopped += 1,
                _ => {}
            }
        }
        counts
    }
}
