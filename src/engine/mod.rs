// src/engine/mod.rs

//! Execution engine for dagstack.
//!
//! This module ties together:
//! - the pure run core ([`core`]), the single owner of every task record
//! - the per-task attempt runner ([`task_runner`]), one per dispatched job
//! - the async shell ([`runtime`]) that walks the layers, dispatches jobs,
//!   applies their outcomes to the core and finally builds the stack
//! - retries, cancellation and progress events
//!
//! Jobs never touch shared state: they get owned snapshots of what they need
//! and hand back an outcome, which the runtime loop applies to the core.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::dag::ValidationReport;
use crate::stack::{StackOptions, StackResult};
use crate::state::{TaskExecutionRecord, TaskState};
use crate::types::{ExecutionMode, ExecutionStrategy};
use crate::workspace::WorkspaceOptions;

pub mod cancel;
pub mod core;
pub mod events;
pub mod retry;
pub mod runtime;
pub mod task_runner;

pub use cancel::{CancelRegistry, CancelSignal};
pub use core::{AttemptOutcome, AttemptReport, Decision, RunCore, TaskCounts};
pub use events::{EventBus, ProgressEvent};
pub use retry::RetryPolicy;
pub use runtime::ExecutionEngine;

/// Identifier of one execution of a plan.
pub type RunId = Uuid;

/// Everything that shapes one run besides the plan itself.
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    pub mode: ExecutionMode,
    /// Overrides the plan's strategy when set.
    pub strategy: Option<ExecutionStrategy>,
    /// Main checkout; agents run here in `plan` mode.
    pub working_dir: PathBuf,
    /// Reference workspaces are rooted at.
    pub base_ref: String,
    pub build_stack: bool,
    pub continue_on_error: bool,
    pub task_timeout: Option<Duration>,
    /// `0` disables task retries; otherwise each task's own budget applies.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub retry_backoff: f64,
    /// Upper bound on concurrent tasks within a layer.
    pub max_concurrency: Option<usize>,
    pub workspace: WorkspaceOptions,
    pub stack: StackOptions,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            strategy: None,
            working_dir: PathBuf::from("."),
            base_ref: "HEAD".to_string(),
            build_stack: true,
            continue_on_error: false,
            task_timeout: None,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            retry_backoff: 2.0,
            max_concurrency: None,
            workspace: WorkspaceOptions::default(),
            stack: StackOptions::default(),
        }
    }
}

impl ExecutionOptions {
    /// Back-off policy for task-level retries.
    pub fn task_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_delay, self.retry_backoff)
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub run_id: RunId,
    pub plan: String,
    pub mode: ExecutionMode,
    pub strategy: ExecutionStrategy,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub stopped: usize,
    /// One record per task, in plan order.
    pub tasks: Vec<TaskExecutionRecord>,
    pub validation: ValidationReport,
    /// A failure stopped the run early (`continue_on_error = false`).
    pub aborted: bool,
    pub cancelled: bool,
    pub stack: Option<StackResult>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.failed == 0
            && self.stopped == 0
            && self.skipped == 0
            && !self.aborted
            && !self.cancelled
            && self.stack.as_ref().is_none_or(StackResult::is_success)
    }

    pub fn record(&self, task_id: &str) -> Option<&TaskExecutionRecord> {
        self.tasks.iter().find(|r| r.task_id == task_id)
    }

    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.record(task_id).map(|r| r.state)
    }
}
