// src/state/machine.rs

use std::fmt;

use serde::Serialize;

use crate::plan::TaskId;

/// Lifecycle state of a task within one run.
///
/// ```text
/// pending -> ready -> queued -> running -> completed
///    |         |        |          |-----> failed --(retry budget)--> queued
///    |         |        |          '-----> stopped
///    |-> failed (dependency did not complete)
///    '---------'--------'--> skipped (run aborted or cancelled)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Ready,
    Queued,
    Running,
    Completed,
    Failed,
    Stopped,
    Skipped,
}

impl TaskState {
    /// Whether `self -> next` is a legal edge of the state machine.
    ///
    /// `Failed -> Queued` is structurally allowed here; whether the retry
    /// budget permits it is checked by the record.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Failed)
                | (Pending, Skipped)
                | (Ready, Queued)
                | (Ready, Skipped)
                | (Queued, Running)
                | (Queued, Skipped)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Stopped)
                | (Failed, Queued)
        )
    }

    /// States no transition leaves (ignoring retries out of `Failed`).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Stopped | TaskState::Skipped
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, TaskState::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Ready => "ready",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Stopped => "stopped",
            TaskState::Skipped => "skipped",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition that was applied to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStateChange {
    pub task_id: TaskId,
    pub from: TaskState,
    pub to: TaskState,
}
