// src/state/record.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

use crate::errors::{DagstackError, Result};
use crate::plan::TaskId;
use crate::state::machine::{TaskState, TaskStateChange};
use crate::workspace::WorkspaceHandle;

/// Runtime state of one task for one run.
///
/// Records are owned by the engine's run core; everything else sees clones.
#[derive(Debug, Clone, Serialize)]
pub struct TaskExecutionRecord {
    pub task_id: TaskId,
    pub state: TaskState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    /// Attempts this task may make in total (at least 1).
    pub max_attempts: u32,
    /// Duration of the last attempt.
    pub duration_ms: Option<u64>,
    pub workspace: Option<WorkspaceHandle>,
    /// The workspace was kept on disk for inspection.
    pub workspace_retained: bool,
    pub commit: Option<String>,
}

impl TaskExecutionRecord {
    pub fn new(task_id: impl Into<TaskId>, max_attempts: u32) -> Self {
        Self {
            task_id: task_id.into(),
            state: TaskState::Pending,
            started_at: None,
            finished_at: None,
            output: None,
            error: None,
            exit_code: None,
            retry_count: 0,
            max_attempts: max_attempts.max(1),
            duration_ms: None,
            workspace: None,
            workspace_retained: false,
            commit: None,
        }
    }

    /// Move to `next`, rejecting anything the state machine does not allow.
    pub fn transition_to(&mut self, next: TaskState) -> Result<TaskStateChange> {
        let from = self.state;
        let allowed = from.can_transition_to(next)
            && !(from == TaskState::Failed && next == TaskState::Queued && !self.can_retry());

        if !allowed {
            return Err(DagstackError::InvalidTransition {
                task: self.task_id.clone(),
                from,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            TaskState::Running if self.started_at.is_none() => self.started_at = Some(now),
            TaskState::Queued if from == TaskState::Failed => self.finished_at = None,
            s if s.is_terminal() => self.finished_at = Some(now),
            _ => {}
        }
        self.state = next;

        trace!(task = %self.task_id, %from, to = %next, "state transition");

        Ok(TaskStateChange {
            task_id: self.task_id.clone(),
            from,
            to: next,
        })
    }

    /// Whether another attempt fits in the budget. Only meaningful in `Failed`.
    pub fn can_retry(&self) -> bool {
        self.state == TaskState::Failed && self.retry_count < self.max_attempts
    }

    /// Record the failure details of the attempt that just ended.
    pub fn note_failure(&mut self, error: impl Into<String>) {
        self.retry_count += 1;
        self.error = Some(error.into());
    }

    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(max_attempts: u32) -> TaskExecutionRecord {
        let mut r = TaskExecutionRecord::new("A", max_attempts);
        r.transition_to(TaskState::Ready).unwrap();
        r.transition_to(TaskState::Queued).unwrap();
        r.transition_to(TaskState::Running).unwrap();
        r
    }

    #[test]
    fn rejects_invalid_transition_without_mutating() {
        let mut r = TaskExecutionRecord::new("A", 1);
        let err = r.transition_to(TaskState::Running).unwrap_err();
        assert!(matches!(
            err,
            DagstackError::InvalidTransition {
                from: TaskState::Pending,
                to: TaskState::Running,
                ..
            }
        ));
        assert_eq!(r.state, TaskState::Pending);
        assert!(r.started_at.is_none());
    }

    #[test]
    fn timestamps_follow_transitions() {
        let mut r = running(1);
        assert!(r.started_at.is_some());
        assert!(r.finished_at.is_none());
        r.transition_to(TaskState::Completed).unwrap();
        assert!(r.finished_at.is_some());
        assert!(r.is_success());
    }

    #[test]
    fn retry_requires_budget() {
        let mut r = running(2);
        r.transition_to(TaskState::Failed).unwrap();
        r.note_failure("boom");
        assert!(r.can_retry());
        r.transition_to(TaskState::Queued).unwrap();
        assert!(r.finished_at.is_none());
        r.transition_to(TaskState::Running).unwrap();
        r.transition_to(TaskState::Failed).unwrap();
        r.note_failure("boom again");

        assert_eq!(r.retry_count, 2);
        assert!(!r.can_retry());
        assert!(r.transition_to(TaskState::Queued).is_err());
        assert_eq!(r.state, TaskState::Failed);
        assert_eq!(r.error.as_deref(), Some("boom again"));
    }

    #[test]
    fn zero_budget_still_allows_one_attempt() {
        let r = TaskExecutionRecord::new("A", 0);
        assert_eq!(r.max_attempts, 1);
    }
}
