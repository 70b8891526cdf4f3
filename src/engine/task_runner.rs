// src/engine/task_runner.rs

//! One attempt of one task.
//!
//! A [`TaskJob`] is an owned snapshot of everything an attempt needs. It
//! runs on its own Tokio task and reports an [`AttemptReport`]; it never
//! touches the run's records.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::agent::{AgentBackend, AgentMode, AgentRequest, AgentResponse, CommitMessageGenerator};
use crate::errors::Result;
use crate::plan::Task;
use crate::types::ExecutionMode;
use crate::workspace::{WorkspaceHandle, WorkspaceService};

use super::RunId;
use super::cancel::CancelSignal;
use super::core::{AttemptOutcome, AttemptReport};

/// Owned inputs of a single attempt.
#[derive(Debug, Clone)]
pub struct TaskJob {
    pub run_id: RunId,
    pub task: Task,
    pub mode: ExecutionMode,
    /// 1-based attempt number.
    pub attempt: u32,
    /// No retry follows if this attempt fails.
    pub final_attempt: bool,
    /// Main checkout.
    pub repo: PathBuf,
    /// Commit the workspace is rooted at (`execute` mode).
    pub base_commit: String,
    pub timeout: Option<Duration>,
    pub agent: Arc<dyn AgentBackend>,
    pub messages: Arc<dyn CommitMessageGenerator>,
    /// Present in `execute` mode.
    pub workspaces: Option<WorkspaceService>,
    pub cancel: CancelSignal,
}

enum AgentCall {
    Finished(Result<AgentResponse>),
    TimedOut(Duration),
    Cancelled,
}

impl TaskJob {
    pub async fn run(self) -> AttemptReport {
        let started = Instant::now();
        debug!(
            run_id = %self.run_id,
            task = %self.task.id,
            attempt = self.attempt,
            mode = %self.mode,
            "starting attempt"
        );

        let mut report = match self.mode {
            ExecutionMode::DryRun => AttemptReport::new(self.dry_run(), 0),
            ExecutionMode::Validate => AttemptReport::new(self.validate(), 0),
            ExecutionMode::Plan => AttemptReport::new(self.plan().await, 0),
            ExecutionMode::Execute => self.execute().await,
        };
        report.duration_ms = started.elapsed().as_millis() as u64;
        report
    }

    fn dry_run(&self) -> AttemptOutcome {
        AttemptOutcome::Succeeded {
            output: format!("[dry-run] {}: {}", self.task.id, self.task.title),
            commit: None,
            exit_code: None,
        }
    }

    fn validate(&self) -> AttemptOutcome {
        let mut problems = Vec::new();
        if self.task.instructions.trim().is_empty() {
            problems.push("instructions are empty".to_string());
        }
        if self.task.acceptance_criteria.iter().all(|c| c.trim().is_empty()) {
            problems.push("no acceptance criteria".to_string());
        }

        if problems.is_empty() {
            AttemptOutcome::Succeeded {
                output: format!(
                    "task '{}' has instructions and {} acceptance criteria",
                    self.task.id,
                    self.task.acceptance_criteria.len()
                ),
                commit: None,
                exit_code: None,
            }
        } else {
            AttemptOutcome::failed(format!("task '{}': {}", self.task.id, problems.join("; ")))
        }
    }

    async fn plan(&self) -> AttemptOutcome {
        let request = AgentRequest::for_task(&self.task, self.repo.clone(), AgentMode::Plan);
        match self.invoke_agent(&request).await {
            AgentCall::Finished(Ok(resp)) if resp.is_success() => AttemptOutcome::Succeeded {
                output: resp.output,
                commit: None,
                exit_code: resp.exit_code,
            },
            other => self.failure_from(other),
        }
    }

    async fn execute(&self) -> AttemptReport {
        let Some(workspaces) = self.workspaces.as_ref() else {
            return AttemptReport::new(AttemptOutcome::failed("no workspace service configured"), 0);
        };

        let branch = workspaces.branch_name_for(&self.task.id);
        let handle = match workspaces
            .create(&self.task.id, &branch, &self.repo, &self.base_commit)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                return AttemptReport::new(
                    AttemptOutcome::failed(format!("workspace creation failed: {err}")),
                    0,
                );
            }
        };

        let request = AgentRequest::for_task(&self.task, handle.path.clone(), AgentMode::Execute);
        let outcome = match self.invoke_agent(&request).await {
            AgentCall::Finished(Ok(resp)) if resp.is_success() => {
                let message = self.messages.message(&self.task);
                match workspaces.commit(&handle, &message).await {
                    Ok(commit) => AttemptOutcome::Succeeded {
                        output: resp.output,
                        commit,
                        exit_code: resp.exit_code,
                    },
                    Err(err) => AttemptOutcome::Failed {
                        error: format!("commit failed: {err}"),
                        output: Some(resp.output),
                        exit_code: resp.exit_code,
                    },
                }
            }
            other => self.failure_from(other),
        };

        let retained = self.finish_workspace(workspaces, &handle, &outcome).await;
        AttemptReport {
            outcome,
            duration_ms: 0,
            workspace: Some(handle),
            workspace_retained: retained,
        }
    }

    /// Dispose of the attempt's workspace. A failed attempt that will be
    /// retried always loses its workspace so the retry starts clean.
    async fn finish_workspace(
        &self,
        workspaces: &WorkspaceService,
        handle: &WorkspaceHandle,
        outcome: &AttemptOutcome,
    ) -> bool {
        let succeeded = outcome.is_success();
        let retrying = matches!(outcome, AttemptOutcome::Failed { .. }) && !self.final_attempt;

        if retrying {
            if let Err(err) = workspaces.remove(handle).await {
                warn!(task = %self.task.id, error = %err, "failed to remove workspace");
            }
            if let Err(err) = workspaces.delete_branch(handle).await {
                warn!(task = %self.task.id, error = %err, "failed to delete workspace branch");
            }
            return false;
        }

        match workspaces.dispose(handle, succeeded).await {
            Ok(retained) => retained,
            Err(err) => {
                warn!(task = %self.task.id, error = %err, "failed to clean up workspace");
                true
            }
        }
    }

    async fn invoke_agent(&self, request: &AgentRequest) -> AgentCall {
        let mut cancel = self.cancel.clone();
        if cancel.is_cancelled() {
            return AgentCall::Cancelled;
        }

        let call = self.agent.invoke(request);
        let bounded = async {
            match self.timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => AgentCall::Finished(result),
                    Err(_) => AgentCall::TimedOut(limit),
                },
                None => AgentCall::Finished(call.await),
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(run_id = %self.run_id, task = %self.task.id, "agent interrupted by cancellation");
                AgentCall::Cancelled
            }
            result = bounded => result,
        }
    }

    fn failure_from(&self, call: AgentCall) -> AttemptOutcome {
        match call {
            AgentCall::Cancelled => AttemptOutcome::Stopped {
                reason: "run cancelled".to_string(),
            },
            AgentCall::TimedOut(limit) => {
                AttemptOutcome::failed(format!("timed out after {}s", limit.as_secs_f64()))
            }
            AgentCall::Finished(Err(err)) => AttemptOutcome::failed(err.to_string()),
            AgentCall::Finished(Ok(resp)) => AttemptOutcome::Failed {
                error: resp
                    .error
                    .unwrap_or_else(|| "agent reported failure".to_string()),
                output: Some(resp.output).filter(|o| !o.is_empty()),
                exit_code: resp.exit_code,
            },
        }
    }
}
