// src/engine/runtime.rs

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{AgentBackend, CommitMessageGenerator, TemplateCommitMessages};
use crate::dag::{ValidationReport, validate};
use crate::errors::{DagstackError, Result};
use crate::plan::{Plan, TaskId};
use crate::stack::{StackBuilder, StackFailure, StackResult};
use crate::state::{TaskState, TaskStateChange};
use crate::types::{ExecutionMode, ExecutionStrategy};
use crate::vcs::VcsBackend;
use crate::workspace::{WorkspaceService, default_root};

use super::cancel::{CancelRegistry, CancelSignal};
use super::core::{AttemptOutcome, AttemptReport, Decision, RunCore};
use super::events::{EventBus, ProgressEvent};
use super::task_runner::TaskJob;
use super::{ExecutionOptions, ExecutionResult, RunId};

/// What a finished job hands back to the layer loop.
#[derive(Debug)]
enum JobResult {
    Attempt(AttemptReport),
    /// Back-off elapsed; the task can be re-queued.
    RetryDue,
    /// The run was cancelled during back-off.
    RetryCancelled,
}

/// Per-run values shared by the layer loop.
struct RunContext<'a> {
    run_id: RunId,
    options: &'a ExecutionOptions,
    strategy: ExecutionStrategy,
    base_commit: String,
    workspace_root: PathBuf,
    workspaces: Option<WorkspaceService>,
    cancel: CancelSignal,
}

#[derive(Debug, Default)]
struct RunFlags {
    aborted: bool,
    cancelled: bool,
    stack: Option<StackResult>,
}

/// Runs plans: validates, walks the layers dispatching task attempts,
/// then builds the stack.
///
/// This is the async shell around [`RunCore`], which holds the semantics.
/// The engine itself is stateless between runs apart from the cancellation
/// registry, so one engine can drive several runs concurrently.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    agent: Arc<dyn AgentBackend>,
    vcs: Arc<dyn VcsBackend>,
    messages: Arc<dyn CommitMessageGenerator>,
    events: EventBus,
    cancels: CancelRegistry,
}

impl ExecutionEngine {
    pub fn new(agent: Arc<dyn AgentBackend>, vcs: Arc<dyn VcsBackend>) -> Self {
        Self {
            agent,
            vcs,
            messages: Arc::new(TemplateCommitMessages::default()),
            events: EventBus::default(),
            cancels: CancelRegistry::new(),
        }
    }

    pub fn with_commit_messages(mut self, messages: Arc<dyn CommitMessageGenerator>) -> Self {
        self.messages = messages;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    /// Cancel an active run. Returns false if no such run is active.
    pub fn cancel(&self, run_id: RunId) -> bool {
        self.cancels.cancel(run_id)
    }

    pub fn is_running(&self, run_id: RunId) -> bool {
        self.cancels.is_active(run_id)
    }

    pub async fn execute(&self, plan: &Plan, options: ExecutionOptions) -> Result<ExecutionResult> {
        self.execute_run(Uuid::new_v4(), plan, options).await
    }

    /// Execute under a caller-chosen run id, so the caller can cancel it
    /// while it runs.
    ///
    /// An invalid plan is an error in every mode but `validate`, where it
    /// yields a result with every task failed.
    pub async fn execute_run(
        &self,
        run_id: RunId,
        plan: &Plan,
        options: ExecutionOptions,
    ) -> Result<ExecutionResult> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let report = validate(plan);
        let strategy = options.strategy.unwrap_or(plan.strategy);

        if !report.valid && options.mode != ExecutionMode::Validate {
            warn!(run_id = %run_id, errors = ?report.errors, "refusing to execute invalid plan");
            return Err(DagstackError::InvalidPlan(report.errors.join("; ")));
        }

        let mut core = RunCore::new(
            plan,
            report.layers.clone(),
            options.task_retry_policy(),
            options.retry_attempts,
        );
        if options.mode == ExecutionMode::Validate {
            core = core.with_independent_tasks();
        }

        let cancel = self.cancels.register(run_id);
        info!(
            run_id = %run_id,
            plan = %plan.name,
            mode = %options.mode,
            strategy = %strategy,
            tasks = plan.tasks.len(),
            layers = report.layers.len(),
            "run started"
        );
        self.events.emit(ProgressEvent::RunStarted {
            run_id,
            plan: plan.name.clone(),
            mode: options.mode,
            strategy,
            task_count: plan.tasks.len(),
            layer_count: report.layers.len(),
        });

        let flags = self
            .drive(run_id, &mut core, &report, &options, strategy, cancel)
            .await;
        self.cancels.unregister(run_id);
        let flags = flags?;

        let counts = core.counts();
        let result = ExecutionResult {
            run_id,
            plan: plan.name.clone(),
            mode: options.mode,
            strategy,
            started_at,
            finished_at: Utc::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            total: counts.total,
            completed: counts.completed,
            failed: counts.failed,
            skipped: counts.skipped,
            stopped: counts.stopped,
            tasks: core.into_records(),
            validation: report,
            aborted: flags.aborted,
            cancelled: flags.cancelled,
            stack: flags.stack,
        };

        info!(
            run_id = %run_id,
            success = result.is_success(),
            completed = result.completed,
            failed = result.failed,
            skipped = result.skipped,
            stopped = result.stopped,
            duration_ms = result.duration_ms,
            "run finished"
        );
        self.events.emit(ProgressEvent::RunCompleted {
            run_id,
            success: result.is_success(),
            aborted: result.aborted,
            cancelled: result.cancelled,
        });

        Ok(result)
    }

    async fn drive(
        &self,
        run_id: RunId,
        core: &mut RunCore,
        report: &ValidationReport,
        options: &ExecutionOptions,
        strategy: ExecutionStrategy,
        cancel: CancelSignal,
    ) -> Result<RunFlags> {
        let mut flags = RunFlags::default();

        if !report.valid {
            let changes = core.fail_all(&report.errors.join("; "));
            self.emit_changes(run_id, changes);
            return Ok(flags);
        }

        let workspace_root = options
            .workspace
            .root
            .clone()
            .unwrap_or_else(|| default_root(&run_id.to_string()));

        let (base_commit, workspaces) = if options.mode == ExecutionMode::Execute {
            let base = self
                .vcs
                .resolve_ref(&options.working_dir, &options.base_ref)
                .await?;
            debug!(run_id = %run_id, base_ref = %options.base_ref, commit = %base, "resolved base");
            let service = WorkspaceService::new(
                self.vcs.clone(),
                workspace_root.clone(),
                options.workspace.clone(),
            );
            (base, Some(service))
        } else {
            (String::new(), None)
        };

        let ctx = RunContext {
            run_id,
            options,
            strategy,
            base_commit,
            workspace_root,
            workspaces,
            cancel,
        };

        for layer in 0..core.layers().len() {
            if ctx.cancel.is_cancelled() {
                flags.cancelled = true;
                break;
            }

            let start = core.promote_layer(layer)?;
            self.emit_changes(run_id, start.changes);
            self.events.emit(ProgressEvent::LayerStarted {
                run_id,
                layer,
                tasks: core.layers()[layer].clone(),
            });
            debug!(run_id = %run_id, layer, ready = ?start.ready, "layer started");

            let cancelled = self.run_layer(&ctx, core, start.ready).await?;

            let (completed, failed) = core.layers()[layer].iter().fold((0, 0), |(c, f), id| {
                match core.state_of(id) {
                    Some(TaskState::Completed) => (c + 1, f),
                    Some(TaskState::Failed) => (c, f + 1),
                    _ => (c, f),
                }
            });
            self.events.emit(ProgressEvent::LayerFinished {
                run_id,
                layer,
                completed,
                failed,
            });

            if cancelled {
                flags.cancelled = true;
                break;
            }

            // Independent verdicts never abort the run.
            if !options.continue_on_error && !core.tasks_are_independent() {
                if let Some(task) = core.first_failure(layer) {
                    warn!(run_id = %run_id, layer, task, "task failed, aborting run");
                    flags.aborted = true;
                    break;
                }
            }
        }

        if flags.aborted || flags.cancelled {
            let changes = core.skip_remaining();
            self.emit_changes(run_id, changes);
        }

        if options.mode == ExecutionMode::Execute && options.build_stack && !flags.cancelled {
            let stack = self.build_stack(&ctx, core).await;
            self.events.emit(ProgressEvent::StackBuilt {
                run_id,
                branches: stack.branches.len(),
                failed: stack.failed_tasks.len(),
            });
            flags.stack = Some(stack);
        }

        if options.mode == ExecutionMode::Execute {
            // Only succeeds once every workspace in it is gone.
            let _ = tokio::fs::remove_dir(&ctx.workspace_root).await;
        }

        Ok(flags)
    }

    /// Run one layer's ready tasks to completion, honouring the
    /// concurrency limit. Returns whether the run was cancelled.
    async fn run_layer(
        &self,
        ctx: &RunContext<'_>,
        core: &mut RunCore,
        ready: Vec<TaskId>,
    ) -> Result<bool> {
        let limit = if ctx.strategy.is_serial() || ready.len() <= 1 {
            1
        } else {
            ctx.options
                .max_concurrency
                .unwrap_or(ready.len())
                .clamp(1, ready.len())
        };

        let mut queue: VecDeque<TaskId> = VecDeque::with_capacity(ready.len());
        for id in ready {
            let change = core.transition(&id, TaskState::Queued)?;
            self.emit_change(ctx.run_id, change);
            queue.push_back(id);
        }

        let mut jobs: JoinSet<(TaskId, JobResult)> = JoinSet::new();

        loop {
            while jobs.len() < limit && !ctx.cancel.is_cancelled() {
                let Some(id) = queue.pop_front() else { break };
                let change = core.transition(&id, TaskState::Running)?;
                self.emit_change(ctx.run_id, change);
                let job = self.job_for(ctx, core, &id)?;
                spawn_attempt(&mut jobs, id, job);
            }

            let Some(joined) = jobs.join_next().await else {
                break;
            };
            let (id, result) =
                joined.map_err(|err| DagstackError::Other(anyhow!("job wrapper failed: {err}")))?;

            match result {
                JobResult::Attempt(report) => {
                    let (decision, change) = core.apply_attempt(&id, report)?;
                    self.emit_change(ctx.run_id, change);

                    match decision {
                        Decision::Retry { attempt, delay } => {
                            let error = core
                                .record(&id)
                                .and_then(|r| r.error.clone())
                                .unwrap_or_default();
                            warn!(
                                run_id = %ctx.run_id,
                                task = %id,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                error = %error,
                                "task failed, retrying"
                            );
                            self.events.emit(ProgressEvent::TaskRetrying {
                                run_id: ctx.run_id,
                                task_id: id.clone(),
                                attempt,
                                delay_ms: delay.as_millis() as u64,
                                error,
                            });
                            spawn_retry_wait(&mut jobs, id, delay, ctx.cancel.clone());
                        }
                        Decision::Failed => {
                            let error = core.record(&id).and_then(|r| r.error.as_deref());
                            error!(run_id = %ctx.run_id, task = %id, error = ?error, "task failed");
                        }
                        Decision::Completed => {
                            info!(run_id = %ctx.run_id, task = %id, "task completed");
                        }
                        Decision::Stopped => {
                            info!(run_id = %ctx.run_id, task = %id, "task stopped");
                        }
                    }
                }
                JobResult::RetryDue if !ctx.cancel.is_cancelled() => {
                    let change = core.transition(&id, TaskState::Queued)?;
                    self.emit_change(ctx.run_id, change);
                    queue.push_front(id);
                }
                JobResult::RetryDue | JobResult::RetryCancelled => {
                    debug!(run_id = %ctx.run_id, task = %id, "retry abandoned, run cancelled");
                }
            }
        }

        Ok(ctx.cancel.is_cancelled())
    }

    fn job_for(&self, ctx: &RunContext<'_>, core: &RunCore, id: &str) -> Result<TaskJob> {
        let task = core
            .plan()
            .task(id)
            .cloned()
            .ok_or_else(|| DagstackError::TaskNotFound(id.to_string()))?;
        let attempt = core.record(id).map_or(1, |r| r.retry_count + 1);

        Ok(TaskJob {
            run_id: ctx.run_id,
            base_commit: core.base_commit_for(&task, &ctx.base_commit),
            final_attempt: core.is_final_attempt(id),
            task,
            mode: ctx.options.mode,
            attempt,
            repo: ctx.options.working_dir.clone(),
            timeout: ctx.options.task_timeout,
            agent: self.agent.clone(),
            messages: self.messages.clone(),
            workspaces: ctx.workspaces.clone(),
            cancel: ctx.cancel.clone(),
        })
    }

    async fn build_stack(&self, ctx: &RunContext<'_>, core: &RunCore) -> StackResult {
        let completed = core.completed_tasks();
        let options = &ctx.options.stack;
        let parent = options
            .parent_ref
            .clone()
            .unwrap_or_else(|| ctx.base_commit.clone());

        let mut stack_options = options.clone();
        if stack_options.worktree.is_none() {
            stack_options.worktree = Some(ctx.workspace_root.join("stack"));
        }

        let builder = StackBuilder::new(self.vcs.clone(), stack_options);
        match builder
            .build(
                &completed,
                &ctx.options.working_dir,
                &parent,
                options.conflict_strategy,
            )
            .await
        {
            Ok(stack) => {
                self.release_work_branches(ctx, core, &stack).await;
                stack
            }
            Err(err) => {
                error!(run_id = %ctx.run_id, error = %err, "stack build failed");
                StackResult {
                    base: parent,
                    failed_tasks: completed
                        .into_iter()
                        .map(|t| StackFailure {
                            task_id: t.id,
                            reason: err.to_string(),
                            conflicts: Vec::new(),
                        })
                        .collect(),
                    ..StackResult::default()
                }
            }
        }
    }

    /// Delete work branches of disposed workspaces whose result is now
    /// carried by the stack.
    async fn release_work_branches(&self, ctx: &RunContext<'_>, core: &RunCore, stack: &StackResult) {
        let Some(workspaces) = ctx.workspaces.as_ref() else {
            return;
        };
        for record in core.records() {
            let Some(handle) = record.workspace.as_ref() else {
                continue;
            };
            let carried = stack.branch_for(&record.task_id).is_some()
                || stack.unchanged.contains(&record.task_id);
            if record.workspace_retained || !carried {
                continue;
            }
            if let Err(err) = workspaces.delete_branch(handle).await {
                warn!(task = %record.task_id, branch = %handle.branch, error = %err, "failed to delete work branch");
            }
        }
    }

    fn emit_change(&self, run_id: RunId, change: TaskStateChange) {
        debug!(run_id = %run_id, task = %change.task_id, from = %change.from, to = %change.to, "task state changed");
        self.events.emit(ProgressEvent::TaskStateChanged {
            run_id,
            task_id: change.task_id,
            from: change.from,
            to: change.to,
        });
    }

    fn emit_changes(&self, run_id: RunId, changes: Vec<TaskStateChange>) {
        for change in changes {
            self.emit_change(run_id, change);
        }
    }
}

/// Spawn an attempt so that a panic inside it is reported as a failed
/// attempt of the owning task.
fn spawn_attempt(jobs: &mut JoinSet<(TaskId, JobResult)>, id: TaskId, job: TaskJob) {
    jobs.spawn(async move {
        let report = match tokio::spawn(job.run()).await {
            Ok(report) => report,
            Err(err) => {
                error!(task = %id, error = %err, "task attempt panicked");
                AttemptReport::new(AttemptOutcome::failed(format!("task panicked: {err}")), 0)
            }
        };
        (id, JobResult::Attempt(report))
    });
}

fn spawn_retry_wait(
    jobs: &mut JoinSet<(TaskId, JobResult)>,
    id: TaskId,
    delay: Duration,
    mut cancel: CancelSignal,
) {
    jobs.spawn(async move {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => JobResult::RetryCancelled,
            _ = tokio::time::sleep(delay) => JobResult::RetryDue,
        };
        (id, result)
    });
}
