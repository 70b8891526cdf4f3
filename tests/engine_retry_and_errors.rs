mod common;
use crate::common::{PlanBuilder, TaskBuilder, drain, engine, init_tracing, options, with_timeout};

use std::time::Duration;

use dagstack::engine::ProgressEvent;
use dagstack::state::TaskState;
use dagstack::types::ExecutionMode;
use dagstack::vcs::MockVcs;
use dagstack_test_utils::ScriptedAgent;

fn error_of(result: &dagstack::engine::ExecutionResult, id: &str) -> String {
    result
        .record(id)
        .and_then(|r| r.error.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn flaky_task_succeeds_within_its_budget() {
    init_tracing();
    let vcs = MockVcs::new();
    let agent = ScriptedAgent::new()
        .with_vcs(vcs.clone())
        .fail_first("A", 2)
        .writes("A", "a.txt", "a\n");
    let engine = engine(&agent, &vcs);
    let mut rx = engine.subscribe();
    let plan = PlanBuilder::new("flaky").task(TaskBuilder::new("A")).build();

    let result = with_timeout(engine.execute(&plan, options(ExecutionMode::Execute)))
        .await
        .unwrap();

    assert!(result.is_success(), "{result:#?}");
    assert_eq!(agent.calls_for("A"), 3);
    let record = result.record("A").unwrap();
    assert_eq!(record.retry_count, 2);
    assert!(record.error.is_none());
    assert!(record.commit.is_some());

    let attempts: Vec<u32> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ProgressEvent::TaskRetrying { attempt, .. } => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![2, 3]);

    // Failed attempts left nothing behind; the stack carries the result.
    assert_eq!(vcs.worktree_count(), 0);
    assert!(vcs.branches().iter().all(|b| !b.starts_with("dagstack/work/")));
    assert_eq!(result.stack.unwrap().branches.len(), 1);
}

#[tokio::test]
async fn exhausted_budget_fails_the_task() {
    init_tracing();
    let agent = ScriptedAgent::new().always_fail("A");
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("broken")
        .task(TaskBuilder::new("A").max_retries(2))
        .build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Plan)))
        .await
        .unwrap();

    assert!(!result.is_success());
    assert_eq!(agent.calls_for("A"), 2);
    let record = result.record("A").unwrap();
    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.retry_count, 2);
    assert!(error_of(&result, "A").contains("scripted failure"));
}

#[tokio::test]
async fn zero_retry_attempts_disables_retries() {
    init_tracing();
    let agent = ScriptedAgent::new().fail_first("A", 1);
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("once").task(TaskBuilder::new("A")).build();

    let mut opts = options(ExecutionMode::Plan);
    opts.retry_attempts = 0;
    let result = with_timeout(engine(&agent, &vcs).execute(&plan, opts))
        .await
        .unwrap();

    assert_eq!(agent.calls_for("A"), 1);
    assert_eq!(result.state_of("A"), Some(TaskState::Failed));
}

#[tokio::test]
async fn failure_aborts_later_layers_by_default() {
    init_tracing();
    let agent = ScriptedAgent::new().always_fail("A");
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("abort")
        .task(TaskBuilder::new("A").max_retries(1))
        .task(TaskBuilder::new("X"))
        .task(TaskBuilder::new("B").after("A"))
        .task(TaskBuilder::new("Y").after("X"))
        .build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Plan)))
        .await
        .unwrap();

    assert!(result.aborted);
    assert_eq!(result.state_of("A"), Some(TaskState::Failed));
    assert_eq!(result.state_of("X"), Some(TaskState::Completed));
    assert_eq!(result.state_of("B"), Some(TaskState::Skipped));
    assert_eq!(result.state_of("Y"), Some(TaskState::Skipped));
    assert_eq!(agent.calls_for("B"), 0);
    assert_eq!(agent.calls_for("Y"), 0);
}

#[tokio::test]
async fn continue_on_error_fails_dependents_and_runs_independent_tasks() {
    init_tracing();
    let agent = ScriptedAgent::new().always_fail("A");
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("continue")
        .task(TaskBuilder::new("A").max_retries(1))
        .task(TaskBuilder::new("X"))
        .task(TaskBuilder::new("B").after("A"))
        .task(TaskBuilder::new("Y").after("X"))
        .task(TaskBuilder::new("C").after("B"))
        .build();

    let mut opts = options(ExecutionMode::Plan);
    opts.continue_on_error = true;
    let result = with_timeout(engine(&agent, &vcs).execute(&plan, opts))
        .await
        .unwrap();

    assert!(!result.aborted);
    assert!(!result.is_success());
    assert_eq!(result.state_of("Y"), Some(TaskState::Completed));
    assert_eq!(result.state_of("B"), Some(TaskState::Failed));
    assert_eq!(result.state_of("C"), Some(TaskState::Failed));
    assert!(error_of(&result, "B").contains("dependency 'A' did not complete"));
    assert!(error_of(&result, "C").contains("dependency 'B' did not complete"));
    assert_eq!(agent.calls_for("B"), 0);
    assert_eq!(result.failed, 3);
    assert_eq!(result.completed, 2);
}

#[tokio::test]
async fn agent_errors_count_as_failed_attempts() {
    init_tracing();
    let agent = ScriptedAgent::new().error_on("A");
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("err")
        .task(TaskBuilder::new("A").max_retries(2))
        .build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Plan)))
        .await
        .unwrap();

    assert_eq!(agent.calls_for("A"), 2);
    assert_eq!(result.state_of("A"), Some(TaskState::Failed));
    assert!(error_of(&result, "A").contains("could not start agent"));
}

#[tokio::test]
async fn slow_agent_times_out() {
    init_tracing();
    let agent = ScriptedAgent::new().hang("A");
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("slow").task(TaskBuilder::new("A")).build();

    let mut opts = options(ExecutionMode::Plan);
    opts.retry_attempts = 0;
    opts.task_timeout = Some(Duration::from_millis(50));
    let result = with_timeout(engine(&agent, &vcs).execute(&plan, opts))
        .await
        .unwrap();

    assert_eq!(result.state_of("A"), Some(TaskState::Failed));
    assert!(error_of(&result, "A").contains("timed out"));
}

#[tokio::test]
async fn workspace_creation_failure_fails_the_attempt() {
    init_tracing();
    let vcs = MockVcs::new();
    vcs.fail_op("add_worktree", u32::MAX);
    let agent = ScriptedAgent::new().with_vcs(vcs.clone());
    let plan = PlanBuilder::new("no-space")
        .task(TaskBuilder::new("A").max_retries(1))
        .build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Execute)))
        .await
        .unwrap();

    assert_eq!(result.state_of("A"), Some(TaskState::Failed));
    assert!(error_of(&result, "A").contains("workspace creation failed"));
    assert_eq!(agent.calls_for("A"), 0);
    assert!(!result.is_success());
}

#[tokio::test]
async fn failed_workspace_is_retained_for_inspection() {
    init_tracing();
    let vcs = MockVcs::new();
    let agent = ScriptedAgent::new().with_vcs(vcs.clone()).always_fail("A");
    let plan = PlanBuilder::new("keep")
        .task(TaskBuilder::new("A").max_retries(1))
        .build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Execute)))
        .await
        .unwrap();

    let record = result.record("A").unwrap();
    assert!(record.workspace_retained);
    let handle = record.workspace.as_ref().unwrap();
    assert!(vcs.worktree_exists(&handle.path));
    assert_eq!(handle.branch, "dagstack/work/A");

    let stack = result.stack.unwrap();
    assert!(stack.branches.is_empty());
}
