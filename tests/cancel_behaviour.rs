mod common;
use crate::common::{PlanBuilder, TaskBuilder, engine, init_tracing, options, with_timeout};

use std::time::Duration;

use dagstack::engine::ProgressEvent;
use dagstack::state::TaskState;
use dagstack::types::{ExecutionMode, ExecutionStrategy};
use dagstack::vcs::MockVcs;
use dagstack_test_utils::ScriptedAgent;
use uuid::Uuid;

#[tokio::test]
async fn cancel_stops_running_and_skips_queued_tasks() {
    init_tracing();
    let vcs = MockVcs::new();
    let agent = ScriptedAgent::new().with_vcs(vcs.clone()).hang("A");
    let engine = engine(&agent, &vcs);
    let plan = PlanBuilder::new("serial")
        .strategy(ExecutionStrategy::Serial)
        .task(TaskBuilder::new("A"))
        .task(TaskBuilder::new("B"))
        .task(TaskBuilder::new("C").after("A"))
        .build();

    let run_id = Uuid::new_v4();
    let handle = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .execute_run(run_id, &plan, options(ExecutionMode::Execute))
                .await
        })
    };

    with_timeout(agent.wait_for_call("A")).await;
    assert!(engine.is_running(run_id));
    assert!(engine.cancel(run_id));

    let result = with_timeout(handle).await.unwrap().unwrap();

    assert!(result.cancelled);
    assert!(!result.is_success());
    assert_eq!(result.state_of("A"), Some(TaskState::Stopped));
    assert_eq!(result.state_of("B"), Some(TaskState::Skipped));
    assert_eq!(result.state_of("C"), Some(TaskState::Skipped));
    assert_eq!(result.stopped, 1);
    assert_eq!(result.skipped, 2);
    assert_eq!(
        result.record("A").and_then(|r| r.error.as_deref()),
        Some("run cancelled")
    );
    assert_eq!(agent.calls_for("B"), 0);
    // No stack for a cancelled run.
    assert!(result.stack.is_none());

    assert!(!engine.is_running(run_id));
    assert!(!engine.cancel(run_id));
}

#[tokio::test]
async fn cancel_during_back_off_abandons_the_retry() {
    init_tracing();
    let agent = ScriptedAgent::new().always_fail("A");
    let vcs = MockVcs::new();
    let engine = engine(&agent, &vcs);
    let mut rx = engine.subscribe();
    let plan = PlanBuilder::new("backoff").task(TaskBuilder::new("A")).build();

    let mut opts = options(ExecutionMode::Plan);
    opts.retry_delay = Duration::from_secs(30);

    let run_id = Uuid::new_v4();
    let handle = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute_run(run_id, &plan, opts).await })
    };

    with_timeout(async {
        loop {
            if let Ok(ProgressEvent::TaskRetrying { .. }) = rx.recv().await {
                break;
            }
        }
    })
    .await;
    assert!(engine.cancel(run_id));

    let result = with_timeout(handle).await.unwrap().unwrap();

    assert!(result.cancelled);
    assert_eq!(agent.calls_for("A"), 1);
    assert_eq!(result.state_of("A"), Some(TaskState::Failed));
}

#[tokio::test]
async fn cancelling_an_unknown_run_is_a_no_op() {
    let agent = ScriptedAgent::new();
    let vcs = MockVcs::new();
    let engine = engine(&agent, &vcs);

    assert!(!engine.cancel(Uuid::new_v4()));
}

#[tokio::test]
async fn runs_on_one_engine_are_cancelled_independently() {
    init_tracing();
    let agent = ScriptedAgent::new().hang("A");
    let vcs = MockVcs::new();
    let engine = engine(&agent, &vcs);
    let hanging = PlanBuilder::new("hanging").task(TaskBuilder::new("A")).build();
    let quick = PlanBuilder::new("quick").task(TaskBuilder::new("Q")).build();

    let run_id = Uuid::new_v4();
    let handle = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .execute_run(run_id, &hanging, options(ExecutionMode::Plan))
                .await
        })
    };
    with_timeout(agent.wait_for_call("A")).await;

    let other = with_timeout(engine.execute(&quick, options(ExecutionMode::Plan)))
        .await
        .unwrap();
    assert!(other.is_success());
    assert!(engine.is_running(run_id));

    engine.cancel(run_id);
    let result = with_timeout(handle).await.unwrap().unwrap();
    assert!(result.cancelled);
    assert_eq!(result.state_of("A"), Some(TaskState::Stopped));
}
