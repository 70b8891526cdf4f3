mod common;
use crate::common::{PlanBuilder, TaskBuilder, drain, engine, init_tracing, options, with_timeout};

use std::path::PathBuf;
use std::time::{Duration, Instant};

use dagstack::agent::AgentMode;
use dagstack::engine::{ExecutionOptions, ProgressEvent};
use dagstack::errors::DagstackError;
use dagstack::state::TaskState;
use dagstack::types::{ExecutionMode, ExecutionStrategy};
use dagstack::vcs::MockVcs;
use dagstack_test_utils::ScriptedAgent;

fn diamond() -> PlanBuilder {
    PlanBuilder::new("diamond")
        .task(TaskBuilder::new("A").touches("a.txt"))
        .task(TaskBuilder::new("B").after("A").touches("b.txt"))
        .task(TaskBuilder::new("C").after("A").touches("c.txt"))
        .task(TaskBuilder::new("D").after("B").after("C").touches("d.txt"))
}

#[tokio::test]
async fn dry_run_completes_every_task_without_the_agent() {
    init_tracing();
    let agent = ScriptedAgent::new();
    let vcs = MockVcs::new();
    let plan = diamond().build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::DryRun)))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.completed, 4);
    assert!(agent.invocations().is_empty());
    assert!(result.stack.is_none());
    assert_eq!(
        result.record("A").unwrap().output.as_deref(),
        Some("[dry-run] A: Task A")
    );
    assert_eq!(
        result.validation.layers,
        vec![vec!["A"], vec!["B", "C"], vec!["D"]]
    );
    assert_eq!(vcs.worktree_count(), 0);
}

#[tokio::test]
async fn dry_run_emits_ordered_progress_events() {
    init_tracing();
    let agent = ScriptedAgent::new();
    let vcs = MockVcs::new();
    let engine = engine(&agent, &vcs);
    let mut rx = engine.subscribe();
    let plan = PlanBuilder::new("chain")
        .task(TaskBuilder::new("A"))
        .task(TaskBuilder::new("B").after("A"))
        .build();

    let result = with_timeout(engine.execute(&plan, options(ExecutionMode::DryRun)))
        .await
        .unwrap();
    let events = drain(&mut rx);

    assert!(matches!(events.first(), Some(ProgressEvent::RunStarted { task_count: 2, layer_count: 2, .. })));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::RunCompleted { success: true, aborted: false, cancelled: false, .. })
    ));
    assert!(events.iter().all(|e| e.run_id() == result.run_id));

    let a_states: Vec<(TaskState, TaskState)> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::TaskStateChanged { task_id, from, to, .. } if task_id == "A" => {
                Some((*from, *to))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        a_states,
        vec![
            (TaskState::Pending, TaskState::Ready),
            (TaskState::Ready, TaskState::Queued),
            (TaskState::Queued, TaskState::Running),
            (TaskState::Running, TaskState::Completed),
        ]
    );

    let layers_finished = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::LayerFinished { completed: 1, failed: 0, .. }))
        .count();
    assert_eq!(layers_finished, 2);
}

#[tokio::test]
async fn validate_mode_checks_acceptance_criteria() {
    init_tracing();
    let agent = ScriptedAgent::new();
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("checks")
        .task(TaskBuilder::new("A"))
        .task(TaskBuilder::new("B").no_criteria())
        .task(TaskBuilder::new("C").instructions("   "))
        .build();

    let mut opts = options(ExecutionMode::Validate);
    opts.continue_on_error = true;
    let result = with_timeout(engine(&agent, &vcs).execute(&plan, opts))
        .await
        .unwrap();

    assert!(!result.is_success());
    assert_eq!(result.state_of("A"), Some(TaskState::Completed));
    assert_eq!(result.state_of("B"), Some(TaskState::Failed));
    assert_eq!(result.state_of("C"), Some(TaskState::Failed));
    assert!(
        result
            .record("B")
            .and_then(|r| r.error.as_deref())
            .unwrap()
            .contains("no acceptance criteria")
    );
    assert!(
        result
            .record("C")
            .and_then(|r| r.error.as_deref())
            .unwrap()
            .contains("instructions are empty")
    );
    assert!(agent.invocations().is_empty());
}

#[tokio::test]
async fn validate_mode_judges_each_task_on_its_own() {
    init_tracing();
    let agent = ScriptedAgent::new();
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("chain")
        .task(TaskBuilder::new("A").no_criteria())
        .task(TaskBuilder::new("B").after("A"))
        .task(TaskBuilder::new("C").after("B"))
        .build();

    // Default options: no continue-on-error, full retry back-off.
    let opts = ExecutionOptions {
        mode: ExecutionMode::Validate,
        ..ExecutionOptions::default()
    };
    let started = Instant::now();
    let result = with_timeout(engine(&agent, &vcs).execute(&plan, opts))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!result.aborted);
    assert_eq!(result.state_of("A"), Some(TaskState::Failed));
    assert_eq!(result.record("A").unwrap().retry_count, 1);
    assert_eq!(result.state_of("B"), Some(TaskState::Completed));
    assert_eq!(result.state_of("C"), Some(TaskState::Completed));
    assert_eq!((result.completed, result.failed, result.skipped), (2, 1, 0));
    assert!(agent.invocations().is_empty());
}

#[tokio::test]
async fn validate_mode_reports_invalid_plans_as_failed_tasks() {
    init_tracing();
    let agent = ScriptedAgent::new();
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("cyclic")
        .task(TaskBuilder::new("A").after("B"))
        .task(TaskBuilder::new("B").after("A"))
        .build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Validate)))
        .await
        .unwrap();

    assert!(!result.validation.valid);
    assert!(result.validation.cycle.is_some());
    assert_eq!(result.failed, 2);
    assert!(
        result
            .record("A")
            .and_then(|r| r.error.as_deref())
            .unwrap()
            .contains("dependency cycle")
    );
}

#[tokio::test]
async fn invalid_plan_is_refused_outside_validate_mode() {
    init_tracing();
    let agent = ScriptedAgent::new();
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("conflicting")
        .task(TaskBuilder::new("A").touches("shared.rs"))
        .task(TaskBuilder::new("B").touches("shared.rs"))
        .build();

    let err = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Execute)))
        .await
        .unwrap_err();

    match err {
        DagstackError::InvalidPlan(msg) => assert!(msg.contains("shared.rs")),
        other => panic!("expected InvalidPlan, got {other:?}"),
    }
    assert!(agent.invocations().is_empty());
    assert!(vcs.operations().is_empty());
}

#[tokio::test]
async fn plan_mode_runs_the_agent_in_the_main_checkout() {
    init_tracing();
    let agent = ScriptedAgent::new();
    let vcs = MockVcs::new();
    let plan = diamond().build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Plan)))
        .await
        .unwrap();

    assert!(result.is_success());
    assert!(result.stack.is_none());
    let calls = agent.invocations();
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|c| c.mode == AgentMode::Plan));
    assert!(calls.iter().all(|c| c.working_dir == PathBuf::from(".")));
    assert_eq!(agent.call_order().first().map(String::as_str), Some("A"));
    assert_eq!(agent.call_order().last().map(String::as_str), Some("D"));
    assert!(vcs.operations().is_empty());
}

#[tokio::test]
async fn execute_mode_commits_each_task_and_builds_the_stack() {
    init_tracing();
    let vcs = MockVcs::new();
    let agent = ScriptedAgent::new()
        .with_vcs(vcs.clone())
        .writes("A", "a.txt", "a\n")
        .writes("B", "b.txt", "b\n")
        .writes("C", "c.txt", "c\n")
        .writes("D", "d.txt", "d\n");
    let plan = diamond().build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Execute)))
        .await
        .unwrap();

    assert!(result.is_success(), "{result:#?}");
    assert_eq!(result.completed, 4);

    // B and C start from A's commit.
    let a_commit = result.record("A").unwrap().commit.clone().unwrap();
    let b_commit = result.record("B").unwrap().commit.clone().unwrap();
    assert_eq!(vcs.parent_of(&b_commit).unwrap(), Some(a_commit.clone()));

    let stack = result.stack.as_ref().unwrap();
    assert!(stack.is_success());
    assert_eq!(stack.branches.len(), 4);
    let order: Vec<&str> = stack.branches.iter().map(|b| b.task_id.as_str()).collect();
    assert_eq!(order, vec!["A", "B", "C", "D"]);
    assert_eq!(stack.branch_for("A").unwrap().branch, "dagstack/stack/A");
    assert!(!stack.branch_for("A").unwrap().cherry_picked);
    assert!(!stack.branch_for("B").unwrap().cherry_picked);
    assert!(stack.branch_for("C").unwrap().cherry_picked);

    let files = vcs.files_at(stack.tip()).unwrap();
    for file in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        assert!(files.contains_key(file), "{file} missing from stack tip");
    }

    // Worktrees are gone; work branches were folded into the stack.
    assert_eq!(vcs.worktree_count(), 0);
    assert!(vcs.branches().iter().all(|b| !b.starts_with("dagstack/work/")));
    assert_eq!(
        vcs.message_of("dagstack/stack/A").unwrap().lines().next(),
        Some("A: Task A")
    );
}

#[tokio::test]
async fn tasks_with_lookalike_ids_run_in_their_own_workspaces() {
    init_tracing();
    let vcs = MockVcs::new();
    let agent = ScriptedAgent::new()
        .with_vcs(vcs.clone())
        .writes("a b", "spaced.txt", "1\n")
        .writes("a-b", "dashed.txt", "2\n");
    let plan = PlanBuilder::new("lookalikes")
        .task(TaskBuilder::new("a b"))
        .task(TaskBuilder::new("a-b"))
        .build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Execute)))
        .await
        .unwrap();

    assert!(result.is_success(), "{result:#?}");
    let spaced = result.record("a b").unwrap().workspace.clone().unwrap();
    let dashed = result.record("a-b").unwrap().workspace.clone().unwrap();
    assert_ne!(spaced.path, dashed.path);
    assert_ne!(spaced.branch, dashed.branch);

    let spaced_commit = result.record("a b").unwrap().commit.clone().unwrap();
    let files = vcs.files_at(&spaced_commit).unwrap();
    assert!(files.contains_key("spaced.txt"));
    assert!(!files.contains_key("dashed.txt"));
}

#[tokio::test]
async fn tasks_without_changes_are_reported_unchanged() {
    init_tracing();
    let vcs = MockVcs::new();
    let agent = ScriptedAgent::new()
        .with_vcs(vcs.clone())
        .writes("A", "a.txt", "a\n");
    let plan = PlanBuilder::new("partial")
        .task(TaskBuilder::new("A"))
        .task(TaskBuilder::new("B").after("A"))
        .build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Execute)))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.record("B").unwrap().commit, None);
    let stack = result.stack.unwrap();
    assert_eq!(stack.branches.len(), 1);
    assert_eq!(stack.unchanged, vec!["B"]);
}

#[tokio::test]
async fn build_stack_can_be_disabled() {
    init_tracing();
    let vcs = MockVcs::new();
    let agent = ScriptedAgent::new()
        .with_vcs(vcs.clone())
        .writes("A", "a.txt", "a\n");
    let plan = PlanBuilder::new("single").task(TaskBuilder::new("A")).build();

    let mut opts = options(ExecutionMode::Execute);
    opts.build_stack = false;
    let result = with_timeout(engine(&agent, &vcs).execute(&plan, opts))
        .await
        .unwrap();

    assert!(result.is_success());
    assert!(result.stack.is_none());
    assert!(vcs.branches().contains(&"dagstack/work/A".to_string()));
}

#[tokio::test]
async fn serial_strategy_runs_one_task_at_a_time_in_declaration_order() {
    init_tracing();
    let agent = ScriptedAgent::new()
        .delay("A", std::time::Duration::from_millis(20))
        .delay("B", std::time::Duration::from_millis(20))
        .delay("C", std::time::Duration::from_millis(20));
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("flat")
        .strategy(ExecutionStrategy::Serial)
        .task(TaskBuilder::new("A"))
        .task(TaskBuilder::new("B"))
        .task(TaskBuilder::new("C"))
        .build();

    let result = with_timeout(engine(&agent, &vcs).execute(&plan, options(ExecutionMode::Plan)))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(result.strategy, ExecutionStrategy::Serial);
    assert_eq!(agent.max_concurrent(), 1);
    assert_eq!(agent.call_order(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn parallel_strategy_respects_max_concurrency() {
    init_tracing();
    let mut agent = ScriptedAgent::new();
    for id in ["A", "B", "C", "D"] {
        agent = agent.delay(id, std::time::Duration::from_millis(30));
    }
    let vcs = MockVcs::new();
    let plan = PlanBuilder::new("flat")
        .task(TaskBuilder::new("A"))
        .task(TaskBuilder::new("B"))
        .task(TaskBuilder::new("C"))
        .task(TaskBuilder::new("D"))
        .build();

    let mut opts = options(ExecutionMode::Plan);
    opts.max_concurrency = Some(2);
    let result = with_timeout(engine(&agent, &vcs).execute(&plan, opts))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(agent.invocations().len(), 4);
    assert!(agent.max_concurrent() <= 2);
    assert!(agent.max_concurrent() >= 1);
}
