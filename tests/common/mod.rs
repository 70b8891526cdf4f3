#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use dagstack::engine::{ExecutionEngine, ExecutionOptions, ProgressEvent};
use dagstack::types::ExecutionMode;
use dagstack::vcs::MockVcs;
use dagstack::workspace::WorkspaceOptions;
use dagstack_test_utils::ScriptedAgent;

pub use dagstack_test_utils::{PlanBuilder, TaskBuilder, init_tracing, with_timeout};

/// Engine over a scripted agent and an in-memory repository.
pub fn engine(agent: &ScriptedAgent, vcs: &MockVcs) -> ExecutionEngine {
    ExecutionEngine::new(Arc::new(agent.clone()), Arc::new(vcs.clone()))
}

/// Options for `mode` with millisecond back-off and a fixed workspace root.
pub fn options(mode: ExecutionMode) -> ExecutionOptions {
    ExecutionOptions {
        mode,
        retry_delay: Duration::from_millis(1),
        workspace: WorkspaceOptions {
            root: Some(PathBuf::from("/work")),
            ..WorkspaceOptions::default()
        },
        ..ExecutionOptions::default()
    }
}

/// Events received so far, without waiting.
pub fn drain(rx: &mut broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
