// src/engine/events.rs

//! Progress events broadcast while a run executes.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::plan::TaskId;
use crate::state::TaskState;
use crate::types::{ExecutionMode, ExecutionStrategy};

use super::RunId;

/// Events buffered per subscriber before the slowest one starts lagging.
pub const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        run_id: RunId,
        plan: String,
        mode: ExecutionMode,
        strategy: ExecutionStrategy,
        task_count: usize,
        layer_count: usize,
    },
    LayerStarted {
        run_id: RunId,
        layer: usize,
        tasks: Vec<TaskId>,
    },
    TaskStateChanged {
        run_id: RunId,
        task_id: TaskId,
        from: TaskState,
        to: TaskState,
    },
    TaskRetrying {
        run_id: RunId,
        task_id: TaskId,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    LayerFinished {
        run_id: RunId,
        layer: usize,
        completed: usize,
        failed: usize,
    },
    StackBuilt {
        run_id: RunId,
        branches: usize,
        failed: usize,
    },
    RunCompleted {
        run_id: RunId,
        success: bool,
        aborted: bool,
        cancelled: bool,
    },
}

impl ProgressEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            ProgressEvent::RunStarted { run_id, .. }
            | ProgressEvent::LayerStarted { run_id, .. }
            | ProgressEvent::TaskStateChanged { run_id, .. }
            | ProgressEvent::TaskRetrying { run_id, .. }
            | ProgressEvent::LayerFinished { run_id, .. }
            | ProgressEvent::StackBuilt { run_id, .. }
            | ProgressEvent::RunCompleted { run_id, .. } => *run_id,
        }
    }
}

/// Fan-out of [`ProgressEvent`]s to any number of subscribers.
///
/// Emitting never blocks and never fails; with no subscribers events are
/// dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ProgressEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let run_id = Uuid::new_v4();

        bus.emit(ProgressEvent::LayerStarted {
            run_id,
            layer: 0,
            tasks: vec!["A".into()],
        });

        for rx in [&mut a, &mut b] {
            let ev = rx.recv().await.unwrap();
            assert_eq!(ev.run_id(), run_id);
            assert!(matches!(ev, ProgressEvent::LayerStarted { layer: 0, .. }));
        }
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.emit(ProgressEvent::RunCompleted {
            run_id: Uuid::nil(),
            success: true,
            aborted: false,
            cancelled: false,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn serializes_with_event_tag() {
        let ev = ProgressEvent::StackBuilt {
            run_id: Uuid::nil(),
            branches: 2,
            failed: 0,
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "stack_built");
        assert_eq!(json["branches"], 2);
    }
}
