// src/engine/cancel.rs

//! Per-run cancellation signals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use super::RunId;

/// Active runs and the sender that cancels each.
#[derive(Debug, Clone, Default)]
pub struct CancelRegistry {
    runs: Arc<Mutex<HashMap<RunId, watch::Sender<bool>>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RunId, watch::Sender<bool>>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a run and get the signal its jobs listen on.
    pub fn register(&self, run_id: RunId) -> CancelSignal {
        let (tx, rx) = watch::channel(false);
        self.lock().insert(run_id, tx);
        CancelSignal { rx }
    }

    /// Signal cancellation. Returns false if the run is not active.
    pub fn cancel(&self, run_id: RunId) -> bool {
        match self.lock().get(&run_id) {
            Some(tx) => {
                debug!(%run_id, "cancellation requested");
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub fn unregister(&self, run_id: RunId) {
        self.lock().remove(&run_id);
    }

    pub fn is_active(&self, run_id: RunId) -> bool {
        self.lock().contains_key(&run_id)
    }
}

/// Receiving side of a run's cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the run is cancelled; pending forever otherwise.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
