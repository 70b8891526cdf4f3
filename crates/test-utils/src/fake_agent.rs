use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dagstack::agent::{AgentBackend, AgentMode, AgentRequest, AgentResponse};
use dagstack::errors::DagstackError;
use dagstack::vcs::{BoxFuture, MockVcs};

/// One call the engine made to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub task_id: String,
    pub mode: AgentMode,
    pub working_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
struct Behaviour {
    writes: Vec<(String, String)>,
    fail_first: u32,
    always_fail: bool,
    error: bool,
    delay: Option<Duration>,
    hang: bool,
}

#[derive(Debug, Default)]
struct Script {
    behaviours: HashMap<String, Behaviour>,
    invocations: Vec<Invocation>,
    active: usize,
    max_active: usize,
}

/// A fake agent that:
/// - records every invocation
/// - in `execute` mode, writes its scripted files into the task's worktree
///   of the attached `MockVcs`
/// - fails, errors, sleeps or hangs per task when told to.
///
/// Unscripted tasks succeed immediately without changing anything.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAgent {
    script: Arc<Mutex<Script>>,
    vcs: Option<MockVcs>,
}

/// Decrements the active count even when the invocation is dropped.
struct ActiveGuard(Arc<Mutex<Script>>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut script) = self.0.lock() {
            script.active -= 1;
        }
    }
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write files into worktrees of this repository.
    pub fn with_vcs(mut self, vcs: MockVcs) -> Self {
        self.vcs = Some(vcs);
        self
    }

    fn behaviour(&self, task: &str, f: impl FnOnce(&mut Behaviour)) {
        let mut script = self.script.lock().unwrap();
        f(script.behaviours.entry(task.to_string()).or_default());
    }

    /// In `execute` mode, write `contents` to `path` in the task's worktree.
    pub fn writes(self, task: &str, path: &str, contents: &str) -> Self {
        self.behaviour(task, |b| b.writes.push((path.to_string(), contents.to_string())));
        self
    }

    /// Report failure for the first `n` invocations of `task`.
    pub fn fail_first(self, task: &str, n: u32) -> Self {
        self.behaviour(task, |b| b.fail_first = n);
        self
    }

    pub fn always_fail(self, task: &str) -> Self {
        self.behaviour(task, |b| b.always_fail = true);
        self
    }

    /// Return `Err` (agent could not be run) for `task`.
    pub fn error_on(self, task: &str) -> Self {
        self.behaviour(task, |b| b.error = true);
        self
    }

    pub fn delay(self, task: &str, delay: Duration) -> Self {
        self.behaviour(task, |b| b.delay = Some(delay));
        self
    }

    /// Never finish `task`; only dropping the call ends it.
    pub fn hang(self, task: &str) -> Self {
        self.behaviour(task, |b| b.hang = true);
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.script.lock().unwrap().invocations.clone()
    }

    pub fn calls_for(&self, task: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .invocations
            .iter()
            .filter(|i| i.task_id == task)
            .count()
    }

    /// Task ids in invocation order.
    pub fn call_order(&self) -> Vec<String> {
        self.invocations().into_iter().map(|i| i.task_id).collect()
    }

    /// Highest number of invocations in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.script.lock().unwrap().max_active
    }

    /// Wait until `task` has been invoked at least once.
    pub async fn wait_for_call(&self, task: &str) {
        while self.calls_for(task) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl AgentBackend for ScriptedAgent {
    fn invoke<'a>(&'a self, request: &'a AgentRequest) -> BoxFuture<'a, AgentResponse> {
        Box::pin(async move {
            let (behaviour, call) = {
                let mut script = self.script.lock().unwrap();
                script.invocations.push(Invocation {
                    task_id: request.task_id.clone(),
                    mode: request.mode,
                    working_dir: request.working_dir.clone(),
                });
                script.active += 1;
                script.max_active = script.max_active.max(script.active);
                let call = script
                    .invocations
                    .iter()
                    .filter(|i| i.task_id == request.task_id)
                    .count() as u32;
                let behaviour = script
                    .behaviours
                    .get(&request.task_id)
                    .cloned()
                    .unwrap_or_default();
                (behaviour, call)
            };
            let _active = ActiveGuard(self.script.clone());

            if let Some(delay) = behaviour.delay {
                tokio::time::sleep(delay).await;
            }
            if behaviour.hang {
                std::future::pending::<()>().await;
            }
            if behaviour.error {
                return Err(DagstackError::AgentError(format!(
                    "could not start agent for {}",
                    request.task_id
                )));
            }
            if behaviour.always_fail || call <= behaviour.fail_first {
                return Ok(AgentResponse::failed(format!(
                    "scripted failure of {} (call {call})",
                    request.task_id
                )));
            }

            if request.mode == AgentMode::Execute {
                if let Some(ref vcs) = self.vcs {
                    for (path, contents) in &behaviour.writes {
                        vcs.write_file(&request.working_dir, path, contents)?;
                    }
                }
            }

            Ok(AgentResponse::completed(format!("{} done", request.task_id)))
        })
    }
}
