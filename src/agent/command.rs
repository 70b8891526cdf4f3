// src/agent/command.rs

//! Agent backend that runs a configured program as a subprocess.

use std::collections::{BTreeMap, VecDeque};
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::Result;
use crate::vcs::BoxFuture;

use super::{AgentBackend, AgentRequest, AgentResponse, AgentStatus, prompt};

/// Lines of stderr kept as the error text of a failed run.
const STDERR_TAIL_LINES: usize = 20;

/// Runs `program args...` in the request's working directory with the
/// rendered prompt on stdin. Stdout becomes the output.
///
/// The child is killed when the invocation future is dropped, which is how
/// timeouts and cancellation stop it.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandAgent {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    async fn run(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let started = Instant::now();
        let prompt = prompt::render(request);

        info!(
            task = %request.task_id,
            mode = %request.mode,
            program = %self.program,
            cwd = %request.working_dir.display(),
            "starting agent process"
        );

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(&self.env)
            .env("DAGSTACK_TASK_ID", &request.task_id)
            .env("DAGSTACK_MODE", request.mode.as_str())
            .current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!("spawning agent '{}' for task '{}'", self.program, request.task_id)
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let task_id = request.task_id.clone();
            tokio::spawn(async move {
                if let Err(err) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(task = %task_id, error = %err, "agent did not read the whole prompt");
                }
            });
        }

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("agent stdout was not captured"))?;
        let stdout_task = tokio::spawn(async move {
            let mut buf = String::new();
            stdout.read_to_string(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        });

        // Always consume stderr so buffers don't fill; log at debug.
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("agent stderr was not captured"))?;
        let task_id = request.task_id.clone();
        let stderr_task = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(task = %task_id, "agent stderr: {}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for agent of task '{}'", request.task_id))?;

        let output = stdout_task
            .await
            .context("joining agent stdout reader")?
            .context("reading agent stdout")?;
        let stderr_tail = stderr_task.await.context("joining agent stderr reader")?;

        let exit_code = status.code();
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            task = %request.task_id,
            exit_code = exit_code.unwrap_or(-1),
            success = status.success(),
            duration_ms,
            "agent process exited"
        );

        let (status, error) = if status.success() {
            (AgentStatus::Completed, None)
        } else if stderr_tail.trim().is_empty() {
            (
                AgentStatus::Failed,
                Some(format!("agent exited with {status}")),
            )
        } else {
            (AgentStatus::Failed, Some(stderr_tail))
        };

        Ok(AgentResponse {
            status,
            output,
            error,
            exit_code,
            duration_ms,
        })
    }
}

impl AgentBackend for CommandAgent {
    fn invoke<'a>(&'a self, request: &'a AgentRequest) -> BoxFuture<'a, AgentResponse> {
        Box::pin(self.run(request))
    }
}
