// src/agent/mod.rs

//! Coding-agent collaborator abstraction.
//!
//! The engine talks to an [`AgentBackend`] instead of spawning processes
//! itself. Production code uses [`CommandAgent`], which runs a configured
//! program with the rendered prompt on stdin; tests provide scripted
//! backends that edit the in-memory repository directly.

use std::fmt::{self, Debug};
use std::path::PathBuf;

use serde::Serialize;

use crate::plan::{Task, TaskId};
use crate::vcs::BoxFuture;

pub mod command;
pub mod prompt;

pub use command::CommandAgent;
pub use prompt::{CommitMessageGenerator, TemplateCommitMessages};

/// What the agent is asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Describe an approach without changing files.
    Plan,
    /// Make the changes in the working directory.
    Execute,
}

impl AgentMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentMode::Plan => "plan",
            AgentMode::Execute => "execute",
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest {
    pub task_id: TaskId,
    pub title: String,
    pub instructions: String,
    /// Files the task may touch or create.
    pub files: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    pub working_dir: PathBuf,
    pub mode: AgentMode,
}

impl AgentRequest {
    pub fn for_task(task: &Task, working_dir: PathBuf, mode: AgentMode) -> Self {
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            instructions: task.instructions.clone(),
            files: task.claimed_files().into_iter().map(str::to_string).collect(),
            acceptance_criteria: task.acceptance_criteria.clone(),
            working_dir,
            mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub status: AgentStatus,
    pub output: String,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl AgentResponse {
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Completed,
            output: output.into(),
            error: None,
            exit_code: Some(0),
            duration_ms: 0,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Failed,
            output: String::new(),
            error: Some(error.into()),
            exit_code: None,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == AgentStatus::Completed
    }
}

/// Something that can carry out a task given a prompt and a directory.
///
/// An `Err` means the agent could not be run at all; a run that happened
/// and failed is an `Ok` response with [`AgentStatus::Failed`]. Both count
/// as a failed attempt.
///
/// Dropping the returned future must stop the agent.
pub trait AgentBackend: Send + Sync + Debug {
    fn invoke<'a>(&'a self, request: &'a AgentRequest) -> BoxFuture<'a, AgentResponse>;
}
