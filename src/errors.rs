// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

use crate::state::TaskState;

#[derive(Error, Debug)]
pub enum DagstackError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid transition for task '{task}': {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: TaskState,
        to: TaskState,
    },

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("git {op} failed: {message}")]
    VcsError { op: String, message: String },

    #[error("Agent error: {0}")]
    AgentError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DagstackError {
    pub fn vcs(op: impl Into<String>, message: impl Into<String>) -> Self {
        DagstackError::VcsError {
            op: op.into(),
            message: message.into(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DagstackError>;
