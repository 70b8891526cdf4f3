// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::ExecutionOptions;
use crate::types::{BranchCollisionPolicy, ConflictStrategy, ExecutionMode, ExecutionStrategy};

/// Configuration as read from a `Dagstack.toml` file, before validation.
///
/// ```toml
/// [execution]
/// mode = "execute"
/// retry_attempts = 2
/// max_concurrency = 4
///
/// [agent]
/// command = "my-agent"
/// args = ["--non-interactive"]
///
/// [workspace]
/// cleanup_on_failure = true
///
/// [stack]
/// conflict_strategy = "auto"
///
/// [git]
/// user_name = "dagstack"
/// user_email = "dagstack@localhost"
/// ```
///
/// Every section and field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub stack: StackSection,
    #[serde(default)]
    pub git: GitSection,
}

/// Validated configuration. Build one with `ConfigFile::try_from(raw)`.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub execution: ExecutionSection,
    pub agent: AgentSection,
    pub workspace: WorkspaceSection,
    pub stack: StackSection,
    pub git: GitSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            execution: raw.execution,
            agent: raw.agent,
            workspace: raw.workspace,
            stack: raw.stack,
            git: raw.git,
        }
    }

    /// Overlay every value set in the file onto `options`.
    pub fn apply_to(&self, options: &mut ExecutionOptions) {
        let e = &self.execution;
        if let Some(mode) = e.mode {
            options.mode = mode;
        }
        if e.strategy.is_some() {
            options.strategy = e.strategy;
        }
        if let Some(ref base_ref) = e.base_ref {
            options.base_ref = base_ref.clone();
        }
        if let Some(build_stack) = e.build_stack {
            options.build_stack = build_stack;
        }
        if let Some(continue_on_error) = e.continue_on_error {
            options.continue_on_error = continue_on_error;
        }
        if let Some(secs) = e.timeout_secs {
            options.task_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(attempts) = e.retry_attempts {
            options.retry_attempts = attempts;
        }
        if let Some(ms) = e.retry_delay_ms {
            options.retry_delay = Duration::from_millis(ms);
        }
        if let Some(backoff) = e.retry_backoff {
            options.retry_backoff = backoff;
        }
        if e.max_concurrency.is_some() {
            options.max_concurrency = e.max_concurrency;
        }

        let w = &self.workspace;
        if w.root.is_some() {
            options.workspace.root = w.root.clone();
        }
        if let Some(ref prefix) = w.branch_prefix {
            options.workspace.branch_prefix = prefix.clone();
        }
        if let Some(on_success) = w.cleanup_on_success {
            options.workspace.cleanup.on_success = on_success;
        }
        if let Some(on_failure) = w.cleanup_on_failure {
            options.workspace.cleanup.on_failure = on_failure;
        }
        if let Some(collision) = w.collision {
            options.workspace.collision = collision;
        }

        let s = &self.stack;
        if let Some(ref prefix) = s.branch_prefix {
            options.stack.branch_prefix = prefix.clone();
        }
        if s.parent_ref.is_some() {
            options.stack.parent_ref = s.parent_ref.clone();
        }
        if let Some(strategy) = s.conflict_strategy {
            options.stack.conflict_strategy = strategy;
        }
        if let Some(collision) = s.collision {
            options.stack.collision = collision;
        }
    }
}

/// `[execution]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionSection {
    #[serde(default)]
    pub mode: Option<ExecutionMode>,

    /// Overrides the plan's own strategy.
    #[serde(default)]
    pub strategy: Option<ExecutionStrategy>,

    #[serde(default)]
    pub base_ref: Option<String>,

    #[serde(default)]
    pub build_stack: Option<bool>,

    #[serde(default)]
    pub continue_on_error: Option<bool>,

    /// Per-task timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// `0` disables task retries.
    #[serde(default)]
    pub retry_attempts: Option<u32>,

    #[serde(default)]
    pub retry_delay_ms: Option<u64>,

    #[serde(default)]
    pub retry_backoff: Option<f64>,

    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// `[agent]` section: the program implementing tasks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentSection {
    /// Program to run; the prompt arrives on its stdin.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for the agent process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Commit message template, e.g. `"feat({id}): {title}"`.
    #[serde(default)]
    pub commit_template: Option<String>,
}

/// `[workspace]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkspaceSection {
    /// Directory holding per-task worktrees. Defaults to a per-run
    /// directory under the system temp dir.
    #[serde(default)]
    pub root: Option<PathBuf>,

    #[serde(default)]
    pub branch_prefix: Option<String>,

    #[serde(default)]
    pub cleanup_on_success: Option<bool>,

    #[serde(default)]
    pub cleanup_on_failure: Option<bool>,

    #[serde(default)]
    pub collision: Option<BranchCollisionPolicy>,
}

/// `[stack]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StackSection {
    #[serde(default)]
    pub branch_prefix: Option<String>,

    /// Where the first stacked branch is rooted. Defaults to the run's
    /// base commit.
    #[serde(default)]
    pub parent_ref: Option<String>,

    #[serde(default)]
    pub conflict_strategy: Option<ConflictStrategy>,

    #[serde(default)]
    pub collision: Option<BranchCollisionPolicy>,
}

/// `[git]` section: identity for the commits a run creates. Set both or
/// neither; unset means the repository's own configuration applies.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GitSection {
    #[serde(default)]
    pub user_name: Option<String>,

    #[serde(default)]
    pub user_email: Option<String>,
}

impl GitSection {
    pub fn identity(&self) -> Option<(&str, &str)> {
        Some((self.user_name.as_deref()?, self.user_email.as_deref()?))
    }
}
