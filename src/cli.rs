// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::engine::ExecutionOptions;
use crate::types::{ConflictStrategy, ExecutionMode, ExecutionStrategy};

/// Command-line arguments for `dagstack`.
///
/// Flags override values from the config file.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dagstack",
    version,
    about = "Run a DAG of agent tasks in isolated worktrees and stack the results as branches.",
    long_about = None
)]
pub struct CliArgs {
    /// Plan document (JSON, or TOML when the extension is `.toml`).
    #[arg(long, value_name = "PATH")]
    pub plan: PathBuf,

    /// Config file. Default: `Dagstack.toml` in the working directory, if
    /// present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// plan, dry-run, execute or validate.
    #[arg(long, value_name = "MODE")]
    pub mode: Option<ExecutionMode>,

    /// serial, parallel or phased. Overrides the plan's strategy.
    #[arg(long, value_name = "STRATEGY")]
    pub strategy: Option<ExecutionStrategy>,

    /// Repository to work in.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub workdir: PathBuf,

    /// Reference task workspaces start from.
    #[arg(long, value_name = "REF")]
    pub base_ref: Option<String>,

    /// Agent program. Overrides `[agent].command`.
    #[arg(long, value_name = "PROGRAM")]
    pub agent: Option<String>,

    /// Skip building the branch stack after execution.
    #[arg(long)]
    pub no_stack: bool,

    /// Keep running independent tasks after a failure.
    #[arg(long)]
    pub continue_on_error: bool,

    /// `0` disables task retries.
    #[arg(long, value_name = "N")]
    pub retry_attempts: Option<u32>,

    #[arg(long, value_name = "MS")]
    pub retry_delay_ms: Option<u64>,

    /// Per-task timeout.
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    #[arg(long, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// auto, manual or fail.
    #[arg(long, value_name = "STRATEGY")]
    pub conflict_strategy: Option<ConflictStrategy>,

    /// Write the full execution result as JSON to this path.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DAGSTACK_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl CliArgs {
    /// Overlay every flag that was given onto `options`.
    pub fn apply_to(&self, options: &mut ExecutionOptions) {
        options.working_dir = self.workdir.clone();
        if let Some(mode) = self.mode {
            options.mode = mode;
        }
        if self.strategy.is_some() {
            options.strategy = self.strategy;
        }
        if let Some(ref base_ref) = self.base_ref {
            options.base_ref = base_ref.clone();
        }
        if self.no_stack {
            options.build_stack = false;
        }
        if self.continue_on_error {
            options.continue_on_error = true;
        }
        if let Some(attempts) = self.retry_attempts {
            options.retry_attempts = attempts;
        }
        if let Some(ms) = self.retry_delay_ms {
            options.retry_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = self.timeout_secs {
            options.task_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(n) = self.max_concurrency {
            options.max_concurrency = Some(n.max(1));
        }
        if let Some(strategy) = self.conflict_strategy {
            options.stack.conflict_strategy = strategy;
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
