// src/lib.rs

pub mod agent;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod plan;
pub mod stack;
pub mod state;
pub mod types;
pub mod vcs;
pub mod workspace;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::{AgentBackend, CommandAgent, TemplateCommitMessages};
use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_or_default};
use crate::engine::{ExecutionEngine, ExecutionOptions, ExecutionResult, ProgressEvent};
use crate::plan::load_plan;
use crate::types::ExecutionMode;
use crate::vcs::GitBackend;

/// High-level entry point used by `main.rs`.
///
/// Loads the plan and config, runs the engine with the `git` and command
/// agent backends, prints a summary and optionally writes a JSON report.
/// Returns whether the run succeeded.
pub async fn run(args: CliArgs) -> Result<bool> {
    let plan = load_plan(&args.plan)
        .with_context(|| format!("failed to load plan {}", args.plan.display()))?;
    let config = load_or_default(args.config.as_deref(), &args.workdir)
        .context("failed to load config")?;

    let mut options = ExecutionOptions::default();
    config.apply_to(&mut options);
    args.apply_to(&mut options);

    let agent = build_agent(&args, &config, options.mode)?;
    let messages = match config.agent.commit_template {
        Some(ref template) => TemplateCommitMessages::new(template.clone()),
        None => TemplateCommitMessages::default(),
    };
    let git = match config.git.identity() {
        Some((name, email)) => GitBackend::new().with_identity(name, email),
        None => GitBackend::new(),
    };
    let engine = ExecutionEngine::new(agent, Arc::new(git))
        .with_commit_messages(Arc::new(messages));

    let run_id = Uuid::new_v4();
    tokio::spawn(log_events(engine.subscribe()));

    // Ctrl-C → cancel the run; tasks in flight are stopped, queued ones skipped.
    {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            warn!(run_id = %run_id, "interrupt received, cancelling run");
            engine.cancel(run_id);
        });
    }

    let result = engine
        .execute_run(run_id, &plan, options)
        .await
        .with_context(|| format!("run of plan '{}' failed", plan.name))?;

    print_summary(&result);

    if let Some(ref path) = args.report {
        write_report(&result, path)?;
        info!(path = %path.display(), "wrote execution report");
    }

    Ok(result.is_success())
}

fn build_agent(
    args: &CliArgs,
    config: &ConfigFile,
    mode: ExecutionMode,
) -> Result<Arc<dyn AgentBackend>> {
    let command = args.agent.clone().or_else(|| config.agent.command.clone());
    let program = match (command, mode) {
        (Some(program), _) => program,
        (None, ExecutionMode::Plan | ExecutionMode::Execute) => {
            bail!("mode '{mode}' needs an agent: set [agent].command or pass --agent")
        }
        // dry-run and validate never invoke the agent.
        (None, _) => "true".to_string(),
    };
    debug!(program = %program, "configured agent");

    Ok(Arc::new(
        CommandAgent::new(program)
            .with_args(config.agent.args.iter().cloned())
            .with_env(config.agent.env.clone()),
    ))
}

/// Log progress events until the engine goes away.
async fn log_events(mut rx: broadcast::Receiver<ProgressEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => log_event(&event),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "progress logger fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn log_event(event: &ProgressEvent) {
    match event {
        ProgressEvent::RunStarted {
            plan,
            mode,
            strategy,
            task_count,
            layer_count,
            ..
        } => info!(%plan, %mode, %strategy, tasks = task_count, layers = layer_count, "run started"),
        ProgressEvent::LayerStarted { layer, tasks, .. } => {
            info!(layer, ?tasks, "layer started")
        }
        ProgressEvent::TaskStateChanged { task_id, from, to, .. } => {
            info!(task = %task_id, %from, %to, "task state")
        }
        ProgressEvent::TaskRetrying {
            task_id,
            attempt,
            delay_ms,
            error,
            ..
        } => warn!(task = %task_id, attempt, delay_ms, %error, "retrying task"),
        ProgressEvent::LayerFinished {
            layer,
            completed,
            failed,
            ..
        } => info!(layer, completed, failed, "layer finished"),
        ProgressEvent::StackBuilt { branches, failed, .. } => {
            info!(branches, failed, "stack built")
        }
        ProgressEvent::RunCompleted {
            success,
            aborted,
            cancelled,
            ..
        } => info!(success, aborted, cancelled, "run completed"),
    }
}

fn print_summary(result: &ExecutionResult) {
    println!("dagstack run {} ({})", result.run_id, result.plan);
    println!("  mode = {}, strategy = {}", result.mode, result.strategy);
    println!(
        "  {} tasks: {} completed, {} failed, {} skipped, {} stopped ({} ms)",
        result.total,
        result.completed,
        result.failed,
        result.skipped,
        result.stopped,
        result.duration_ms
    );
    if result.aborted {
        println!("  run aborted after a failure");
    }
    if result.cancelled {
        println!("  run cancelled");
    }

    if !result.validation.valid {
        println!();
        println!("validation errors:");
        for error in &result.validation.errors {
            println!("  - {error}");
        }
    }

    println!();
    println!("tasks:");
    for record in &result.tasks {
        println!("  - {} [{}]", record.task_id, record.state);
        if let Some(ref commit) = record.commit {
            println!("      commit: {commit}");
        }
        if let Some(ref error) = record.error {
            println!("      error: {error}");
        }
        if record.workspace_retained {
            if let Some(ref ws) = record.workspace {
                println!("      workspace kept at {}", ws.path.display());
            }
        }
    }

    if let Some(ref stack) = result.stack {
        println!();
        println!("stack (base {}):", stack.base);
        for branch in &stack.branches {
            println!("  - {} -> {} ({})", branch.task_id, branch.branch, branch.commit);
        }
        for id in &stack.unchanged {
            println!("  - {id}: no changes");
        }
        for failure in &stack.failed_tasks {
            println!("  - {} FAILED: {}", failure.task_id, failure.reason);
            for file in &failure.conflicts {
                println!("      conflict: {file}");
            }
        }
    }
}

fn write_report(result: &ExecutionResult, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("failed to serialize report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(())
}
