// src/stack/mod.rs

//! Serializes completed task commits into a linear chain of branches.
//!
//! Tasks are stacked in dependency order, each branch on top of the
//! previous tip. When a task commit already descends from the tip the branch
//! is created in place; otherwise the commit is cherry-picked in a dedicated
//! stacking worktree and conflicts go through a [`ConflictResolver`]. A task
//! that cannot be stacked is recorded and skipped; the rest continue.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dag::DagGraph;
use crate::errors::{DagstackError, Result};
use crate::plan::TaskId;
use crate::types::{BranchCollisionPolicy, ConflictStrategy};
use crate::vcs::{CherryPickOutcome, VcsBackend};
use crate::workspace::{claim_branch, sanitize_ref_component};

pub mod conflict;

pub use conflict::{ConflictResolver, Resolution, StrategyResolver};

pub const DEFAULT_STACK_BRANCH_PREFIX: &str = "dagstack/stack/";

#[derive(Debug, Clone)]
pub struct StackOptions {
    pub branch_prefix: String,
    /// Reference the first branch is built on; the run's base ref when unset.
    pub parent_ref: Option<String>,
    pub conflict_strategy: ConflictStrategy,
    pub collision: BranchCollisionPolicy,
    /// Location of the stacking worktree; a fresh temp directory when unset.
    pub worktree: Option<PathBuf>,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            branch_prefix: DEFAULT_STACK_BRANCH_PREFIX.to_string(),
            parent_ref: None,
            conflict_strategy: ConflictStrategy::default(),
            collision: BranchCollisionPolicy::default(),
            worktree: None,
        }
    }
}

/// A task that finished successfully, as seen by the stack builder.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTask {
    pub id: TaskId,
    pub title: String,
    pub dependencies: Vec<TaskId>,
    /// `None` when the task made no changes.
    pub commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackBranch {
    pub task_id: TaskId,
    pub branch: String,
    pub commit: String,
    /// Built by replaying the task commit rather than pointing at it.
    pub cherry_picked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFailure {
    pub task_id: TaskId,
    pub reason: String,
    pub conflicts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackResult {
    /// Commit the first branch is built on.
    pub base: String,
    pub branches: Vec<StackBranch>,
    /// Tip commit of each branch, in stack order.
    pub commits: Vec<String>,
    pub failed_tasks: Vec<StackFailure>,
    /// Completed tasks without changes; stacked without a branch.
    pub unchanged: Vec<TaskId>,
}

impl StackResult {
    pub fn is_success(&self) -> bool {
        self.failed_tasks.is_empty()
    }

    /// Commit at the top of the stack.
    pub fn tip(&self) -> &str {
        self.commits.last().map(String::as_str).unwrap_or(&self.base)
    }

    pub fn branch_for(&self, task_id: &str) -> Option<&StackBranch> {
        self.branches.iter().find(|b| b.task_id == task_id)
    }
}

#[derive(Debug)]
pub struct StackBuilder {
    vcs: Arc<dyn VcsBackend>,
    options: StackOptions,
    resolver: Box<dyn ConflictResolver>,
}

/// Stacking worktree, created on first use.
struct StackingTree {
    path: PathBuf,
    created: bool,
}

impl StackBuilder {
    pub fn new(vcs: Arc<dyn VcsBackend>, options: StackOptions) -> Self {
        Self {
            vcs,
            options,
            resolver: Box::new(StrategyResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Box<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn options(&self) -> &StackOptions {
        &self.options
    }

    pub fn branch_name_for(&self, task_id: &str) -> String {
        format!("{}{}", self.options.branch_prefix, sanitize_ref_component(task_id))
    }

    /// Build the stack on top of `parent_ref`.
    ///
    /// Only errors resolving `parent_ref` or ordering the tasks abort the
    /// build; per-task problems end up in [`StackResult::failed_tasks`].
    pub async fn build(
        &self,
        completed: &[CompletedTask],
        base_path: &Path,
        parent_ref: &str,
        strategy: ConflictStrategy,
    ) -> Result<StackResult> {
        let base = self.vcs.resolve_ref(base_path, parent_ref).await?;
        let mut result = StackResult {
            base: base.clone(),
            ..StackResult::default()
        };

        let by_id: HashMap<&str, &CompletedTask> =
            completed.iter().map(|t| (t.id.as_str(), t)).collect();
        let graph = DagGraph::from_edges(
            completed
                .iter()
                .map(|t| (t.id.as_str(), t.dependencies.iter().map(String::as_str))),
        );
        let order = graph.topological_order().ok_or_else(|| {
            DagstackError::InvalidPlan("completed tasks contain a dependency cycle".to_string())
        })?;

        info!(tasks = order.len(), base = %base, "building stack");

        let mut tree = StackingTree {
            path: self.options.worktree.clone().unwrap_or_else(|| {
                std::env::temp_dir()
                    .join("dagstack")
                    .join(format!("stack-{}", uuid::Uuid::new_v4()))
            }),
            created: false,
        };
        let mut failed: HashSet<&str> = HashSet::new();
        let mut tip = base;

        for id in order {
            let Some(task) = by_id.get(id) else { continue };

            if let Some(reason) = blocked_reason(task, &by_id, &failed) {
                warn!(task = id, %reason, "not stacking task");
                failed.insert(id);
                result.failed_tasks.push(StackFailure {
                    task_id: task.id.clone(),
                    reason,
                    conflicts: Vec::new(),
                });
                continue;
            }

            let Some(commit) = task.commit.as_deref() else {
                debug!(task = id, "task made no changes, nothing to stack");
                result.unchanged.push(task.id.clone());
                continue;
            };

            match self
                .stack_one(task, commit, &tip, base_path, &mut tree, strategy)
                .await
            {
                Ok(branch) => {
                    info!(
                        task = id,
                        branch = %branch.branch,
                        commit = %branch.commit,
                        cherry_picked = branch.cherry_picked,
                        "task stacked"
                    );
                    tip = branch.commit.clone();
                    result.commits.push(branch.commit.clone());
                    result.branches.push(branch);
                }
                Err(failure) => {
                    warn!(task = id, reason = %failure.reason, conflicts = ?failure.conflicts, "failed to stack task");
                    failed.insert(id);
                    result.failed_tasks.push(failure);
                }
            }
        }

        if tree.created {
            if let Err(err) = self.vcs.remove_worktree(base_path, &tree.path).await {
                warn!(path = %tree.path.display(), error = %err, "failed to remove stacking worktree");
            }
        }

        Ok(result)
    }

    async fn stack_one(
        &self,
        task: &CompletedTask,
        commit: &str,
        tip: &str,
        repo: &Path,
        tree: &mut StackingTree,
        strategy: ConflictStrategy,
    ) -> std::result::Result<StackBranch, StackFailure> {
        let fail = |reason: String, conflicts: Vec<String>| StackFailure {
            task_id: task.id.clone(),
            reason,
            conflicts,
        };

        let desired = self.branch_name_for(&task.id);
        let branch = claim_branch(self.vcs.as_ref(), repo, &desired, self.options.collision)
            .await
            .map_err(|e| fail(e.to_string(), Vec::new()))?;

        match self.vcs.is_ancestor(repo, tip, commit).await {
            Ok(true) => match self.vcs.create_branch_at(repo, &branch, commit).await {
                Ok(()) => {
                    return Ok(StackBranch {
                        task_id: task.id.clone(),
                        branch,
                        commit: commit.to_string(),
                        cherry_picked: false,
                    });
                }
                Err(err) => {
                    debug!(task = %task.id, error = %err, "direct branch creation failed, replaying commit");
                }
            },
            Ok(false) => {}
            Err(err) => {
                debug!(task = %task.id, error = %err, "ancestry check failed, replaying commit");
            }
        }

        self.ensure_tree(tree, repo, tip)
            .await
            .map_err(|e| fail(e.to_string(), Vec::new()))?;
        let workdir = tree.path.as_path();

        self.vcs
            .checkout_new_branch(workdir, &branch, tip)
            .await
            .map_err(|e| fail(e.to_string(), Vec::new()))?;

        let outcome = match self.vcs.cherry_pick(workdir, commit).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.discard(workdir, repo, &branch).await;
                return Err(fail(err.to_string(), Vec::new()));
            }
        };

        let conflicts = match outcome {
            CherryPickOutcome::Applied(new) => {
                return Ok(StackBranch {
                    task_id: task.id.clone(),
                    branch,
                    commit: new,
                    cherry_picked: true,
                });
            }
            CherryPickOutcome::Conflicted(conflicts) => conflicts,
        };

        let resolution = self
            .resolver
            .resolve(self.vcs.as_ref(), workdir, &conflicts, strategy)
            .await;

        let reason = match resolution {
            Ok(Resolution::Resolved) => match self.vcs.continue_cherry_pick(workdir).await {
                Ok(new) => {
                    return Ok(StackBranch {
                        task_id: task.id.clone(),
                        branch,
                        commit: new,
                        cherry_picked: true,
                    });
                }
                Err(err) => err.to_string(),
            },
            Ok(Resolution::Unresolved(reason)) => reason,
            Err(err) => err.to_string(),
        };

        self.discard(workdir, repo, &branch).await;
        Err(fail(reason, conflicts))
    }

    async fn ensure_tree(&self, tree: &mut StackingTree, repo: &Path, tip: &str) -> Result<()> {
        if !tree.created {
            self.vcs
                .add_detached_worktree(repo, &tree.path, tip)
                .await?;
            tree.created = true;
            debug!(path = %tree.path.display(), "stacking worktree created");
        }
        Ok(())
    }

    /// Abort any pick in progress and delete the partial branch.
    async fn discard(&self, workdir: &Path, repo: &Path, branch: &str) {
        if let Err(err) = self.vcs.abort_cherry_pick(workdir).await {
            debug!(error = %err, "cherry-pick abort failed");
        }
        if let Err(err) = self.vcs.detach(workdir).await {
            warn!(error = %err, "failed to detach stacking worktree");
        }
        if let Err(err) = self.vcs.delete_branch(repo, branch).await {
            warn!(branch, error = %err, "failed to delete partial stack branch");
        }
    }
}

/// Why `task` cannot be stacked, if a dependency is missing or unstacked.
fn blocked_reason(
    task: &CompletedTask,
    completed: &HashMap<&str, &CompletedTask>,
    failed: &HashSet<&str>,
) -> Option<String> {
    for dep in &task.dependencies {
        if !completed.contains_key(dep.as_str()) {
            return Some(format!("dependency '{dep}' did not complete"));
        }
        if failed.contains(dep.as_str()) {
            return Some(format!("dependency '{dep}' failed to stack"));
        }
    }
    None
}
