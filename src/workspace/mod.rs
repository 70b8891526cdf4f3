// src/workspace/mod.rs

//! Per-task isolated workspaces.
//!
//! Each workspace is a linked worktree checked out to its own branch, rooted
//! at a base reference. Workspaces live under a run-specific root directory
//! and are disposed at task end according to a [`CleanupPolicy`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::engine::retry::RetryPolicy;
use crate::errors::Result;
use crate::types::BranchCollisionPolicy;
use crate::vcs::VcsBackend;

pub mod naming;

pub use naming::{
    claim_branch, sanitize_path_component, sanitize_ref_component, workspace_dir_name,
};

pub const DEFAULT_WORK_BRANCH_PREFIX: &str = "dagstack/work/";

/// A created workspace, owned by exactly one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceHandle {
    pub task_id: String,
    pub branch: String,
    pub path: PathBuf,
    /// Main checkout the worktree is linked to.
    pub repo: PathBuf,
    pub base_ref: String,
}

/// Whether finished workspaces are removed, by task outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupPolicy {
    pub on_success: bool,
    pub on_failure: bool,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            on_success: true,
            on_failure: false,
        }
    }
}

impl CleanupPolicy {
    pub fn should_dispose(&self, succeeded: bool) -> bool {
        if succeeded {
            self.on_success
        } else {
            self.on_failure
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    /// Directory holding the run's workspaces; `<tmp>/dagstack/<run id>` when unset.
    pub root: Option<PathBuf>,
    pub branch_prefix: String,
    pub cleanup: CleanupPolicy,
    pub collision: BranchCollisionPolicy,
}

impl Default for WorkspaceOptions {
    fn default() -> Self {
        Self {
            root: None,
            branch_prefix: DEFAULT_WORK_BRANCH_PREFIX.to_string(),
            cleanup: CleanupPolicy::default(),
            collision: BranchCollisionPolicy::default(),
        }
    }
}

/// Default workspace root for a run.
pub fn default_root(run_id: &str) -> PathBuf {
    std::env::temp_dir().join("dagstack").join(run_id)
}

#[derive(Debug, Clone)]
pub struct WorkspaceService {
    vcs: Arc<dyn VcsBackend>,
    root: PathBuf,
    options: WorkspaceOptions,
    retry: RetryPolicy,
    /// Serializes branch claims so concurrent tasks never pick the same name.
    claims: Arc<Mutex<()>>,
}

impl WorkspaceService {
    pub fn new(vcs: Arc<dyn VcsBackend>, root: PathBuf, options: WorkspaceOptions) -> Self {
        Self {
            vcs,
            root,
            options,
            retry: RetryPolicy::default(),
            claims: Arc::new(Mutex::new(())),
        }
    }

    /// Policy applied to transient VCS failures during create and commit.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &WorkspaceOptions {
        &self.options
    }

    /// Default branch name for a task's workspace.
    pub fn branch_name_for(&self, task_id: &str) -> String {
        format!("{}{}", self.options.branch_prefix, sanitize_ref_component(task_id))
    }

    /// Create a branch at `base_ref` and a worktree checked out to it.
    pub async fn create(
        &self,
        task_id: &str,
        branch_name: &str,
        base_path: &Path,
        base_ref: &str,
    ) -> Result<WorkspaceHandle> {
        let path = self.root.join(workspace_dir_name(task_id));

        // Only this task maps to `path`; anything there is a leftover of a
        // crashed run or an earlier attempt.
        self.vcs.remove_worktree(base_path, &path).await?;

        let claim = self.claims.lock().await;
        let branch =
            claim_branch(self.vcs.as_ref(), base_path, branch_name, self.options.collision)
                .await?;

        self.retry
            .run("add_worktree", || {
                self.vcs.add_worktree(base_path, &path, &branch, base_ref)
            })
            .await?;
        drop(claim);

        info!(
            task = task_id,
            branch = %branch,
            path = %path.display(),
            base = base_ref,
            "workspace created"
        );

        Ok(WorkspaceHandle {
            task_id: task_id.to_string(),
            branch,
            path,
            repo: base_path.to_path_buf(),
            base_ref: base_ref.to_string(),
        })
    }

    /// Commit everything in the workspace. `None` when there was nothing to
    /// commit.
    pub async fn commit(&self, handle: &WorkspaceHandle, message: &str) -> Result<Option<String>> {
        if !self.vcs.has_changes(&handle.path).await? {
            debug!(task = %handle.task_id, "workspace has no changes");
            return Ok(None);
        }
        let commit = self
            .retry
            .run("commit_all", || self.vcs.commit_all(&handle.path, message))
            .await?;
        debug!(task = %handle.task_id, commit = %commit, "workspace committed");
        Ok(Some(commit))
    }

    /// Delete the working directory; the branch survives.
    pub async fn remove(&self, handle: &WorkspaceHandle) -> Result<()> {
        self.vcs.remove_worktree(&handle.repo, &handle.path).await?;
        debug!(task = %handle.task_id, path = %handle.path.display(), "workspace removed");
        Ok(())
    }

    pub async fn delete_branch(&self, handle: &WorkspaceHandle) -> Result<()> {
        self.vcs.delete_branch(&handle.repo, &handle.branch).await?;
        debug!(task = %handle.task_id, branch = %handle.branch, "workspace branch deleted");
        Ok(())
    }

    /// Apply the cleanup policy to a finished workspace. Returns whether it
    /// was retained.
    ///
    /// A disposed successful workspace keeps its branch: the commit on it is
    /// the task's result and feeds dependents and the stack. A disposed
    /// failed workspace loses its branch too.
    pub async fn dispose(&self, handle: &WorkspaceHandle, succeeded: bool) -> Result<bool> {
        if !self.options.cleanup.should_dispose(succeeded) {
            info!(
                task = %handle.task_id,
                path = %handle.path.display(),
                "workspace retained for inspection"
            );
            return Ok(true);
        }

        self.remove(handle).await?;
        if !succeeded {
            self.delete_branch(handle).await?;
        }
        Ok(false)
    }
}
