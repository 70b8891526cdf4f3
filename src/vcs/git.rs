// src/vcs/git.rs

//! [`VcsBackend`] backed by the `git` command-line tool.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::{DagstackError, Result};

use super::{BoxFuture, CherryPickOutcome, VcsBackend};

#[derive(Debug)]
struct GitOutput {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// Runs `git -C <dir> ...` subprocesses.
#[derive(Debug, Clone)]
pub struct GitBackend {
    program: String,
    /// Author and committer identity for every commit git creates,
    /// cherry-picks included.
    identity: Option<(String, String)>,
}

impl Default for GitBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GitBackend {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
            identity: None,
        }
    }

    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = Some((name.into(), email.into()));
        self
    }

    /// Environment overriding the repository's configured identity.
    fn identity_env(&self) -> Vec<(&'static str, &str)> {
        match &self.identity {
            Some((name, email)) => vec![
                ("GIT_AUTHOR_NAME", name.as_str()),
                ("GIT_AUTHOR_EMAIL", email.as_str()),
                ("GIT_COMMITTER_NAME", name.as_str()),
                ("GIT_COMMITTER_EMAIL", email.as_str()),
            ],
            None => Vec::new(),
        }
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<GitOutput> {
        debug!(dir = %dir.display(), args = ?args, "running git");

        let output = Command::new(&self.program)
            .arg("-C")
            .arg(dir)
            .args(args)
            .env("GIT_EDITOR", "true")
            .envs(self.identity_env())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(GitOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Run and fail on a non-zero exit; returns trimmed stdout.
    async fn run_ok(&self, dir: &Path, op: &str, args: &[&str]) -> Result<String> {
        let out = self.run(dir, args).await?;
        if !out.success {
            return Err(DagstackError::vcs(op, out.stderr.trim()));
        }
        Ok(out.stdout.trim().to_string())
    }

    async fn head(&self, dir: &Path) -> Result<String> {
        self.run_ok(dir, "rev-parse", &["rev-parse", "HEAD"]).await
    }

    async fn clear_stale_path(&self, repo: &Path, path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path).await? {
            warn!(path = %path.display(), "removing stale worktree directory");
            let path_str = path.to_string_lossy().into_owned();
            let _ = self
                .run(repo, &["worktree", "remove", "--force", path_str.as_str()])
                .await?;
            if tokio::fs::try_exists(path).await? {
                tokio::fs::remove_dir_all(path).await?;
            }
        }
        self.run_ok(repo, "worktree prune", &["worktree", "prune"])
            .await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn commit(&self, workdir: &Path, message: &str) -> Result<String> {
        self.run_ok(workdir, "add", &["add", "-A"]).await?;

        self.run_ok(workdir, "commit", &["commit", "--no-verify", "-m", message])
            .await?;
        self.head(workdir).await
    }

    async fn cherry_pick_inner(&self, workdir: &Path, commit: &str) -> Result<CherryPickOutcome> {
        let out = self
            .run(
                workdir,
                &["cherry-pick", "--allow-empty", "--keep-redundant-commits", commit],
            )
            .await?;
        if out.success {
            return Ok(CherryPickOutcome::Applied(self.head(workdir).await?));
        }

        let conflicts = self.unmerged(workdir).await?;
        if conflicts.is_empty() {
            return Err(DagstackError::vcs("cherry-pick", out.stderr.trim()));
        }
        Ok(CherryPickOutcome::Conflicted(conflicts))
    }

    async fn unmerged(&self, workdir: &Path) -> Result<Vec<String>> {
        let out = self
            .run_ok(
                workdir,
                "diff",
                &["diff", "--name-only", "--diff-filter=U"],
            )
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn take_incoming_inner(&self, workdir: &Path, files: &[String]) -> Result<()> {
        for file in files {
            let checkout = self
                .run(workdir, &["checkout", "--theirs", "--", file.as_str()])
                .await?;
            if checkout.success {
                self.run_ok(workdir, "add", &["add", "--", file.as_str()]).await?;
            } else {
                // Deleted on the incoming side.
                self.run_ok(workdir, "rm", &["rm", "--quiet", "--", file.as_str()])
                    .await?;
            }
        }
        Ok(())
    }
}

impl VcsBackend for GitBackend {
    fn resolve_ref<'a>(&'a self, repo: &'a Path, reference: &'a str) -> BoxFuture<'a, String> {
        Box::pin(async move {
            let spec = format!("{reference}^{{commit}}");
            self.run_ok(repo, "rev-parse", &["rev-parse", "--verify", "--quiet", spec.as_str()])
                .await
                .map_err(|_| DagstackError::vcs("rev-parse", format!("unknown revision '{reference}'")))
        })
    }

    fn branch_exists<'a>(&'a self, repo: &'a Path, branch: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let full = format!("refs/heads/{branch}");
            let out = self
                .run(repo, &["show-ref", "--verify", "--quiet", full.as_str()])
                .await?;
            Ok(out.success)
        })
    }

    fn add_worktree<'a>(
        &'a self,
        repo: &'a Path,
        path: &'a Path,
        branch: &'a str,
        base: &'a str,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.clear_stale_path(repo, path).await?;
            let path_str = path.to_string_lossy().into_owned();
            self.run_ok(
                repo,
                "worktree add",
                &["worktree", "add", "-b", branch, path_str.as_str(), base],
            )
            .await?;
            Ok(())
        })
    }

    fn add_detached_worktree<'a>(
        &'a self,
        repo: &'a Path,
        path: &'a Path,
        base: &'a str,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.clear_stale_path(repo, path).await?;
            let path_str = path.to_string_lossy().into_owned();
            self.run_ok(
                repo,
                "worktree add",
                &["worktree", "add", "--detach", path_str.as_str(), base],
            )
            .await?;
            Ok(())
        })
    }

    fn remove_worktree<'a>(&'a self, repo: &'a Path, path: &'a Path) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let path_str = path.to_string_lossy().into_owned();
            let out = self
                .run(repo, &["worktree", "remove", "--force", path_str.as_str()])
                .await?;
            if !out.success {
                debug!(path = %path.display(), stderr = %out.stderr.trim(), "worktree remove failed, deleting directory");
                if tokio::fs::try_exists(path).await? {
                    tokio::fs::remove_dir_all(path).await?;
                }
                self.run_ok(repo, "worktree prune", &["worktree", "prune"])
                    .await?;
            }
            Ok(())
        })
    }

    fn delete_branch<'a>(&'a self, repo: &'a Path, branch: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(repo, "worktree prune", &["worktree", "prune"])
                .await?;
            self.run_ok(repo, "branch -D", &["branch", "-D", branch])
                .await?;
            Ok(())
        })
    }

    fn has_changes<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let status = self
                .run_ok(workdir, "status", &["status", "--porcelain"])
                .await?;
            Ok(!status.is_empty())
        })
    }

    fn commit_all<'a>(&'a self, workdir: &'a Path, message: &'a str) -> BoxFuture<'a, String> {
        Box::pin(self.commit(workdir, message))
    }

    fn create_branch_at<'a>(
        &'a self,
        repo: &'a Path,
        branch: &'a str,
        commit: &'a str,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(repo, "branch", &["branch", branch, commit])
                .await?;
            Ok(())
        })
    }

    fn is_ancestor<'a>(
        &'a self,
        repo: &'a Path,
        ancestor: &'a str,
        descendant: &'a str,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let out = self
                .run(repo, &["merge-base", "--is-ancestor", ancestor, descendant])
                .await?;
            match out.code {
                Some(0) => Ok(true),
                Some(1) => Ok(false),
                _ => Err(DagstackError::vcs("merge-base", out.stderr.trim())),
            }
        })
    }

    fn checkout_new_branch<'a>(
        &'a self,
        workdir: &'a Path,
        branch: &'a str,
        start: &'a str,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(workdir, "checkout", &["checkout", "-b", branch, start])
                .await?;
            Ok(())
        })
    }

    fn detach<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(workdir, "checkout", &["checkout", "--detach"])
                .await?;
            Ok(())
        })
    }

    fn cherry_pick<'a>(
        &'a self,
        workdir: &'a Path,
        commit: &'a str,
    ) -> BoxFuture<'a, CherryPickOutcome> {
        Box::pin(self.cherry_pick_inner(workdir, commit))
    }

    fn conflicted_files<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, Vec<String>> {
        Box::pin(self.unmerged(workdir))
    }

    fn take_incoming<'a>(&'a self, workdir: &'a Path, files: &'a [String]) -> BoxFuture<'a, ()> {
        Box::pin(self.take_incoming_inner(workdir, files))
    }

    fn continue_cherry_pick<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, String> {
        Box::pin(async move {
            self.run_ok(
                workdir,
                "cherry-pick --continue",
                &["-c", "core.editor=true", "cherry-pick", "--continue"],
            )
            .await?;
            self.head(workdir).await
        })
    }

    fn abort_cherry_pick<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.run_ok(workdir, "cherry-pick --abort", &["cherry-pick", "--abort"])
                .await?;
            Ok(())
        })
    }
}
