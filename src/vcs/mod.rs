// src/vcs/mod.rs

//! Version-control collaborator.
//!
//! The workspace and stack services talk to a [`VcsBackend`] instead of
//! shelling out directly. Production code uses [`GitBackend`], which runs
//! `git` subprocesses; tests use [`MockVcs`], an in-memory repository with
//! the same observable semantics (branches, linked worktrees, commits,
//! three-way cherry-picks).
//!
//! Every operation is awaited by the caller, so from the engine's point of
//! view each one is a single synchronous step.

use std::fmt::Debug;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::errors::Result;

pub mod git;
pub mod mock;

pub use git::GitBackend;
pub use mock::MockVcs;

/// Boxed future returned by collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Result of replaying a commit onto the current branch of a worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CherryPickOutcome {
    /// Replay succeeded; carries the new commit id.
    Applied(String),
    /// Replay stopped with these paths unmerged. The worktree is left
    /// mid-cherry-pick until it is continued or aborted.
    Conflicted(Vec<String>),
}

/// Operations the engine needs from the version-control system.
///
/// `repo` is the main checkout; `workdir` is a linked worktree created via
/// [`VcsBackend::add_worktree`] or [`VcsBackend::add_detached_worktree`].
pub trait VcsBackend: Send + Sync + Debug {
    /// Resolve a branch name, `HEAD` or commit id to a commit id.
    fn resolve_ref<'a>(&'a self, repo: &'a Path, reference: &'a str) -> BoxFuture<'a, String>;

    fn branch_exists<'a>(&'a self, repo: &'a Path, branch: &'a str) -> BoxFuture<'a, bool>;

    /// Create `branch` at `base` and a worktree at `path` checked out to it.
    /// A stale directory already at `path` is cleared first.
    fn add_worktree<'a>(
        &'a self,
        repo: &'a Path,
        path: &'a Path,
        branch: &'a str,
        base: &'a str,
    ) -> BoxFuture<'a, ()>;

    /// Create a worktree at `path` with a detached `HEAD` at `base`.
    fn add_detached_worktree<'a>(
        &'a self,
        repo: &'a Path,
        path: &'a Path,
        base: &'a str,
    ) -> BoxFuture<'a, ()>;

    /// Delete a worktree directory. The branch it had checked out survives.
    fn remove_worktree<'a>(&'a self, repo: &'a Path, path: &'a Path) -> BoxFuture<'a, ()>;

    fn delete_branch<'a>(&'a self, repo: &'a Path, branch: &'a str) -> BoxFuture<'a, ()>;

    /// Whether the worktree has uncommitted changes (tracked or not).
    fn has_changes<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, bool>;

    /// Stage everything and commit; returns the new commit id.
    fn commit_all<'a>(&'a self, workdir: &'a Path, message: &'a str) -> BoxFuture<'a, String>;

    /// Create `branch` pointing at an existing commit, without a checkout.
    fn create_branch_at<'a>(
        &'a self,
        repo: &'a Path,
        branch: &'a str,
        commit: &'a str,
    ) -> BoxFuture<'a, ()>;

    fn is_ancestor<'a>(
        &'a self,
        repo: &'a Path,
        ancestor: &'a str,
        descendant: &'a str,
    ) -> BoxFuture<'a, bool>;

    /// Create `branch` at `start` and check it out in the worktree.
    fn checkout_new_branch<'a>(
        &'a self,
        workdir: &'a Path,
        branch: &'a str,
        start: &'a str,
    ) -> BoxFuture<'a, ()>;

    /// Detach `HEAD` in the worktree so its branch can be deleted.
    fn detach<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, ()>;

    /// Replay `commit` onto the worktree's current branch.
    fn cherry_pick<'a>(&'a self, workdir: &'a Path, commit: &'a str)
    -> BoxFuture<'a, CherryPickOutcome>;

    /// Paths currently unmerged in the worktree.
    fn conflicted_files<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, Vec<String>>;

    /// Resolve the given conflicted paths by taking the side being replayed.
    fn take_incoming<'a>(&'a self, workdir: &'a Path, files: &'a [String]) -> BoxFuture<'a, ()>;

    /// Finish an in-progress cherry-pick; returns the new commit id.
    fn continue_cherry_pick<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, String>;

    fn abort_cherry_pick<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, ()>;
}
