// src/vcs/mock.rs

//! In-memory repository implementing [`VcsBackend`].
//!
//! Commits are full file snapshots; cherry-picks do a per-file three-way
//! merge against the picked commit's parent, so conflicts appear exactly
//! where `git` would report them for whole-file edits. The repository path
//! arguments are ignored: one `MockVcs` is one repository.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use crate::errors::{DagstackError, Result};

use super::{BoxFuture, CherryPickOutcome, VcsBackend};

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone)]
struct MockCommit {
    parent: Option<String>,
    files: BTreeMap<String, String>,
    message: String,
}

#[derive(Debug, Clone)]
struct PendingPick {
    commit: String,
    conflicts: Vec<String>,
}

#[derive(Debug, Clone)]
struct MockWorktree {
    branch: Option<String>,
    head: String,
    files: BTreeMap<String, String>,
    picking: Option<PendingPick>,
}

#[derive(Debug, Default)]
struct MockState {
    commits: HashMap<String, MockCommit>,
    branches: BTreeMap<String, String>,
    worktrees: HashMap<PathBuf, MockWorktree>,
    next_id: u64,
    /// Remaining injected failures per operation name.
    failures: HashMap<String, u32>,
    log: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MockVcs {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVcs {
    /// Repository with one empty root commit on `main`.
    pub fn new() -> Self {
        Self::with_files(std::iter::empty::<(&str, &str)>())
    }

    /// Repository whose root commit on `main` contains the given files.
    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut state = MockState::default();
        let files = files
            .into_iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect();
        let root = state.new_commit(None, files, "initial commit".to_string());
        state.branches.insert(DEFAULT_BRANCH.to_string(), root);

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the state, honouring injected failures for `op`.
    fn with_state<T>(&self, op: &str, f: impl FnOnce(&mut MockState) -> Result<T>) -> Result<T> {
        let mut state = self.lock();
        state.log.push(op.to_string());
        if let Some(remaining) = state.failures.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DagstackError::vcs(op, "injected failure"));
            }
        }
        f(&mut state)
    }

    /// Make the next `times` calls of `op` fail (`u32::MAX` for always).
    pub fn fail_op(&self, op: &str, times: u32) {
        self.lock().failures.insert(op.to_string(), times);
    }

    /// Names of the operations called so far, in order.
    pub fn operations(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Write a file in a worktree's working copy.
    pub fn write_file(&self, workdir: &Path, path: &str, contents: &str) -> Result<()> {
        let mut state = self.lock();
        let wt = state.worktree_mut(workdir)?;
        wt.files.insert(path.to_string(), contents.to_string());
        Ok(())
    }

    pub fn remove_file(&self, workdir: &Path, path: &str) -> Result<()> {
        let mut state = self.lock();
        let wt = state.worktree_mut(workdir)?;
        wt.files.remove(path);
        Ok(())
    }

    /// Snapshot of the files at a branch, `HEAD` or commit.
    pub fn files_at(&self, reference: &str) -> Result<BTreeMap<String, String>> {
        let state = self.lock();
        let commit = state.resolve(reference)?;
        Ok(state.commits[&commit].files.clone())
    }

    pub fn message_of(&self, reference: &str) -> Result<String> {
        let state = self.lock();
        let commit = state.resolve(reference)?;
        Ok(state.commits[&commit].message.clone())
    }

    pub fn parent_of(&self, reference: &str) -> Result<Option<String>> {
        let state = self.lock();
        let commit = state.resolve(reference)?;
        Ok(state.commits[&commit].parent.clone())
    }

    pub fn branches(&self) -> Vec<String> {
        self.lock().branches.keys().cloned().collect()
    }

    pub fn branch_head(&self, branch: &str) -> Option<String> {
        self.lock().branches.get(branch).cloned()
    }

    /// Create a branch directly (e.g. to simulate leftovers of a crashed run).
    pub fn create_branch(&self, branch: &str, reference: &str) -> Result<()> {
        let mut state = self.lock();
        let commit = state.resolve(reference)?;
        state.branches.insert(branch.to_string(), commit);
        Ok(())
    }

    pub fn worktree_exists(&self, workdir: &Path) -> bool {
        self.lock().worktrees.contains_key(workdir)
    }

    pub fn worktree_count(&self) -> usize {
        self.lock().worktrees.len()
    }
}

impl MockState {
    fn new_commit(
        &mut self,
        parent: Option<String>,
        files: BTreeMap<String, String>,
        message: String,
    ) -> String {
        self.next_id += 1;
        let id = format!("{:040x}", self.next_id);
        self.commits.insert(
            id.clone(),
            MockCommit {
                parent,
                files,
                message,
            },
        );
        id
    }

    fn resolve(&self, reference: &str) -> Result<String> {
        let reference = if reference == "HEAD" {
            DEFAULT_BRANCH
        } else {
            reference
        };
        if let Some(commit) = self.branches.get(reference) {
            return Ok(commit.clone());
        }
        if self.commits.contains_key(reference) {
            return Ok(reference.to_string());
        }
        Err(DagstackError::vcs(
            "rev-parse",
            format!("unknown revision '{reference}'"),
        ))
    }

    fn worktree_mut(&mut self, workdir: &Path) -> Result<&mut MockWorktree> {
        self.worktrees.get_mut(workdir).ok_or_else(|| {
            DagstackError::vcs("worktree", format!("'{}' is not a worktree", workdir.display()))
        })
    }

    fn ensure_new_branch(&self, branch: &str) -> Result<()> {
        if self.branches.contains_key(branch) {
            return Err(DagstackError::vcs(
                "branch",
                format!("a branch named '{branch}' already exists"),
            ));
        }
        Ok(())
    }

    fn add_worktree(&mut self, path: &Path, branch: Option<&str>, base: &str) -> Result<()> {
        let head = self.resolve(base)?;
        if let Some(branch) = branch {
            self.ensure_new_branch(branch)?;
            self.branches.insert(branch.to_string(), head.clone());
        }
        let files = self.commits[&head].files.clone();
        self.worktrees.insert(
            path.to_path_buf(),
            MockWorktree {
                branch: branch.map(str::to_string),
                head,
                files,
                picking: None,
            },
        );
        Ok(())
    }

    /// Commit the worktree's files on top of its head and advance its branch.
    fn commit_worktree(&mut self, workdir: &Path, message: String) -> Result<String> {
        let (parent, files) = {
            let wt = self.worktree_mut(workdir)?;
            (wt.head.clone(), wt.files.clone())
        };
        let id = self.new_commit(Some(parent), files, message);
        let wt = self.worktree_mut(workdir)?;
        wt.head = id.clone();
        wt.picking = None;
        if let Some(branch) = wt.branch.clone() {
            self.branches.insert(branch, id.clone());
        }
        Ok(id)
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let ancestor = self.resolve(ancestor)?;
        let mut cursor = Some(self.resolve(descendant)?);
        while let Some(id) = cursor {
            if id == ancestor {
                return Ok(true);
            }
            cursor = self.commits[&id].parent.clone();
        }
        Ok(false)
    }

    fn cherry_pick(&mut self, workdir: &Path, commit: &str) -> Result<CherryPickOutcome> {
        let commit = self.resolve(commit)?;
        let picked = self.commits[&commit].clone();
        let base = match &picked.parent {
            Some(p) => self.commits[p].files.clone(),
            None => BTreeMap::new(),
        };

        let wt = self.worktree_mut(workdir)?;
        if wt.picking.is_some() {
            return Err(DagstackError::vcs(
                "cherry-pick",
                "a cherry-pick is already in progress",
            ));
        }

        let paths: BTreeSet<&String> = base.keys().chain(picked.files.keys()).collect();
        let mut conflicts = Vec::new();
        for path in paths {
            let base_side = base.get(path);
            let theirs = picked.files.get(path);
            if theirs == base_side {
                continue;
            }
            let ours = wt.files.get(path).cloned();
            if ours.as_ref() == base_side {
                match theirs {
                    Some(content) => wt.files.insert(path.clone(), content.clone()),
                    None => wt.files.remove(path),
                };
            } else if ours.as_ref() != theirs {
                let marker = format!(
                    "<<<<<<< HEAD\n{}=======\n{}>>>>>>> {}\n",
                    ours.unwrap_or_default(),
                    theirs.cloned().unwrap_or_default(),
                    &commit[..7.min(commit.len())]
                );
                wt.files.insert(path.clone(), marker);
                conflicts.push(path.clone());
            }
        }

        if conflicts.is_empty() {
            let id = self.commit_worktree(workdir, picked.message)?;
            Ok(CherryPickOutcome::Applied(id))
        } else {
            wt.picking = Some(PendingPick {
                commit,
                conflicts: conflicts.clone(),
            });
            Ok(CherryPickOutcome::Conflicted(conflicts))
        }
    }
}

impl VcsBackend for MockVcs {
    fn resolve_ref<'a>(&'a self, _repo: &'a Path, reference: &'a str) -> BoxFuture<'a, String> {
        let result = self.with_state("resolve_ref", |s| s.resolve(reference));
        Box::pin(async move { result })
    }

    fn branch_exists<'a>(&'a self, _repo: &'a Path, branch: &'a str) -> BoxFuture<'a, bool> {
        let result = self.with_state("branch_exists", |s| Ok(s.branches.contains_key(branch)));
        Box::pin(async move { result })
    }

    fn add_worktree<'a>(
        &'a self,
        _repo: &'a Path,
        path: &'a Path,
        branch: &'a str,
        base: &'a str,
    ) -> BoxFuture<'a, ()> {
        let result = self.with_state("add_worktree", |s| s.add_worktree(path, Some(branch), base));
        Box::pin(async move { result })
    }

    fn add_detached_worktree<'a>(
        &'a self,
        _repo: &'a Path,
        path: &'a Path,
        base: &'a str,
    ) -> BoxFuture<'a, ()> {
        let result = self.with_state("add_detached_worktree", |s| s.add_worktree(path, None, base));
        Box::pin(async move { result })
    }

    fn remove_worktree<'a>(&'a self, _repo: &'a Path, path: &'a Path) -> BoxFuture<'a, ()> {
        let result = self.with_state("remove_worktree", |s| {
            s.worktrees.remove(path);
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn delete_branch<'a>(&'a self, _repo: &'a Path, branch: &'a str) -> BoxFuture<'a, ()> {
        let result = self.with_state("delete_branch", |s| {
            if s.worktrees
                .values()
                .any(|wt| wt.branch.as_deref() == Some(branch))
            {
                return Err(DagstackError::vcs(
                    "branch -D",
                    format!("branch '{branch}' is checked out in a worktree"),
                ));
            }
            s.branches
                .remove(branch)
                .map(|_| ())
                .ok_or_else(|| DagstackError::vcs("branch -D", format!("branch '{branch}' not found")))
        });
        Box::pin(async move { result })
    }

    fn has_changes<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, bool> {
        let result = self.with_state("has_changes", |s| {
            let wt = s.worktree_mut(workdir)?;
            let head = wt.head.clone();
            let files = wt.files.clone();
            Ok(s.commits[&head].files != files)
        });
        Box::pin(async move { result })
    }

    fn commit_all<'a>(&'a self, workdir: &'a Path, message: &'a str) -> BoxFuture<'a, String> {
        let result = self.with_state("commit_all", |s| s.commit_worktree(workdir, message.to_string()));
        Box::pin(async move { result })
    }

    fn create_branch_at<'a>(
        &'a self,
        _repo: &'a Path,
        branch: &'a str,
        commit: &'a str,
    ) -> BoxFuture<'a, ()> {
        let result = self.with_state("create_branch_at", |s| {
            s.ensure_new_branch(branch)?;
            let commit = s.resolve(commit)?;
            s.branches.insert(branch.to_string(), commit);
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn is_ancestor<'a>(
        &'a self,
        _repo: &'a Path,
        ancestor: &'a str,
        descendant: &'a str,
    ) -> BoxFuture<'a, bool> {
        let result = self.with_state("is_ancestor", |s| s.is_ancestor(ancestor, descendant));
        Box::pin(async move { result })
    }

    fn checkout_new_branch<'a>(
        &'a self,
        workdir: &'a Path,
        branch: &'a str,
        start: &'a str,
    ) -> BoxFuture<'a, ()> {
        let result = self.with_state("checkout_new_branch", |s| {
            s.ensure_new_branch(branch)?;
            let head = s.resolve(start)?;
            let files = s.commits[&head].files.clone();
            s.branches.insert(branch.to_string(), head.clone());
            let wt = s.worktree_mut(workdir)?;
            wt.branch = Some(branch.to_string());
            wt.head = head;
            wt.files = files;
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn detach<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, ()> {
        let result = self.with_state("detach", |s| {
            s.worktree_mut(workdir)?.branch = None;
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn cherry_pick<'a>(
        &'a self,
        workdir: &'a Path,
        commit: &'a str,
    ) -> BoxFuture<'a, CherryPickOutcome> {
        let result = self.with_state("cherry_pick", |s| s.cherry_pick(workdir, commit));
        Box::pin(async move { result })
    }

    fn conflicted_files<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, Vec<String>> {
        let result = self.with_state("conflicted_files", |s| {
            Ok(s.worktree_mut(workdir)?
                .picking
                .as_ref()
                .map(|p| p.conflicts.clone())
                .unwrap_or_default())
        });
        Box::pin(async move { result })
    }

    fn take_incoming<'a>(&'a self, workdir: &'a Path, files: &'a [String]) -> BoxFuture<'a, ()> {
        let result = self.with_state("take_incoming", |s| {
            let picked = match s.worktree_mut(workdir)?.picking.as_ref() {
                Some(p) => p.commit.clone(),
                None => {
                    return Err(DagstackError::vcs("checkout --theirs", "no cherry-pick in progress"));
                }
            };
            let theirs = s.commits[&picked].files.clone();
            let wt = s.worktree_mut(workdir)?;
            for file in files {
                match theirs.get(file) {
                    Some(content) => wt.files.insert(file.clone(), content.clone()),
                    None => wt.files.remove(file),
                };
            }
            if let Some(pick) = wt.picking.as_mut() {
                pick.conflicts.retain(|c| !files.contains(c));
            }
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn continue_cherry_pick<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, String> {
        let result = self.with_state("continue_cherry_pick", |s| {
            let pick = s
                .worktree_mut(workdir)?
                .picking
                .clone()
                .ok_or_else(|| DagstackError::vcs("cherry-pick --continue", "no cherry-pick in progress"))?;
            if !pick.conflicts.is_empty() {
                return Err(DagstackError::vcs(
                    "cherry-pick --continue",
                    format!("unresolved conflicts: {}", pick.conflicts.join(", ")),
                ));
            }
            let message = s.commits[&pick.commit].message.clone();
            s.commit_worktree(workdir, message)
        });
        Box::pin(async move { result })
    }

    fn abort_cherry_pick<'a>(&'a self, workdir: &'a Path) -> BoxFuture<'a, ()> {
        let result = self.with_state("abort_cherry_pick", |s| {
            let head = s.worktree_mut(workdir)?.head.clone();
            let files = s.commits[&head].files.clone();
            let wt = s.worktree_mut(workdir)?;
            wt.files = files;
            wt.picking = None;
            Ok(())
        });
        Box::pin(async move { result })
    }
}
