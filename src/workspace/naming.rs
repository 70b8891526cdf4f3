// src/workspace/naming.rs

//! Branch and directory naming shared by workspaces and stacking.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::errors::{DagstackError, Result};
use crate::types::BranchCollisionPolicy;
use crate::vcs::VcsBackend;

/// Highest numeric suffix tried by [`BranchCollisionPolicy::Suffix`].
pub const MAX_SUFFIX: u32 = 100;

static INVALID_REF_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._/-]+").expect("branch name regex is valid"));

/// Turn a task id into something `git check-ref-format` accepts as part of
/// a branch name.
pub fn sanitize_ref_component(raw: &str) -> String {
    let replaced = INVALID_REF_CHARS.replace_all(raw.trim(), "-");
    let parts: Vec<String> = replaced
        .split('/')
        .map(|part| {
            part.trim_matches('.')
                .trim_end_matches(".lock")
                .trim_matches('.')
                .replace("..", "-")
        })
        .filter(|part| !part.is_empty())
        .collect();

    let joined = parts.join("/");
    let joined = joined.trim_matches('-');
    if joined.is_empty() {
        "task".to_string()
    } else {
        joined.to_string()
    }
}

/// Single path component derived from a task id.
pub fn sanitize_path_component(raw: &str) -> String {
    sanitize_ref_component(raw).replace('/', "-")
}

/// Directory name of a task's workspace.
///
/// Ids that survive sanitizing unchanged are used as is. Others get a short
/// digest of the raw id appended, so `a b` and `a-b` never share a directory.
pub fn workspace_dir_name(task_id: &str) -> String {
    let sanitized = sanitize_path_component(task_id);
    if sanitized == task_id {
        return sanitized;
    }
    let digest = blake3::hash(task_id.as_bytes()).to_hex();
    format!("{sanitized}-{}", &digest.as_str()[..DIGEST_LEN])
}

const DIGEST_LEN: usize = 12;

/// Pick the branch name to create for `desired`, applying `policy` when a
/// branch of that name is already present.
pub async fn claim_branch(
    vcs: &dyn VcsBackend,
    repo: &Path,
    desired: &str,
    policy: BranchCollisionPolicy,
) -> Result<String> {
    if !vcs.branch_exists(repo, desired).await? {
        return Ok(desired.to_string());
    }

    match policy {
        BranchCollisionPolicy::Reset => {
            warn!(branch = desired, "branch exists, resetting it");
            vcs.delete_branch(repo, desired).await?;
            Ok(desired.to_string())
        }
        BranchCollisionPolicy::Suffix => {
            for n in 2..=MAX_SUFFIX {
                let candidate = format!("{desired}-{n}");
                if !vcs.branch_exists(repo, &candidate).await? {
                    debug!(branch = desired, chosen = %candidate, "branch exists, using suffix");
                    return Ok(candidate);
                }
            }
            Err(DagstackError::BranchExists(desired.to_string()))
        }
        BranchCollisionPolicy::Fail => Err(DagstackError::BranchExists(desired.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcs::MockVcs;

    #[test]
    fn sanitize_keeps_plain_ids() {
        assert_eq!(sanitize_ref_component("task-1"), "task-1");
        assert_eq!(sanitize_ref_component("api/v2_setup"), "api/v2_setup");
    }

    #[test]
    fn sanitize_replaces_forbidden_sequences() {
        assert_eq!(sanitize_ref_component("add auth: login"), "add-auth-login");
        assert_eq!(sanitize_ref_component("a..b"), "a-b");
        assert_eq!(sanitize_ref_component(".hidden/x.lock"), "hidden/x");
        assert_eq!(sanitize_ref_component("a//b"), "a/b");
        assert_eq!(sanitize_ref_component("~^:"), "task");
        assert_eq!(sanitize_path_component("api/v2"), "api-v2");
    }

    #[test]
    fn workspace_dirs_stay_distinct_after_sanitizing() {
        assert_eq!(workspace_dir_name("task-1"), "task-1");
        assert_eq!(workspace_dir_name("a b"), workspace_dir_name("a b"));

        let names = ["a-b", "a b", "a:b", "api/v2", "api-v2"].map(workspace_dir_name);
        for (i, x) in names.iter().enumerate() {
            for y in &names[i + 1..] {
                assert_ne!(x, y);
            }
            assert!(!x.contains('/'));
        }
        assert!(names[1].starts_with("a-b-"));
    }

    #[tokio::test]
    async fn claim_free_name_is_unchanged() {
        let vcs = MockVcs::new();
        let name = claim_branch(&vcs, Path::new("/r"), "work/a", BranchCollisionPolicy::Fail)
            .await
            .unwrap();
        assert_eq!(name, "work/a");
    }

    #[tokio::test]
    async fn claim_applies_collision_policy() {
        let vcs = MockVcs::new();
        vcs.create_branch("work/a", "main").unwrap();
        vcs.create_branch("work/a-2", "main").unwrap();
        let repo = Path::new("/r");

        let suffixed = claim_branch(&vcs, repo, "work/a", BranchCollisionPolicy::Suffix)
            .await
            .unwrap();
        assert_eq!(suffixed, "work/a-3");

        let err = claim_branch(&vcs, repo, "work/a", BranchCollisionPolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, DagstackError::BranchExists(b) if b == "work/a"));

        let reset = claim_branch(&vcs, repo, "work/a", BranchCollisionPolicy::Reset)
            .await
            .unwrap();
        assert_eq!(reset, "work/a");
        assert!(!vcs.branches().contains(&"work/a".to_string()));
    }
}
