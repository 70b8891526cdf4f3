// src/stack/conflict.rs

//! Conflict resolution during cherry-pick stacking.

use std::fmt::Debug;
use std::path::Path;

use tracing::{debug, info};

use crate::types::ConflictStrategy;
use crate::vcs::{BoxFuture, VcsBackend};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Every conflict is resolved; the cherry-pick can be continued.
    Resolved,
    /// The pick must be aborted, with a reason.
    Unresolved(String),
}

/// Decides what happens to a cherry-pick stopped on conflicts.
///
/// Called with the worktree still mid-pick. On [`Resolution::Resolved`] the
/// caller continues the pick, otherwise it aborts it.
pub trait ConflictResolver: Send + Sync + Debug {
    fn resolve<'a>(
        &'a self,
        vcs: &'a dyn VcsBackend,
        workdir: &'a Path,
        conflicts: &'a [String],
        strategy: ConflictStrategy,
    ) -> BoxFuture<'a, Resolution>;
}

/// Resolver implementing the built-in [`ConflictStrategy`] values.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyResolver;

impl ConflictResolver for StrategyResolver {
    fn resolve<'a>(
        &'a self,
        vcs: &'a dyn VcsBackend,
        workdir: &'a Path,
        conflicts: &'a [String],
        strategy: ConflictStrategy,
    ) -> BoxFuture<'a, Resolution> {
        Box::pin(async move {
            match strategy {
                ConflictStrategy::Auto => {
                    info!(files = ?conflicts, "taking incoming side of conflicted files");
                    vcs.take_incoming(workdir, conflicts).await?;
                    let remaining = vcs.conflicted_files(workdir).await?;
                    if remaining.is_empty() {
                        Ok(Resolution::Resolved)
                    } else {
                        Ok(Resolution::Unresolved(format!(
                            "conflicts remain after taking incoming side: {}",
                            remaining.join(", ")
                        )))
                    }
                }
                ConflictStrategy::Manual => {
                    let remaining = vcs.conflicted_files(workdir).await?;
                    debug!(remaining = remaining.len(), "checking for externally resolved conflicts");
                    if remaining.is_empty() {
                        Ok(Resolution::Resolved)
                    } else {
                        Ok(Resolution::Unresolved(format!(
                            "manual resolution required for: {}",
                            remaining.join(", ")
                        )))
                    }
                }
                ConflictStrategy::Fail => Ok(Resolution::Unresolved(format!(
                    "conflicts in {} and strategy is 'fail'",
                    conflicts.join(", ")
                ))),
            }
        })
    }
}
