use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What "executing a task" means for a run. The scheduling algorithm is the
/// same for every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Ask the agent to describe an approach; no files change.
    Plan,
    /// Synthesize completions without invoking the agent.
    DryRun,
    /// Real changes in isolated workspaces, committed per task.
    Execute,
    /// Structural and acceptance checks only.
    Validate,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Execute
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plan" => Ok(ExecutionMode::Plan),
            "dry-run" | "dry_run" | "dryrun" => Ok(ExecutionMode::DryRun),
            "execute" => Ok(ExecutionMode::Execute),
            "validate" => Ok(ExecutionMode::Validate),
            other => Err(format!(
                "invalid mode: {other} (expected plan, dry-run, execute or validate)"
            )),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Plan => "plan",
            ExecutionMode::DryRun => "dry-run",
            ExecutionMode::Execute => "execute",
            ExecutionMode::Validate => "validate",
        };
        f.write_str(s)
    }
}

/// How tasks inside a layer are dispatched.
///
/// - `Serial`: one task at a time.
/// - `Parallel`: every task of a layer at once.
/// - `Phased`: scheduled like `Parallel`; layers are the phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    Serial,
    Parallel,
    Phased,
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        ExecutionStrategy::Parallel
    }
}

impl ExecutionStrategy {
    pub fn is_serial(self) -> bool {
        matches!(self, ExecutionStrategy::Serial)
    }
}

impl FromStr for ExecutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "serial" => Ok(ExecutionStrategy::Serial),
            "parallel" => Ok(ExecutionStrategy::Parallel),
            "phased" => Ok(ExecutionStrategy::Phased),
            other => Err(format!(
                "invalid strategy: {other} (expected serial, parallel or phased)"
            )),
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStrategy::Serial => "serial",
            ExecutionStrategy::Parallel => "parallel",
            ExecutionStrategy::Phased => "phased",
        };
        f.write_str(s)
    }
}

/// Policy applied when replaying a task commit onto the stack conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Take the incoming (task) side of every conflicted file.
    Auto,
    /// Accept only if the conflicts were already resolved outside dagstack.
    Manual,
    /// Never resolve.
    Fail,
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::Auto
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(ConflictStrategy::Auto),
            "manual" => Ok(ConflictStrategy::Manual),
            "fail" => Ok(ConflictStrategy::Fail),
            other => Err(format!(
                "invalid conflict strategy: {other} (expected auto, manual or fail)"
            )),
        }
    }
}

/// What to do when a branch we want to create already exists (typically a
/// leftover from a crashed run).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchCollisionPolicy {
    /// Delete the existing branch and reuse the name.
    Reset,
    /// Pick the first free `name-N` (N >= 2).
    Suffix,
    /// Report the collision as an error.
    Fail,
}

impl Default for BranchCollisionPolicy {
    fn default() -> Self {
        BranchCollisionPolicy::Suffix
    }
}

impl FromStr for BranchCollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reset" => Ok(BranchCollisionPolicy::Reset),
            "suffix" => Ok(BranchCollisionPolicy::Suffix),
            "fail" => Ok(BranchCollisionPolicy::Fail),
            other => Err(format!(
                "invalid collision policy: {other} (expected reset, suffix or fail)"
            )),
        }
    }
}

/// Coarse size tier of a task, as estimated by whoever wrote the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Trivial,
    Small,
    Medium,
    Large,
}

impl Default for Complexity {
    fn default() -> Self {
        Complexity::Medium
    }
}
