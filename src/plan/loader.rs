// src/plan/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::errors::{DagstackError, Result};
use crate::plan::model::{Plan, PlanDocument};

/// Serialization of a plan document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    Json,
    Toml,
}

impl PlanFormat {
    /// Pick the format from a file extension; anything that is not `.toml`
    /// is treated as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => PlanFormat::Toml,
            _ => PlanFormat::Json,
        }
    }
}

/// Load a plan document from disk.
///
/// This only deserializes; the graph is **not** validated. Run
/// [`crate::dag::validate`] (the engine does) before executing.
pub fn load_plan(path: impl AsRef<Path>) -> Result<Plan> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let plan = parse_plan(&contents, PlanFormat::from_path(path))?;

    debug!(
        path = %path.display(),
        plan = %plan.name,
        tasks = plan.tasks.len(),
        "loaded plan document"
    );

    Ok(plan)
}

/// Parse a plan document from a string.
pub fn parse_plan(contents: &str, format: PlanFormat) -> Result<Plan> {
    let doc: PlanDocument = match format {
        PlanFormat::Json => serde_json::from_str(contents)?,
        PlanFormat::Toml => toml::from_str(contents)?,
    };

    if doc.name.trim().is_empty() {
        return Err(DagstackError::ConfigError(
            "plan document must have a non-empty `name`".to_string(),
        ));
    }

    Ok(Plan::from(doc))
}
