// src/dag/mod.rs

//! DAG representation, validation and layering.
//!
//! - [`graph`] holds the task graph (petgraph backed) keyed by task id.
//! - [`validator`] detects structural problems: dangling references,
//!   duplicates, cycles and same-layer file conflicts.
//! - [`layers`] assigns tasks to execution layers and computes parallelism
//!   metrics.

pub mod graph;
pub mod layers;
pub mod validator;

pub use graph::DagGraph;
pub use layers::{DagMetrics, calculate_metrics, compute_layers, layer_indices};
pub use validator::{FileConflict, ValidationReport, detect_conflicts, detect_cycle, validate};
