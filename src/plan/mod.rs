// src/plan/mod.rs

//! Plan model: the task graph handed to the engine.
//!
//! - [`model`] holds the runtime [`Plan`] / [`Task`] types and the on-disk
//!   [`PlanDocument`] shape they are converted from.
//! - [`loader`] reads plan documents from JSON or TOML files.
//!
//! Loading never validates the graph; that is the job of
//! [`crate::dag::validate`].

pub mod loader;
pub mod model;

pub use loader::{load_plan, parse_plan, PlanFormat};
pub use model::{Phase, Plan, PlanDocument, Task, TaskDocument, TaskId};
