// src/state/mod.rs

//! Per-task execution lifecycle.
//!
//! - [`machine`] defines [`TaskState`] and the allowed transitions.
//! - [`record`] holds the mutable [`TaskExecutionRecord`] of one task in one
//!   run; every state change goes through [`TaskExecutionRecord::transition_to`].

pub mod machine;
pub mod record;

pub use machine::{TaskState, TaskStateChange};
pub use record::TaskExecutionRecord;
