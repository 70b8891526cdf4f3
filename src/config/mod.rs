// src/config/mod.rs

//! Configuration loading and validation for dagstack.
//!
//! - `model.rs`: the TOML-backed data model and how it overlays
//!   [`crate::engine::ExecutionOptions`].
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: value sanity checks (`RawConfigFile` -> `ConfigFile`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{DEFAULT_CONFIG_FILE, load_and_validate, load_from_path, load_or_default};
pub use model::{
    AgentSection, ConfigFile, ExecutionSection, GitSection, RawConfigFile, StackSection,
    WorkspaceSection,
};
