// src/config/mod.rs

//! Configuration loading and validation for devrunner.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`), i.e. the source
//!   descriptor set.
//! - Load a config file from disk (`loader.rs`).
//! - Validate names, dependency references and commands (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{config_root_dir, load_and_validate, load_from_path};
pub use model::{ConfigFile, ConfigSection, DefaultSection, RawConfigFile, SourceConfig};
