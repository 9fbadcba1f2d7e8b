// src/errors.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Source {0} not found")]
    SourceNotFound(String),

    #[error("Command {command} not found for source {source_name}")]
    CommandNotFound { source_name: String, command: String },

    #[error("Entry file for source '{source_name}' does not exist: {}", .path.display())]
    EntryMissing { source_name: String, path: PathBuf },

    #[error("Unsatisfiable dependencies; still waiting: {}", .waiting.join(", "))]
    UnsatisfiableDependencies { waiting: Vec<String> },

    #[error("Build failed for: {}", .sources.join(", "))]
    BuildFailed { sources: Vec<String> },

    #[error("Failed to spawn {source_name}.{command}: {message}")]
    Spawn {
        source_name: String,
        command: String,
        message: String,
    },

    #[error("Process registry is no longer running")]
    RegistryClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunnerError>;
