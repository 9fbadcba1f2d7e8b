use std::fmt;

use serde::Deserialize;

/// Canonical source name type used throughout the crate.
pub type SourceName = String;

/// Name of a command configured on a source (e.g. `"test"`, `"run"`).
pub type CommandName = String;

/// Reserved command name: clears the output buffer of a source instead of
/// spawning anything.
pub const CLEAR_COMMAND: &str = "clear";

/// Reserved command name under which a runnable source's supervised process is
/// registered.
pub const RUN_COMMAND: &str = "run";

/// Identity of a managed process: one `(source, command)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandKey {
    pub source: SourceName,
    pub command: CommandName,
}

impl CommandKey {
    pub fn new(source: impl Into<SourceName>, command: impl Into<CommandName>) -> Self {
        Self {
            source: source.into(),
            command: command.into(),
        }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.command)
    }
}

/// Mode for storing content hashes used by `use_hash` sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashStorageMode {
    /// Store hashes in a file (`.devrunner/hashes`).
    File,
    /// Store hashes in memory only (lost on restart).
    Memory,
}

impl Default for HashStorageMode {
    fn default() -> Self {
        HashStorageMode::Memory
    }
}
