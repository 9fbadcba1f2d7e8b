// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::types::{CommandName, HashStorageMode, RUN_COMMAND, SourceName};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// port = 8080
/// buffer_size = 20000
///
/// [default]
/// watch = ["src/**/*"]
///
/// [[source]]
/// name = "server"
/// entry = "src/server/index.ts"
/// run = ["node", "dist/server/index.js"]
///
/// [[source]]
/// name = "client"
/// entry = "src/client/index.html"
/// after = ["server"]
/// ```
///
/// Sources are an array of tables so that declaration order survives
/// deserialization; the scheduler starts eligible sources in that order.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Defaults for `watch`, `exclude`, `use_hash` from `[default]`.
    #[serde(default)]
    pub default: DefaultSection,

    /// All sources from `[[source]]`, in declaration order.
    #[serde(default)]
    pub source: Vec<SourceConfig>,
}

/// A validated configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)` (see
/// `validate.rs`), so holders can rely on unique names, known dependencies and
/// parseable durations.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    config: ConfigSection,
    default: DefaultSection,
    sources: Vec<SourceConfig>,
    stop_grace: Duration,
    debounce: Duration,
    root: PathBuf,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        default: DefaultSection,
        sources: Vec<SourceConfig>,
        stop_grace: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            config,
            default,
            sources,
            stop_grace,
            debounce,
            root: PathBuf::from("."),
        }
    }

    /// Set the project root against which relative paths are resolved.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn settings(&self) -> &ConfigSection {
        &self.config
    }

    pub fn defaults(&self) -> &DefaultSection {
        &self.default
    }

    /// Sources in declaration order.
    pub fn sources(&self) -> &[SourceConfig] {
        &self.sources
    }

    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Grace period between SIGTERM and SIGKILL when stopping a process group.
    pub fn stop_grace(&self) -> Duration {
        self.stop_grace
    }

    /// Quiet period the watcher waits for before rebuilding.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Control plane listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of characters kept per source output buffer.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// `PORT` handed to runnable sources unless overridden per source or on
    /// the command line.
    #[serde(default = "default_app_port")]
    pub app_port: u16,

    /// Global switch for docker-compose port discovery.
    #[serde(default = "default_true")]
    pub docker: bool,

    /// Duration string, e.g. `"5s"`.
    #[serde(default = "default_stop_grace")]
    pub stop_grace: String,

    /// Duration string, e.g. `"100ms"`.
    #[serde(default = "default_debounce")]
    pub debounce: String,

    #[serde(default)]
    pub hash_storage_mode: HashStorageMode,

    /// Optional dotenv file merged into every child's environment.
    #[serde(default = "default_env_file")]
    pub env_file: Option<PathBuf>,
}

fn default_port() -> u16 {
    8080
}

fn default_buffer_size() -> usize {
    20_000
}

fn default_app_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_stop_grace() -> String {
    "5s".to_string()
}

fn default_debounce() -> String {
    "100ms".to_string()
}

fn default_env_file() -> Option<PathBuf> {
    Some(PathBuf::from(".env"))
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            buffer_size: default_buffer_size(),
            app_port: default_app_port(),
            docker: default_true(),
            stop_grace: default_stop_grace(),
            debounce: default_debounce(),
            hash_storage_mode: HashStorageMode::default(),
            env_file: default_env_file(),
        }
    }
}

/// `[default]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultSection {
    /// Default `watch` patterns applied to sources that do not override them.
    #[serde(default)]
    pub watch: Vec<String>,

    /// Default `exclude` patterns applied to sources that do not override them.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Default `use_hash` behaviour; if `None`, the global default is `false`.
    #[serde(default)]
    pub use_hash: Option<bool>,
}

/// One `[[source]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub name: SourceName,

    /// Entry file handed to the bundler, relative to `cwd`.
    pub entry: PathBuf,

    /// Shell command that compiles the entry. Without one, the entry is used
    /// as-is and every change counts as a finished build.
    #[serde(default)]
    pub build: Option<String>,

    /// Working directory for builds and commands, relative to the project root.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Names of sources whose first build must finish before this one starts.
    #[serde(default)]
    pub after: Vec<SourceName>,

    /// Program and arguments of the supervised process.
    #[serde(default)]
    pub run: Vec<String>,

    /// Explicit override; defaults to `run` being non-empty.
    #[serde(default)]
    pub runnable: Option<bool>,

    /// Whether the supervised process needs docker-provided endpoints.
    #[serde(default)]
    pub docker: bool,

    /// Per-source `PORT` override.
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub out_dir: Option<PathBuf>,

    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    #[serde(default)]
    pub watch: Option<Vec<String>>,

    #[serde(default)]
    pub exclude: Option<Vec<String>>,

    #[serde(default)]
    pub append_default_watch: bool,

    #[serde(default)]
    pub append_default_exclude: bool,

    #[serde(default)]
    pub use_hash: Option<bool>,

    /// Named commands an observer may start, e.g. `test = ["npm", "test"]`.
    #[serde(default)]
    pub commands: BTreeMap<CommandName, Vec<String>>,
}

impl SourceConfig {
    /// A source with only a name and an entry file; everything else takes
    /// its TOML default.
    pub fn new(name: impl Into<SourceName>, entry: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            entry: entry.into(),
            build: None,
            cwd: None,
            after: Vec::new(),
            run: Vec::new(),
            runnable: None,
            docker: false,
            port: None,
            out_dir: None,
            cache_dir: None,
            watch: None,
            exclude: None,
            append_default_watch: false,
            append_default_exclude: false,
            use_hash: None,
            commands: BTreeMap::new(),
        }
    }

    pub fn is_runnable(&self) -> bool {
        self.runnable.unwrap_or(!self.run.is_empty())
    }

    pub fn effective_use_hash(&self, default_use_hash: bool) -> bool {
        self.use_hash.unwrap_or(default_use_hash)
    }

    /// Absolute (or root-relative) working directory.
    pub fn working_dir(&self, root: &Path) -> PathBuf {
        match &self.cwd {
            Some(cwd) => root.join(cwd),
            None => root.to_path_buf(),
        }
    }

    pub fn entry_path(&self, root: &Path) -> PathBuf {
        self.working_dir(root).join(&self.entry)
    }

    /// Argv for a named command, including the implicit `run` command of a
    /// runnable source.
    pub fn command_argv(&self, command: &str) -> Option<&[String]> {
        if command == RUN_COMMAND && self.is_runnable() {
            return Some(&self.run);
        }
        self.commands.get(command).map(|argv| argv.as_slice())
    }

    /// Command names exposed to observers.
    pub fn command_names(&self) -> Vec<CommandName> {
        let mut names: Vec<CommandName> = self.commands.keys().cloned().collect();
        if self.is_runnable() {
            names.insert(0, RUN_COMMAND.to_string());
        }
        names
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_accept_known_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("3s"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
    }

    #[test]
    fn source_sections_keep_declaration_order() {
        let raw: RawConfigFile = toml::from_str(
            r#"
[[source]]
name = "zeta"
entry = "z.js"

[[source]]
name = "alpha"
entry = "a.js"
run = ["node", "a.js"]

[source.commands]
test = ["npm", "test"]
"#,
        )
        .unwrap();

        let names: Vec<_> = raw.source.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);

        let alpha = &raw.source[1];
        assert!(alpha.is_runnable());
        assert_eq!(alpha.command_names(), vec!["run", "test"]);
        assert_eq!(
            alpha.command_argv("run"),
            Some(&["node".to_string(), "a.js".to_string()][..])
        );
        assert!(!raw.source[0].is_runnable());
        assert_eq!(raw.source[0].command_argv("run"), None);
    }
}
