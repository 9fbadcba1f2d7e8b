#![allow(dead_code)]

use std::path::PathBuf;

use devrunner::config::{ConfigFile, ConfigSection, DefaultSection, RawConfigFile, SourceConfig};
use devrunner::errors::Result;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
    root: Option<PathBuf>,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = ConfigSection::default();
        // Tests never read a dotenv file unless they ask for one.
        config.env_file = None;
        Self {
            config: RawConfigFile {
                config,
                default: DefaultSection::default(),
                source: Vec::new(),
            },
            root: None,
        }
    }

    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.config.source.push(source);
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.config.buffer_size = size;
        self
    }

    pub fn stop_grace(mut self, duration: &str) -> Self {
        self.config.config.stop_grace = duration.to_string();
        self
    }

    pub fn debounce(mut self, duration: &str) -> Self {
        self.config.config.debounce = duration.to_string();
        self
    }

    pub fn app_port(mut self, port: u16) -> Self {
        self.config.config.app_port = port;
        self
    }

    pub fn with_global_watch(mut self, pattern: &str) -> Self {
        self.config.default.watch.push(pattern.to_string());
        self
    }

    pub fn with_global_exclude(mut self, pattern: &str) -> Self {
        self.config.default.exclude.push(pattern.to_string());
        self
    }

    pub fn with_default_use_hash(mut self, val: bool) -> Self {
        self.config.default.use_hash = Some(val);
        self
    }

    /// Directory that relative `cwd`/`entry` paths resolve against.
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        let cfg = ConfigFile::try_from(self.config)?;
        Ok(match self.root {
            Some(root) => cfg.with_root(root),
            None => cfg,
        })
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `SourceConfig`.
pub struct SourceConfigBuilder {
    source: SourceConfig,
}

impl SourceConfigBuilder {
    pub fn new(name: &str, entry: &str) -> Self {
        Self {
            source: SourceConfig::new(name, entry),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.source.after.push(dep.to_string());
        self
    }

    pub fn build_cmd(mut self, cmd: &str) -> Self {
        self.source.build = Some(cmd.to_string());
        self
    }

    pub fn run(mut self, argv: &[&str]) -> Self {
        self.source.run = argv.iter().map(|s| s.to_string()).collect();
        self
    }

    /// `sh -c <script>` as the supervised process.
    pub fn run_sh(self, script: &str) -> Self {
        self.run(&["sh", "-c", script])
    }

    pub fn command(mut self, name: &str, argv: &[&str]) -> Self {
        self.source
            .commands
            .insert(name.to_string(), argv.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Named command running `sh -c <script>`.
    pub fn command_sh(self, name: &str, script: &str) -> Self {
        self.command(name, &["sh", "-c", script])
    }

    pub fn runnable(mut self, val: bool) -> Self {
        self.source.runnable = Some(val);
        self
    }

    pub fn cwd(mut self, cwd: &str) -> Self {
        self.source.cwd = Some(PathBuf::from(cwd));
        self
    }

    pub fn docker(mut self, val: bool) -> Self {
        self.source.docker = val;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.source.port = Some(port);
        self
    }

    pub fn out_dir(mut self, dir: &str) -> Self {
        self.source.out_dir = Some(PathBuf::from(dir));
        self
    }

    pub fn cache_dir(mut self, dir: &str) -> Self {
        self.source.cache_dir = Some(PathBuf::from(dir));
        self
    }

    pub fn watch(mut self, pattern: &str) -> Self {
        self.source
            .watch
            .get_or_insert_with(Vec::new)
            .push(pattern.to_string());
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.source
            .exclude
            .get_or_insert_with(Vec::new)
            .push(pattern.to_string());
        self
    }

    pub fn use_hash(mut self, val: bool) -> Self {
        self.source.use_hash = Some(val);
        self
    }

    pub fn build(self) -> SourceConfig {
        self.source
    }
}
