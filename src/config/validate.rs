// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{ConfigFile, RawConfigFile, parse_duration};
use crate::errors::{Result, RunnerError};
use crate::types::{CLEAR_COMMAND, RUN_COMMAND};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RunnerError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let stop_grace = parse_duration(&raw.config.stop_grace)
            .map_err(|e| RunnerError::Config(format!("[config].stop_grace: {e}")))?;
        let debounce = parse_duration(&raw.config.debounce)
            .map_err(|e| RunnerError::Config(format!("[config].debounce: {e}")))?;

        Ok(ConfigFile::new_unchecked(
            raw.config,
            raw.default,
            raw.source,
            stop_grace,
            debounce,
        ))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_sources(cfg)?;
    validate_global_config(cfg)?;
    validate_source_names(cfg)?;
    validate_source_dependencies(cfg)?;
    validate_commands(cfg)?;
    Ok(())
}

fn ensure_has_sources(cfg: &RawConfigFile) -> Result<()> {
    if cfg.source.is_empty() {
        return Err(RunnerError::Config(
            "config must contain at least one [[source]] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.buffer_size == 0 {
        return Err(RunnerError::Config(
            "[config].buffer_size must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_source_names(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for source in cfg.source.iter() {
        if source.name.trim().is_empty() {
            return Err(RunnerError::Config(
                "every [[source]] needs a non-empty `name`".to_string(),
            ));
        }
        if !seen.insert(source.name.as_str()) {
            return Err(RunnerError::Config(format!(
                "source '{}' is declared more than once",
                source.name
            )));
        }
    }
    Ok(())
}

fn validate_source_dependencies(cfg: &RawConfigFile) -> Result<()> {
    let names: HashSet<&str> = cfg.source.iter().map(|s| s.name.as_str()).collect();

    for source in cfg.source.iter() {
        for dep in source.after.iter() {
            if dep == &source.name {
                return Err(RunnerError::Config(format!(
                    "source '{}' cannot depend on itself in `after`",
                    source.name
                )));
            }
            if !names.contains(dep.as_str()) {
                return Err(RunnerError::Config(format!(
                    "source '{}' has unknown dependency '{}' in `after`",
                    source.name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_commands(cfg: &RawConfigFile) -> Result<()> {
    for source in cfg.source.iter() {
        if source.is_runnable() && source.run.is_empty() {
            return Err(RunnerError::Config(format!(
                "source '{}' is runnable but has no `run` command",
                source.name
            )));
        }

        for (name, argv) in source.commands.iter() {
            if name == CLEAR_COMMAND {
                return Err(RunnerError::Config(format!(
                    "source '{}': command name '{}' is reserved",
                    source.name, CLEAR_COMMAND
                )));
            }
            if name == RUN_COMMAND && source.is_runnable() {
                return Err(RunnerError::Config(format!(
                    "source '{}': command name '{}' is reserved for runnable sources",
                    source.name, RUN_COMMAND
                )));
            }
            if argv.is_empty() || argv[0].trim().is_empty() {
                return Err(RunnerError::Config(format!(
                    "source '{}': command '{}' has an empty argv",
                    source.name, name
                )));
            }
        }
    }
    Ok(())
}
