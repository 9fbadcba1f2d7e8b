// src/logging.rs

//! Diagnostics for the runner itself.
//!
//! Where output goes:
//! - tracing logs (passes, builds, spawns, exits, control clients): stderr.
//! - `check` reports and `clean` removals: stdout.
//! - output of supervised commands: never echoed locally. It lands in the
//!   per-source buffer and is pushed as `data` events to control clients.
//!
//! Filtering comes from `--log-level`, else `DEVRUNNER_LOG` (full `EnvFilter`
//! syntax, e.g. `info,devrunner::process=debug`), else `info`.

use anyhow::{Result, anyhow};
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

const LOG_ENV: &str = "DEVRUNNER_LOG";

/// Install the global subscriber. Call once, before anything logs.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = build_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing log subscriber: {e}"))
}

fn build_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(lvl) = cli_level {
        return EnvFilter::new(level_name(lvl));
    }
    env.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn level_name(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_wins_over_environment() {
        let filter = build_filter(Some(LogLevel::Debug), Some("error"));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn environment_accepts_per_module_directives() {
        let filter = build_filter(None, Some(" devrunner::process=trace "));
        assert!(filter.to_string().contains("devrunner::process=trace"), "{filter}");
    }

    #[test]
    fn blank_or_invalid_environment_falls_back_to_info() {
        assert_eq!(build_filter(None, None).to_string(), "info");
        assert_eq!(build_filter(None, Some("  ")).to_string(), "info");
        assert_eq!(build_filter(None, Some("devrunner=loud")).to_string(), "info");
    }
}
