// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `devrunner`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "devrunner",
    version,
    about = "Build sources in dependency order, supervise them, and control them remotely.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        env = "DEVRUNNER_CONFIG",
        default_value = "Runner.toml"
    )]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DEVRUNNER_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Build and watch every source, supervise runnable ones, and serve the
    /// control plane.
    Run(RunArgs),

    /// Build the given sources (and their dependencies) once, then exit.
    ///
    /// With no arguments every source is built.
    Build {
        #[arg(value_name = "SOURCE")]
        sources: Vec<String>,
    },

    /// Serve the control plane only, without building anything.
    Serve {
        /// Port for the control plane (defaults to `[config].port`).
        #[arg(long, value_name = "N")]
        control_port: Option<u16>,
    },

    /// Parse + validate, print sources and build order, but don't execute
    /// anything.
    Check,

    /// Remove output and cache directories of the given sources (all if none).
    Clean {
        #[arg(value_name = "SOURCE")]
        sources: Vec<String>,
    },
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Port handed to runnable sources as `PORT`.
    #[arg(long, env = "PORT", value_name = "N")]
    pub port: Option<u16>,

    /// Disable docker-compose port discovery.
    #[arg(long)]
    pub no_docker: bool,

    /// Port for the control plane (defaults to `[config].port`).
    #[arg(long, value_name = "N")]
    pub control_port: Option<u16>,

    /// Don't start the control plane.
    #[arg(long)]
    pub no_control: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let args = CliArgs::try_parse_from([
            "devrunner",
            "--config",
            "dev.toml",
            "run",
            "--port",
            "4000",
            "--no-docker",
        ])
        .unwrap();

        assert_eq!(args.config, "dev.toml");
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.port, Some(4000));
                assert!(run.no_docker);
                assert!(!run.no_control);
            }
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn build_accepts_source_list() {
        let args = CliArgs::try_parse_from(["devrunner", "build", "client", "server"]).unwrap();
        match args.command {
            Command::Build { sources } => assert_eq!(sources, vec!["client", "server"]),
            other => panic!("expected build, got {other:?}"),
        }
    }
}
