// src/lib.rs

pub mod bundler;
pub mod cli;
pub mod config;
pub mod control;
pub mod dag;
pub mod engine;
pub mod env;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod process;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::bundler::{BuildMode, Bundler, CommandBundler};
use crate::cli::{CliArgs, Command, RunArgs};
use crate::config::loader::load_and_validate;
use crate::config::model::ConfigFile;
use crate::dag::{DagGraph, Scheduler};
use crate::engine::Orchestrator;
use crate::env::{EnvResolver, load_dotenv};
use crate::errors::RunnerError;
use crate::fs::{FileSystem, RealFileSystem};
use crate::process::{RegistryHandle, spawn_registry};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = Arc::new(load_and_validate(&config_path)?);

    match args.command {
        Command::Check => check(&cfg),
        Command::Clean { sources } => {
            for path in clean_sources(&cfg, &RealFileSystem, &sources)? {
                println!("removed {}", path.display());
            }
            Ok(())
        }
        Command::Build { sources } => build_once(cfg, &sources).await,
        Command::Serve { control_port } => serve_only(cfg, control_port).await,
        Command::Run(run_args) => run_dev(cfg, run_args).await,
    }
}

/// Build, watch, supervise, and serve the control plane until Ctrl-C.
async fn run_dev(cfg: Arc<ConfigFile>, args: RunArgs) -> Result<()> {
    let stop = StopSignal::on_ctrl_c();
    let app_port = args.port.unwrap_or(cfg.settings().app_port);
    let env = EnvResolver::from_config(&cfg, load_env_file(&cfg)?, app_port, !args.no_docker);
    let registry = spawn_registry(Arc::clone(&cfg), Arc::new(env));

    let control = if args.no_control {
        None
    } else {
        let port = args.control_port.unwrap_or(cfg.settings().port);
        let listener = control::bind(port).await?;
        Some(tokio::spawn(control::serve(
            listener,
            registry.clone(),
            stop.wait(),
        )))
    };

    let bundler: Arc<dyn Bundler> = Arc::new(CommandBundler::from_config(&cfg));
    let orchestrator = Orchestrator::new(
        Arc::clone(&cfg),
        DagGraph::from_config(&cfg),
        bundler,
        registry,
        Arc::new(RealFileSystem),
        BuildMode::Watch,
    );
    let result = orchestrator.run(stop.wait()).await;

    // A failed startup must not leave the control plane running.
    stop.trigger();
    if let Some(control) = control {
        match control.await {
            Ok(Err(e)) => warn!(error = %e, "control plane failed"),
            Err(e) => warn!(error = %e, "control plane task panicked"),
            Ok(Ok(())) => {}
        }
    }

    result?;
    Ok(())
}

/// Build the requested sources (plus their dependencies) once.
async fn build_once(cfg: Arc<ConfigFile>, sources: &[String]) -> Result<()> {
    let graph = DagGraph::from_config(&cfg);
    let graph = if sources.is_empty() {
        graph
    } else {
        graph.with_dependencies(sources)?
    };
    let count = graph.len();

    let stop = StopSignal::on_ctrl_c();
    let env = EnvResolver::plain(cfg.settings().app_port);
    let registry = spawn_registry(Arc::clone(&cfg), Arc::new(env));
    let bundler: Arc<dyn Bundler> = Arc::new(CommandBundler::from_config(&cfg));

    Orchestrator::new(
        Arc::clone(&cfg),
        graph,
        bundler,
        registry,
        Arc::new(RealFileSystem),
        BuildMode::Once,
    )
    .run(stop.wait())
    .await?;

    info!(sources = count, "build finished");
    Ok(())
}

/// Control plane only; commands can still be run through it.
async fn serve_only(cfg: Arc<ConfigFile>, control_port: Option<u16>) -> Result<()> {
    let stop = StopSignal::on_ctrl_c();
    let env = EnvResolver::from_config(&cfg, load_env_file(&cfg)?, cfg.settings().app_port, true);
    let registry: RegistryHandle = spawn_registry(Arc::clone(&cfg), Arc::new(env));

    let listener = control::bind(control_port.unwrap_or(cfg.settings().port)).await?;
    control::serve(listener, registry.clone(), stop.wait()).await?;
    registry.shutdown().await?;
    Ok(())
}

/// Validate, then print sources, commands and the build order. A dependency
/// cycle is reported and fails the check.
fn check(cfg: &ConfigFile) -> Result<()> {
    println!("devrunner check");
    println!("  config root = {}", cfg.root().display());
    println!("  control port = {}", cfg.settings().port);
    println!("  buffer size = {}", cfg.settings().buffer_size);
    println!();

    println!("sources ({}):", cfg.sources().len());
    for source in cfg.sources() {
        println!("  - {}", source.name);
        println!("      entry: {}", source.entry.display());
        if let Some(build) = &source.build {
            println!("      build: {build}");
        }
        if !source.after.is_empty() {
            println!("      after: {:?}", source.after);
        }
        if source.is_runnable() {
            println!("      run: {:?}", source.run);
        }
        let commands = source.command_names();
        if !commands.is_empty() {
            println!("      commands: {:?}", commands);
        }
        if source.docker {
            println!("      docker: true");
        }
    }
    println!();

    let graph = DagGraph::from_config(cfg);
    if let Some(cycle) = graph.find_cycle() {
        println!("dependency cycle: {}", cycle.join(" -> "));
        return Err(RunnerError::UnsatisfiableDependencies { waiting: cycle }.into());
    }

    println!("build order:");
    for (i, pass) in Scheduler::simulate(graph)?.iter().enumerate() {
        println!("  pass {}: {}", i + 1, pass.join(", "));
    }
    Ok(())
}

/// Remove `out_dir` and `cache_dir` of the named sources (all when empty).
/// Returns the directories that were targeted.
pub fn clean_sources(cfg: &ConfigFile, fs: &dyn FileSystem, names: &[String]) -> Result<Vec<PathBuf>> {
    let selected: Vec<_> = if names.is_empty() {
        cfg.sources().iter().collect()
    } else {
        names
            .iter()
            .map(|n| cfg.source(n).ok_or_else(|| RunnerError::SourceNotFound(n.clone())))
            .collect::<std::result::Result<_, _>>()?
    };

    let mut removed = Vec::new();
    for source in selected {
        let base = source.working_dir(cfg.root());
        for dir in [&source.out_dir, &source.cache_dir].into_iter().flatten() {
            let path = base.join(dir);
            if fs.exists(&path) {
                fs.remove_dir_all(&path)?;
                info!(source = %source.name, path = ?path, "removed");
                removed.push(path);
            }
        }
    }
    Ok(removed)
}

fn load_env_file(cfg: &ConfigFile) -> Result<Vec<(String, String)>> {
    match &cfg.settings().env_file {
        Some(file) => load_dotenv(&RealFileSystem, &resolve(cfg.root(), file)),
        None => Ok(Vec::new()),
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Process-wide stop flag, set by Ctrl-C or explicitly.
#[derive(Clone)]
struct StopSignal {
    tx: Arc<tokio::sync::watch::Sender<bool>>,
}

impl StopSignal {
    fn on_ctrl_c() -> Self {
        let (tx, _) = tokio::sync::watch::channel(false);
        let signal = Self { tx: Arc::new(tx) };
        let trigger = signal.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Ctrl-C received"),
                Err(e) => {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                    return;
                }
            }
            trigger.trigger();
        });
        signal
    }

    fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Resolves once the flag is set.
    fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.tx.subscribe();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }
}
