// src/engine/orchestrator.rs

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{Id as TaskId, JoinSet};
use tracing::{debug, info, warn};

use crate::bundler::{BuildMode, BuildRequest, Bundler};
use crate::config::model::ConfigFile;
use crate::dag::{CorrelationId, DagGraph, Scheduler};
use crate::errors::{Result, RunnerError};
use crate::fs::FileSystem;
use crate::process::RegistryHandle;
use crate::types::SourceName;

use super::worker::{BuildWorker, RebuildLink, WorkerSignal};

/// Capacity of each worker's rebuild inbox. One pending request is enough:
/// a rebuild picks up every change made before it starts.
const REBUILD_CHANNEL: usize = 1;

/// Drives the pass scheduler: starts one [`BuildWorker`] per eligible source,
/// waits for every first build of the pass, and repeats until all sources
/// are built.
///
/// In [`BuildMode::Watch`] the workers then keep running until shutdown; in
/// [`BuildMode::Once`] `run` returns as soon as every source is built.
pub struct Orchestrator {
    config: Arc<ConfigFile>,
    scheduler: Scheduler,
    bundler: Arc<dyn Bundler>,
    registry: RegistryHandle,
    fs: Arc<dyn FileSystem>,
    mode: BuildMode,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("scheduler", &self.scheduler)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// `graph` may be a subset of the configured sources (see
    /// [`DagGraph::with_dependencies`]).
    pub fn new(
        config: Arc<ConfigFile>,
        graph: DagGraph,
        bundler: Arc<dyn Bundler>,
        registry: RegistryHandle,
        fs: Arc<dyn FileSystem>,
        mode: BuildMode,
    ) -> Self {
        Self {
            config,
            scheduler: Scheduler::new(graph),
            bundler,
            registry,
            fs,
            mode,
        }
    }

    /// Every source's entry file must exist before anything is built.
    pub fn preflight(&self) -> Result<()> {
        for name in self.scheduler.graph().sources() {
            let source = self
                .config
                .source(name)
                .ok_or_else(|| RunnerError::SourceNotFound(name.to_string()))?;
            let entry = source.entry_path(self.config.root());
            if !self.fs.is_file(&entry) {
                return Err(RunnerError::EntryMissing {
                    source_name: name.to_string(),
                    path: entry,
                });
            }
        }
        Ok(())
    }

    /// Build everything, then (in watch mode) keep going until `shutdown`
    /// resolves. Managed processes are terminated before returning.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.preflight()?;
        tokio::pin!(shutdown);

        let (signals_tx, mut signals_rx) = mpsc::channel::<WorkerSignal>(64);

        // Every worker's rebuild inbox exists up front so early workers can
        // hold links to dependents that start in later passes.
        let mut inboxes: HashMap<SourceName, mpsc::Receiver<()>> = HashMap::new();
        let mut senders: HashMap<SourceName, mpsc::Sender<()>> = HashMap::new();
        for name in self.scheduler.graph().sources() {
            let (tx, rx) = mpsc::channel(REBUILD_CHANNEL);
            senders.insert(name.to_string(), tx);
            inboxes.insert(name.to_string(), rx);
        }

        let mut workers: JoinSet<()> = JoinSet::new();
        let mut running: HashMap<TaskId, (SourceName, CorrelationId)> = HashMap::new();
        let outcome = 'passes: loop {
            if self.scheduler.is_finished() {
                break Ok(());
            }

            let plan = self.scheduler.begin_pass();
            let mut pending: HashSet<CorrelationId> = HashSet::new();

            for build in &plan.started {
                let worker = match self.worker_for(
                    &build.source,
                    build.correlation,
                    &signals_tx,
                    &senders,
                    &mut inboxes,
                ) {
                    Ok(worker) => worker,
                    Err(err) => break 'passes Err(err),
                };
                pending.insert(build.correlation);
                let task = workers.spawn(worker.run());
                running.insert(task.id(), (build.source.clone(), build.correlation));
            }

            let mut stopped = false;
            while !pending.is_empty() {
                // Signals first: a worker that reported before dying must be
                // counted as built.
                tokio::select! {
                    biased;
                    signal = signals_rx.recv() => match signal {
                        Some(WorkerSignal::FirstBuild { source, correlation }) => {
                            pending.remove(&correlation);
                            self.scheduler.complete(correlation);
                            info!(source = %source, pass = plan.pass, "first build completed");
                        }
                        Some(WorkerSignal::Abandoned { source, correlation, error }) => {
                            pending.remove(&correlation);
                            self.scheduler.abandon(correlation);
                            warn!(source = %source, pass = plan.pass, "first build abandoned: {error}");
                        }
                        None => break,
                    },
                    joined = workers.join_next_with_id(), if !workers.is_empty() => match joined {
                        Some(Ok((id, ()))) => {
                            running.remove(&id);
                        }
                        Some(Err(err)) => {
                            if let Some((source, correlation)) = running.remove(&err.id()) {
                                if pending.remove(&correlation) {
                                    self.scheduler.abandon(correlation);
                                    warn!(source = %source, pass = plan.pass, "build worker died before its first build: {err}");
                                } else {
                                    warn!(source = %source, "build worker died: {err}");
                                }
                            }
                        }
                        None => {}
                    },
                    _ = &mut shutdown => {
                        info!(pass = plan.pass, "shutdown requested before all sources were built");
                        stopped = true;
                        break;
                    }
                }
            }
            if stopped {
                break Ok(());
            }

            if self.mode == BuildMode::Once && !self.scheduler.abandoned().is_empty() {
                break Err(RunnerError::BuildFailed {
                    sources: self.scheduler.abandoned().to_vec(),
                });
            }
            if let Err(err) = self.scheduler.end_pass() {
                break Err(err);
            }
        };

        if outcome.is_ok() && self.scheduler.is_finished() {
            info!(sources = self.scheduler.graph().len(), "all sources built");
            if self.mode == BuildMode::Watch {
                shutdown.await;
                info!("shutting down");
            }
        }

        workers.shutdown().await;
        if let Err(err) = self.registry.shutdown().await {
            warn!(error = %err, "registry shutdown failed");
        }
        debug!("orchestrator finished");
        outcome
    }

    fn worker_for(
        &self,
        name: &str,
        correlation: CorrelationId,
        signals: &mpsc::Sender<WorkerSignal>,
        senders: &HashMap<SourceName, mpsc::Sender<()>>,
        inboxes: &mut HashMap<SourceName, mpsc::Receiver<()>>,
    ) -> Result<BuildWorker> {
        let source = self
            .config
            .source(name)
            .ok_or_else(|| RunnerError::SourceNotFound(name.to_string()))?
            .clone();
        let rebuild_rx = inboxes
            .remove(name)
            .ok_or_else(|| RunnerError::Config(format!("source {name} started twice")))?;

        let dependents = self
            .scheduler
            .graph()
            .dependents_of(name)
            .iter()
            .filter_map(|dep| {
                senders.get(dep).map(|tx| RebuildLink {
                    source: dep.clone(),
                    tx: tx.clone(),
                })
            })
            .collect();

        let root = self.config.root();
        let request = BuildRequest {
            entry: source.entry_path(root),
            cwd: source.working_dir(root),
            mode: self.mode,
            source: source.clone(),
        };

        Ok(BuildWorker {
            source,
            request,
            correlation,
            bundler: Arc::clone(&self.bundler),
            registry: self.registry.clone(),
            signals: signals.clone(),
            rebuild_rx,
            dependents,
        })
    }
}
