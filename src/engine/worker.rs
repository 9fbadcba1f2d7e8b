// src/engine/worker.rs

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::bundler::{BuildEvent, BuildMode, BuildRequest, Bundler};
use crate::config::model::SourceConfig;
use crate::dag::CorrelationId;
use crate::errors::Result;
use crate::process::{RegistryHandle, RunOutcome};
use crate::types::{RUN_COMMAND, SourceName};

/// Sent by a worker to the orchestrator, at most once per worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerSignal {
    /// The first build of the source finished.
    FirstBuild {
        source: SourceName,
        correlation: CorrelationId,
    },
    /// The worker stopped before its first build finished.
    Abandoned {
        source: SourceName,
        correlation: CorrelationId,
        error: String,
    },
}

/// Rebuild request sender of a dependent's worker.
#[derive(Debug, Clone)]
pub struct RebuildLink {
    pub source: SourceName,
    pub tx: mpsc::Sender<()>,
}

/// Compiles one source and, when it is runnable, keeps its `run` process
/// in step with the latest build.
pub struct BuildWorker {
    pub source: SourceConfig,
    pub request: BuildRequest,
    pub correlation: CorrelationId,
    pub bundler: Arc<dyn Bundler>,
    pub registry: RegistryHandle,
    pub signals: mpsc::Sender<WorkerSignal>,
    /// Rebuild requests from the workers of our dependencies.
    pub rebuild_rx: mpsc::Receiver<()>,
    /// Workers of our direct dependents.
    pub dependents: Vec<RebuildLink>,
}

impl std::fmt::Debug for BuildWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildWorker")
            .field("source", &self.source.name)
            .field("correlation", &self.correlation)
            .field("mode", &self.request.mode)
            .finish_non_exhaustive()
    }
}

impl BuildWorker {
    /// Run until the bundler stream ends. An error before the first build
    /// is reported to the orchestrator as an abandoned build.
    pub async fn run(mut self) {
        let source = self.source.name.clone();
        let correlation = self.correlation;
        let signals = self.signals.clone();
        let mut settled = false;

        if let Err(err) = self.run_inner(&mut settled).await {
            error!(source = %source, correlation, error = %err, "build worker stopped");
            if !settled {
                let _ = signals
                    .send(WorkerSignal::Abandoned {
                        source,
                        correlation,
                        error: err.to_string(),
                    })
                    .await;
            }
        }
    }

    async fn run_inner(&mut self, settled: &mut bool) -> Result<()> {
        let name = self.source.name.clone();
        let supervise = self.request.mode == BuildMode::Watch && self.source.is_runnable();

        info!(source = %name, correlation = self.correlation, entry = ?self.request.entry, "build worker started");
        let mut handle = self.bundler.compile(self.request.clone()).await?;
        let mut rebuilds_open = true;

        loop {
            tokio::select! {
                event = handle.events.recv() => match event {
                    Some(BuildEvent::BuildEnd) if !*settled => {
                        *settled = true;
                        self.signals
                            .send(WorkerSignal::FirstBuild {
                                source: name.clone(),
                                correlation: self.correlation,
                            })
                            .await
                            .map_err(|_| anyhow!("orchestrator is gone"))?;
                        if supervise {
                            self.start_process().await;
                        }
                    }
                    Some(BuildEvent::BuildEnd) => {
                        info!(source = %name, "rebuilt");
                        if supervise {
                            self.restart_process().await;
                        }
                        self.notify_dependents();
                    }
                    Some(BuildEvent::BuildFailed { error }) => {
                        // The previous build, and its process, stay in place.
                        warn!(source = %name, first = !*settled, "build failed: {error}");
                    }
                    None if *settled => {
                        debug!(source = %name, "bundler finished");
                        return Ok(());
                    }
                    None => {
                        return Err(anyhow!("bundler stopped before the first build of {name} finished").into());
                    }
                },
                req = self.rebuild_rx.recv(), if rebuilds_open => match req {
                    Some(()) => {
                        debug!(source = %name, "dependency rebuilt; requesting rebuild");
                        let _ = handle.rebuild.try_send(());
                    }
                    None => rebuilds_open = false,
                },
            }
        }
    }

    async fn start_process(&self) {
        let name = &self.source.name;
        match self.registry.run_command(name, RUN_COMMAND).await {
            Ok(RunOutcome::Started { pid }) => info!(source = %name, pid, "process started"),
            Ok(outcome) => debug!(source = %name, ?outcome, "process not started"),
            Err(err) => error!(source = %name, error = %err, "failed to start process"),
        }
    }

    async fn restart_process(&self) {
        let name = &self.source.name;
        match self.registry.restart(name, RUN_COMMAND).await {
            Ok(RunOutcome::Started { pid }) => info!(source = %name, pid, "process restarted"),
            Ok(outcome) => debug!(source = %name, ?outcome, "process not restarted"),
            Err(err) => error!(source = %name, error = %err, "failed to restart process"),
        }
    }

    fn notify_dependents(&self) {
        for link in &self.dependents {
            match link.tx.try_send(()) {
                Ok(()) => debug!(source = %self.source.name, dependent = %link.source, "rebuild requested"),
                // Already pending; the dependent will pick up our output too.
                Err(TrySendError::Full(())) => {}
                Err(TrySendError::Closed(())) => {
                    debug!(dependent = %link.source, "dependent worker is gone")
                }
            }
        }
    }
}
