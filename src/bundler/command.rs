// src/bundler/command.rs

//! Bundler that runs each source's `build` shell command and, in watch mode,
//! reruns it when watched files change or a rebuild is requested.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::bundler::{BuildEvent, BuildHandle, BuildMode, BuildRequest, Bundler};
use crate::config::model::ConfigFile;
use crate::errors::Result;
use crate::fs::{FileSystem, RealFileSystem};
use crate::watch::{
    ChangeDetector, SharedHashStore, WatchDefaults, build_profile, open_hash_store,
    spawn_source_watcher,
};

/// Lines of build stderr quoted in a failure message.
const FAILURE_TAIL_LINES: usize = 20;

pub struct CommandBundler {
    fs: Arc<dyn FileSystem>,
    defaults: WatchDefaults,
    hashes: SharedHashStore,
    debounce: Duration,
}

impl std::fmt::Debug for CommandBundler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBundler")
            .field("defaults", &self.defaults)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

impl CommandBundler {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        defaults: WatchDefaults,
        hashes: SharedHashStore,
        debounce: Duration,
    ) -> Self {
        Self {
            fs,
            defaults,
            hashes,
            debounce,
        }
    }

    /// Real filesystem, `[default]` watch settings, and the configured hash
    /// store with entries of removed sources pruned.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        let mut store = open_hash_store(cfg.settings().hash_storage_mode, cfg.root());
        let active: Vec<&str> = cfg.sources().iter().map(|s| s.name.as_str()).collect();
        if let Err(e) = store.prune(&active) {
            warn!(error = %format!("{e:#}"), "failed to prune stale hashes");
        }

        Self::new(
            Arc::new(RealFileSystem),
            WatchDefaults::from_section(cfg.defaults()),
            Arc::new(Mutex::new(store)),
            cfg.debounce(),
        )
    }
}

impl Bundler for CommandBundler {
    fn compile(
        &self,
        request: BuildRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BuildHandle>> + Send + '_>> {
        Box::pin(async move {
            let (events_tx, events_rx) = mpsc::channel(16);
            let (rebuild_tx, rebuild_rx) = mpsc::channel(1);

            let (watcher, changes_rx) = match request.mode {
                BuildMode::Once => (None, None),
                BuildMode::Watch => {
                    let profile = build_profile(&self.defaults, &request.source)?;
                    let root = request
                        .cwd
                        .canonicalize()
                        .unwrap_or_else(|_| request.cwd.clone());
                    let detector =
                        ChangeDetector::new(root, profile, Arc::clone(&self.fs), Arc::clone(&self.hashes));
                    let (handle, changes) = spawn_source_watcher(detector, self.debounce)?;
                    (Some(handle), Some(changes))
                }
            };

            tokio::spawn(drive(request, events_tx, rebuild_rx, changes_rx));

            Ok(BuildHandle {
                events: events_rx,
                rebuild: rebuild_tx,
                watcher,
            })
        })
    }
}

/// Build, report, wait for the next trigger, repeat. Ends after the first
/// build in once mode, or when the worker drops its handle.
async fn drive(
    request: BuildRequest,
    events: mpsc::Sender<BuildEvent>,
    mut rebuild_rx: mpsc::Receiver<()>,
    mut changes_rx: Option<mpsc::Receiver<()>>,
) {
    let source = request.source.name.clone();
    let mut round: u64 = 0;

    loop {
        round += 1;
        let event = match run_build(&request).await {
            Ok(()) => BuildEvent::BuildEnd,
            Err(err) => {
                warn!(source = %source, round, error = %format!("{err:#}"), "build failed");
                BuildEvent::BuildFailed {
                    error: format!("{err:#}"),
                }
            }
        };
        if events.send(event).await.is_err() {
            break;
        }
        if request.mode == BuildMode::Once {
            break;
        }

        let trigger = tokio::select! {
            req = rebuild_rx.recv() => req.map(|()| "rebuild requested"),
            change = next_change(&mut changes_rx) => change.map(|()| "files changed"),
        };
        let Some(reason) = trigger else {
            break;
        };
        // Fold a trigger that raced with this one into the same build.
        let _ = rebuild_rx.try_recv();
        info!(source = %source, reason, "rebuilding");
    }

    debug!(source = %source, "bundler stopped");
}

async fn next_change(changes: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_build(request: &BuildRequest) -> anyhow::Result<()> {
    let source = &request.source.name;
    let Some(script) = request.source.build.as_deref() else {
        debug!(source = %source, entry = ?request.entry, "no build command; entry is used as is");
        return Ok(());
    };

    info!(source = %source, cmd = %script, "building");
    let started = Instant::now();

    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script);
        c
    };
    let output = cmd
        .current_dir(&request.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("running build command for source '{source}'"))?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        debug!(source = %source, "build: {}", line);
    }

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(FAILURE_TAIL_LINES)..].join("\n");
        match output.status.code() {
            Some(code) => bail!("build command exited with code {code}\n{tail}"),
            None => bail!("build command was terminated by a signal\n{tail}"),
        }
    }

    info!(
        source = %source,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "build finished"
    );
    Ok(())
}
