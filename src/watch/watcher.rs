// src/watch/watcher.rs

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::watch::change::ChangeDetector;

/// Keeps the notify watcher alive; dropping it stops watching and ends the
/// change stream.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Watch the detector's root recursively.
///
/// The returned receiver yields one `()` per debounced batch of events that
/// the detector considers a real change. Batches arriving while a signal is
/// still pending are folded into it.
pub fn spawn_source_watcher(
    mut detector: ChangeDetector,
    debounce: Duration,
) -> Result<(WatcherHandle, mpsc::Receiver<()>)> {
    let root = detector.root().to_path_buf();
    let source = detector.profile().source().to_string();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                // The receiver is gone once the source stops; nothing to do.
                let _ = event_tx.send(event);
            }
            Err(err) => warn!(error = %err, "file watch error"),
        },
        Config::default(),
    )?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("watching {:?}", root))?;

    if let Err(err) = detector.prime() {
        warn!(source = %source, error = %format!("{err:#}"), "could not record initial content hash");
    }
    info!(source = %source, root = ?root, patterns = ?detector.profile().patterns(), "watching sources");

    let (changes_tx, changes_rx) = mpsc::channel::<()>(1);
    let detector = Arc::new(Mutex::new(detector));

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let mut touched = watched_paths(&detector, event);
            if touched.is_empty() {
                continue;
            }

            // Settle: keep collecting until the tree is quiet for `debounce`.
            loop {
                match tokio::time::timeout(debounce, event_rx.recv()).await {
                    Ok(Some(event)) => touched.extend(watched_paths(&detector, event)),
                    Ok(None) => return,
                    Err(_) => break,
                }
            }
            touched.sort();
            touched.dedup();
            debug!(source = %source, count = touched.len(), "watched files changed");

            let check = Arc::clone(&detector);
            let rebuild = tokio::task::spawn_blocking(move || match check.lock() {
                Ok(mut d) => d.should_rebuild(&touched),
                Err(_) => true,
            })
            .await
            .unwrap_or(true);

            if !rebuild {
                continue;
            }
            match changes_tx.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Closed(())) => break,
            }
        }
        debug!(source = %source, "watcher loop finished");
    });

    Ok((WatcherHandle { _inner: watcher }, changes_rx))
}

fn watched_paths(detector: &Mutex<ChangeDetector>, event: Event) -> Vec<PathBuf> {
    if matches!(event.kind, EventKind::Access(_)) {
        return Vec::new();
    }
    let Ok(detector) = detector.lock() else {
        return Vec::new();
    };
    event
        .paths
        .into_iter()
        .filter(|p| detector.watched(p).is_some())
        .collect()
}
