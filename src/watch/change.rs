// src/watch/change.rs

//! Decides whether a batch of filesystem events should rebuild a source.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use tracing::{debug, warn};

use crate::fs::FileSystem;
use crate::watch::cache::FileCache;
use crate::watch::hash::{HashStore, compute_aggregate_hash};
use crate::watch::patterns::{SourceWatchProfile, collect_matching_files};

/// Shared between the watchers of all sources.
pub type SharedHashStore = Arc<Mutex<Box<dyn HashStore>>>;

pub struct ChangeDetector {
    root: PathBuf,
    profile: SourceWatchProfile,
    fs: Arc<dyn FileSystem>,
    cache: FileCache,
    store: SharedHashStore,
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("root", &self.root)
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl ChangeDetector {
    pub fn new(
        root: impl Into<PathBuf>,
        profile: SourceWatchProfile,
        fs: Arc<dyn FileSystem>,
        store: SharedHashStore,
    ) -> Self {
        Self {
            root: root.into(),
            profile,
            fs,
            cache: FileCache::new(),
            store,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile(&self) -> &SourceWatchProfile {
        &self.profile
    }

    /// `path` relative to the root, if the profile watches it.
    pub fn watched(&self, path: &Path) -> Option<String> {
        let rel = relative_str(&self.root, path)?;
        self.profile.matches(&rel).then_some(rel)
    }

    /// Record the current content hash so the first edit is compared against
    /// what was just built. No-op without `use_hash`.
    pub fn prime(&mut self) -> Result<()> {
        if !self.profile.use_hash() {
            return Ok(());
        }
        let hash = self.current_hash()?;
        self.lock_store()?.save(self.profile.source(), &hash)
    }

    /// Whether `touched` (absolute paths of watched files) warrants a
    /// rebuild. Without `use_hash` any touch does; otherwise the aggregate
    /// content hash must differ from the stored one. Hashing errors count
    /// as a change.
    pub fn should_rebuild(&mut self, touched: &[PathBuf]) -> bool {
        if touched.is_empty() {
            return false;
        }
        if !self.profile.use_hash() {
            return true;
        }

        for path in touched {
            self.cache.invalidate(path);
        }

        let source = self.profile.source().to_string();
        let result = self.current_hash().and_then(|hash| {
            let mut store = self.lock_store()?;
            if store.load(&source)?.as_deref() == Some(hash.as_str()) {
                return Ok(false);
            }
            store.save(&source, &hash)?;
            Ok(true)
        });

        match result {
            Ok(changed) => {
                if !changed {
                    debug!(source = %source, "content unchanged; skipping rebuild");
                }
                changed
            }
            Err(err) => {
                warn!(source = %source, error = %format!("{err:#}"), "hash check failed; rebuilding anyway");
                true
            }
        }
    }

    fn current_hash(&mut self) -> Result<String> {
        let files = collect_matching_files(self.fs.as_ref(), &self.root, &self.profile)?;
        let mut entries = Vec::with_capacity(files.len());
        for file in &files {
            let hash = self.cache.get_or_compute(self.fs.as_ref(), file)?;
            entries.push((file.as_path(), hash));
        }
        Ok(compute_aggregate_hash(
            entries.iter().map(|(p, h)| (*p, h.as_str())),
        ))
    }

    fn lock_store(&self) -> Result<std::sync::MutexGuard<'_, Box<dyn HashStore>>> {
        self.store.lock().map_err(|_| anyhow!("hash store mutex poisoned"))
    }
}

/// `path` relative to `root` with forward slashes. Falls back to comparing
/// canonical forms, since watchers may report resolved symlinks
/// (`/private/var/...` on macOS).
fn relative_str(root: &Path, path: &Path) -> Option<String> {
    let normalize = |rel: &Path| rel.to_string_lossy().replace('\\', "/");

    if let Ok(rel) = path.strip_prefix(root) {
        return Some(normalize(rel));
    }
    let root = root.canonicalize().ok()?;
    let path = path.canonicalize().ok()?;
    path.strip_prefix(&root).ok().map(normalize)
}
