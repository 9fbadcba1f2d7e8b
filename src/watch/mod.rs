// src/watch/mod.rs

//! Per-source change detection for the command bundler.
//!
//! - Compiling `watch` / `exclude` globs per source.
//! - A `notify` watcher that turns filesystem events into debounced
//!   rebuild signals.
//! - Optional blake3 content hashing (`use_hash`) so touching a file without
//!   changing it doesn't rebuild.

pub mod cache;
pub mod change;
pub mod hash;
pub mod patterns;
pub mod watcher;

pub use change::{ChangeDetector, SharedHashStore};
pub use hash::{
    FileHashStore, HASH_FILE_PATH, HashStore, MemoryHashStore, compute_aggregate_hash,
    compute_file_hash, open_hash_store,
};
pub use patterns::{SourceWatchProfile, WatchDefaults, build_profile, collect_matching_files};
pub use watcher::{WatcherHandle, spawn_source_watcher};
