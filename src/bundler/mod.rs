// src/bundler/mod.rs

//! The build capability consumed by build workers.
//!
//! A worker asks the [`Bundler`] to compile one source and then listens to
//! the returned event stream:
//!
//! - one [`BuildEvent::BuildEnd`] per successful (re)build,
//! - [`BuildEvent::BuildFailed`] for a failed one,
//! - end of stream once the bundler stops (after the first build in
//!   [`BuildMode::Once`], when the handle is dropped in watch mode).
//!
//! [`CommandBundler`] is the production implementation; tests plug in a
//! fake that never touches the filesystem.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::config::model::SourceConfig;
use crate::errors::Result;
use crate::watch::WatcherHandle;

pub mod command;

pub use command::CommandBundler;

/// Build once and stop, or keep rebuilding on change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Once,
    Watch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    BuildEnd,
    BuildFailed { error: String },
}

/// What to compile.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub source: SourceConfig,
    /// Absolute (or root-joined) entry file.
    pub entry: PathBuf,
    /// Working directory for the build command and the watch root.
    pub cwd: PathBuf,
    pub mode: BuildMode,
}

/// A running compilation.
#[derive(Debug)]
pub struct BuildHandle {
    pub events: mpsc::Receiver<BuildEvent>,
    /// Ask for a rebuild regardless of file changes (dependency rebuilt).
    /// Requests made while one is pending are folded together.
    pub rebuild: mpsc::Sender<()>,
    /// Keeps the file watcher alive for as long as the handle lives.
    pub watcher: Option<WatcherHandle>,
}

pub trait Bundler: Send + Sync {
    fn compile(
        &self,
        request: BuildRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BuildHandle>> + Send + '_>>;
}
