// src/env/resolver.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::model::{ConfigFile, SourceConfig};
use crate::env::docker::{ComposeCli, PortDiscovery, rewrite_env};
use crate::types::RUN_COMMAND;

/// Builds the extra environment handed to each spawned command.
///
/// Layers, later wins:
/// 1. dotenv variables,
/// 2. docker-derived `<NAME>_URL` / `<NAME>_PORT` values for sources with
///    `docker = true` (discovered once, shared by every caller),
/// 3. `PORT` for the `run` command of runnable sources.
///
/// The orchestrator's own environment is never mutated; children inherit it
/// and get these values on top.
#[derive(Debug)]
pub struct EnvResolver {
    dotenv: Vec<(String, String)>,
    app_port: u16,
    docker_enabled: bool,
    compose_dir: PathBuf,
    discovery: Arc<dyn PortDiscovery>,
    docker: OnceCell<BTreeMap<String, String>>,
}

impl EnvResolver {
    pub fn new(
        dotenv: Vec<(String, String)>,
        app_port: u16,
        docker_enabled: bool,
        compose_dir: impl Into<PathBuf>,
        discovery: Arc<dyn PortDiscovery>,
    ) -> Self {
        Self {
            dotenv,
            app_port,
            docker_enabled,
            compose_dir: compose_dir.into(),
            discovery,
            docker: OnceCell::new(),
        }
    }

    /// Resolver for a loaded config, talking to the real `docker-compose`.
    pub fn from_config(cfg: &ConfigFile, dotenv: Vec<(String, String)>, app_port: u16, docker_enabled: bool) -> Self {
        Self::new(
            dotenv,
            app_port,
            docker_enabled && cfg.settings().docker,
            cfg.root().to_path_buf(),
            Arc::new(ComposeCli),
        )
    }

    /// No dotenv, no docker; `PORT` from `app_port`.
    pub fn plain(app_port: u16) -> Self {
        Self::new(Vec::new(), app_port, false, ".", Arc::new(ComposeCli))
    }

    /// Environment additions for `command` of `source`.
    pub async fn env_for(&self, source: &SourceConfig, command: &str) -> Vec<(String, String)> {
        let mut env: BTreeMap<String, String> = self.dotenv.iter().cloned().collect();

        if source.docker && self.docker_enabled {
            env.extend(self.docker_overlay().await.clone());
        }

        if command == RUN_COMMAND && source.is_runnable() {
            let port = source.port.unwrap_or(self.app_port);
            env.insert("PORT".to_string(), port.to_string());
        }

        env.into_iter().collect()
    }

    /// Discover docker ports once. Concurrent first callers share one
    /// discovery; a failure is logged and leaves the overlay empty.
    pub async fn docker_overlay(&self) -> &BTreeMap<String, String> {
        self.docker
            .get_or_init(|| async {
                let services = match self.discovery.discover(&self.compose_dir).await {
                    Ok(services) => services,
                    Err(e) => {
                        warn!(error = %format!("{e:#}"), "docker port discovery failed; continuing without it");
                        return BTreeMap::new();
                    }
                };

                // What the child would see without the overlay.
                let mut base: BTreeMap<String, String> = std::env::vars().collect();
                base.extend(self.dotenv.iter().cloned());

                let overlay = rewrite_env(&base, &services);
                debug!(count = overlay.len(), "docker environment resolved");
                overlay
            })
            .await
    }
}
