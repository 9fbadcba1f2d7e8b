// src/env/docker.rs

//! docker-compose port discovery.
//!
//! Services started by `docker-compose up -d` publish container ports on
//! random host ports. We parse `docker-compose ps` and rewrite connection
//! URLs found in the environment so supervised processes reach the right
//! host port.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info};

/// One published port: `0.0.0.0:<host>-><container>/tcp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

/// A running compose service with at least one published port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DockerService {
    pub name: String,
    pub ports: Vec<PortMapping>,
}

/// Source of running services. Production shells out to `docker-compose`;
/// tests hand in a fixed list.
pub trait PortDiscovery: Send + Sync + std::fmt::Debug {
    fn discover<'a>(
        &'a self,
        cwd: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DockerService>>> + Send + 'a>>;
}

/// Runs `docker-compose up -d` followed by `docker-compose ps`.
#[derive(Debug, Clone, Default)]
pub struct ComposeCli;

impl PortDiscovery for ComposeCli {
    fn discover<'a>(
        &'a self,
        cwd: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DockerService>>> + Send + 'a>> {
        let cwd: PathBuf = cwd.to_path_buf();
        Box::pin(async move {
            info!(cwd = ?cwd, "booting docker-compose services");
            let up = Command::new("docker-compose")
                .args(["up", "-d"])
                .current_dir(&cwd)
                .output()
                .await
                .context("running docker-compose up -d")?;
            if !up.status.success() {
                bail!(
                    "docker-compose up -d failed: {}",
                    String::from_utf8_lossy(&up.stderr).trim()
                );
            }

            let ps = Command::new("docker-compose")
                .arg("ps")
                .current_dir(&cwd)
                .output()
                .await
                .context("running docker-compose ps")?;
            if !ps.status.success() {
                bail!(
                    "docker-compose ps failed: {}",
                    String::from_utf8_lossy(&ps.stderr).trim()
                );
            }

            let services = parse_compose_ps(&String::from_utf8_lossy(&ps.stdout));
            debug!(?services, "docker services discovered");
            Ok(services)
        })
    }
}

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `<project>_<service>_<index>` (compose v1) or `<project>-<service>-<index>` (v2).
    RE.get_or_init(|| Regex::new(r"^(?:[^_\s]+?)[_-](\S+?)[_-]\d+\s").expect("static compose name regex"))
}

fn port_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:[\d.]+|\[::\]|::):(\d+)->(\d+)/\w+").expect("static compose port regex"))
}

fn url_port_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":(\d+)").expect("static url port regex"))
}

/// Parse `docker-compose ps` output. Services without published ports are
/// dropped; IPv4 and IPv6 bindings of the same port are merged.
pub fn parse_compose_ps(output: &str) -> Vec<DockerService> {
    let mut services = Vec::new();

    for line in output.lines().map(str::trim) {
        let Some(caps) = name_regex().captures(line) else {
            continue;
        };
        let name = caps[1].to_string();

        let mut ports: Vec<PortMapping> = Vec::new();
        for p in port_regex().captures_iter(line) {
            let (Ok(host), Ok(container)) = (p[1].parse::<u16>(), p[2].parse::<u16>()) else {
                continue;
            };
            let mapping = PortMapping { host, container };
            if !ports.contains(&mapping) {
                ports.push(mapping);
            }
        }

        if !ports.is_empty() {
            services.push(DockerService { name, ports });
        }
    }

    services
}

/// Environment variable form of a service name: `postgres-test` → `POSTGRES_TEST`.
pub fn env_name(service: &str) -> String {
    service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn tokens(name: &str) -> Vec<String> {
    name.split(['_', '-'])
        .filter(|t| !t.is_empty())
        .map(|t| t.to_ascii_lowercase())
        .collect()
}

/// Among services publishing `container_port`, pick the one whose name shares
/// the longest token prefix with `var_prefix`; ties go to the shorter name.
fn best_service<'a>(
    var_prefix: &str,
    container_port: u16,
    services: &'a [DockerService],
) -> Option<(&'a DockerService, &'a PortMapping)> {
    let wanted = tokens(var_prefix);

    services
        .iter()
        .filter_map(|s| {
            let port = s.ports.iter().find(|p| p.container == container_port)?;
            let have = tokens(&s.name);
            let score = wanted
                .iter()
                .zip(have.iter())
                .take_while(|(a, b)| a == b)
                .count();
            Some((s, port, score, have.len()))
        })
        .max_by(|a, b| a.2.cmp(&b.2).then(b.3.cmp(&a.3)))
        .map(|(s, port, _, _)| (s, port))
}

/// Compute the variables to add to a child's environment.
///
/// - `<SERVICE>_PORT` for every service (first published host port), plus
///   `DATABASE_PORT` for the first service.
/// - Every `<NAME>_URL` in `base` whose port matches a published container
///   port is rewritten to the host port.
pub fn rewrite_env(
    base: &BTreeMap<String, String>,
    services: &[DockerService],
) -> BTreeMap<String, String> {
    let mut overlay = BTreeMap::new();

    if let Some(first) = services.first().and_then(|s| s.ports.first()) {
        overlay.insert("DATABASE_PORT".to_string(), first.host.to_string());
    }
    for service in services {
        if let Some(port) = service.ports.first() {
            overlay.insert(format!("{}_PORT", env_name(&service.name)), port.host.to_string());
        }
    }

    for (key, value) in base {
        let Some(prefix) = key.strip_suffix("_URL") else {
            continue;
        };
        let Some(caps) = url_port_regex().captures(value) else {
            continue;
        };
        let Ok(container_port) = caps[1].parse::<u16>() else {
            continue;
        };
        let Some((service, mapping)) = best_service(prefix, container_port, services) else {
            continue;
        };

        let rewritten = url_port_regex()
            .replace(value, format!(":{}", mapping.host).as_str())
            .into_owned();
        info!(var = %key, service = %service.name, url = %rewritten, "rewrote docker url");
        overlay.insert(key.clone(), rewritten);
    }

    overlay
}
