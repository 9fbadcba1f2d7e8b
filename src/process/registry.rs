// src/process/registry.rs

//! The process registry actor and its cloneable handle.
//!
//! One Tokio task owns the [`RegistryState`] (process table and output
//! buffers). Everything else talks to it through [`RegistryHandle`], which
//! sends [`RegistryCommand`]s over an mpsc channel and awaits oneshot replies,
//! so every key has exactly one writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::model::ConfigFile;
use crate::env::EnvResolver;
use crate::errors::{Result, RunnerError};
use crate::process::events::ControlEvent;
use crate::process::signal::{StopSignal, signal_group};
use crate::process::spawn::{SpawnSpec, spawn_child, supervise};
use crate::process::state::{ExitKind, InstanceId, RegistryState};
use crate::types::{CLEAR_COMMAND, CommandKey, CommandName, SourceName};

const COMMAND_CHANNEL: usize = 256;
const EVENT_CHANNEL: usize = 1024;

/// Result of a successful `run_command`, serialized as
/// `{"status":"started","pid":42}`, `{"status":"alreadyRunning"}` or
/// `{"status":"cleared"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum RunOutcome {
    Started { pid: u32 },
    /// A process for this pair was already registered; nothing was spawned.
    AlreadyRunning,
    /// The reserved `clear` command emptied the source's buffer.
    Cleared,
}

/// One entry of `list()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceSummary {
    pub name: SourceName,
    pub commands: Vec<CommandName>,
}

/// Messages understood by the registry actor.
#[derive(Debug)]
pub enum RegistryCommand {
    Run {
        spec: SpawnSpec,
        reply: oneshot::Sender<Result<RunOutcome>>,
    },
    Stop {
        key: CommandKey,
        reply: oneshot::Sender<bool>,
    },
    IsRunning {
        key: CommandKey,
        reply: oneshot::Sender<bool>,
    },
    GetBuffer {
        source: SourceName,
        reply: oneshot::Sender<String>,
    },
    Clear {
        source: SourceName,
        reply: oneshot::Sender<()>,
    },
    /// Reply once `key` has no registered process.
    WaitExit {
        key: CommandKey,
        reply: oneshot::Sender<()>,
    },
    /// Signal every registered process and reply once all have exited.
    Shutdown { reply: oneshot::Sender<()> },

    // Internal, sent by supervisors and timers.
    Output {
        key: CommandKey,
        chunk: String,
    },
    Exited {
        key: CommandKey,
        instance: InstanceId,
        exit: ExitKind,
    },
    Escalate {
        key: CommandKey,
        instance: InstanceId,
    },
}

/// Cloneable front door to the registry actor.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
    events: broadcast::Sender<ControlEvent>,
    config: Arc<ConfigFile>,
    env: Arc<EnvResolver>,
}

/// Spawn the registry actor for the sources in `config`.
pub fn spawn_registry(config: Arc<ConfigFile>, env: Arc<EnvResolver>) -> RegistryHandle {
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL);
    let (events, _) = broadcast::channel(EVENT_CHANNEL);

    let actor = RegistryActor {
        state: RegistryState::new(config.settings().buffer_size),
        events: events.clone(),
        self_tx: tx.downgrade(),
        stop_grace: config.stop_grace(),
        exit_waiters: HashMap::new(),
        shutdown_waiters: Vec::new(),
    };
    tokio::spawn(actor.run(rx));

    RegistryHandle {
        tx,
        events,
        config,
        env,
    }
}

impl RegistryHandle {
    /// Subscribe to pushed events. Only events emitted after this call are
    /// delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Every configured source with the commands an observer may run.
    pub fn list(&self) -> Vec<SourceSummary> {
        self.config
            .sources()
            .iter()
            .map(|s| SourceSummary {
                name: s.name.clone(),
                commands: s.command_names(),
            })
            .collect()
    }

    /// Start `command` of `source`, or clear its buffer for the reserved
    /// `clear` command.
    pub async fn run_command(&self, source: &str, command: &str) -> Result<RunOutcome> {
        let spec = self
            .config
            .source(source)
            .ok_or_else(|| RunnerError::SourceNotFound(source.to_string()))?;

        if command == CLEAR_COMMAND {
            self.request(|reply| RegistryCommand::Clear {
                source: source.to_string(),
                reply,
            })
            .await?;
            return Ok(RunOutcome::Cleared);
        }

        let argv = spec
            .command_argv(command)
            .ok_or_else(|| RunnerError::CommandNotFound {
                source_name: source.to_string(),
                command: command.to_string(),
            })?
            .to_vec();

        let key = CommandKey::new(source, command);
        if self.is_running(source, command).await? {
            debug!(command = %key, "already running; not spawning again");
            return Ok(RunOutcome::AlreadyRunning);
        }

        let env = self.env.env_for(spec, command).await;
        let spawn = SpawnSpec {
            key,
            argv,
            cwd: spec.working_dir(self.config.root()),
            env,
        };

        self.request(|reply| RegistryCommand::Run { spec: spawn, reply })
            .await?
    }

    /// Ask the process group of `source.command` to terminate.
    ///
    /// Returns `false` (after logging) when nothing is running for a known
    /// pair. The transition to idle is observed later via `status(false)`.
    pub async fn stop_command(&self, source: &str, command: &str) -> Result<bool> {
        if self.config.source(source).is_none() {
            return Err(RunnerError::SourceNotFound(source.to_string()));
        }
        self.request(|reply| RegistryCommand::Stop {
            key: CommandKey::new(source, command),
            reply,
        })
        .await
    }

    pub async fn is_running(&self, source: &str, command: &str) -> Result<bool> {
        self.request(|reply| RegistryCommand::IsRunning {
            key: CommandKey::new(source, command),
            reply,
        })
        .await
    }

    pub async fn get_buffer(&self, source: &str) -> Result<String> {
        if self.config.source(source).is_none() {
            return Err(RunnerError::SourceNotFound(source.to_string()));
        }
        self.request(|reply| RegistryCommand::GetBuffer {
            source: source.to_string(),
            reply,
        })
        .await
    }

    /// Wait until no process is registered for `source.command`.
    pub async fn wait_for_exit(&self, source: &str, command: &str) -> Result<()> {
        self.request(|reply| RegistryCommand::WaitExit {
            key: CommandKey::new(source, command),
            reply,
        })
        .await
    }

    /// Stop the current instance (if any), wait for it to go away, then start
    /// a fresh one.
    pub async fn restart(&self, source: &str, command: &str) -> Result<RunOutcome> {
        if self.stop_command(source, command).await? {
            self.wait_for_exit(source, command).await?;
        }
        self.run_command(source, command).await
    }

    /// Terminate every registered process group and wait for the exits.
    ///
    /// Bounded by the stop grace period plus a small margin for SIGKILL to
    /// land.
    pub async fn shutdown(&self) -> Result<()> {
        let limit = self.config.stop_grace() + Duration::from_secs(2);
        let wait = self.request(|reply| RegistryCommand::Shutdown { reply });
        match tokio::time::timeout(limit, wait).await {
            Ok(res) => res,
            Err(_) => {
                warn!("timed out waiting for managed processes to exit");
                Ok(())
            }
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| RunnerError::RegistryClosed)?;
        rx.await.map_err(|_| RunnerError::RegistryClosed)
    }
}

struct RegistryActor {
    state: RegistryState,
    events: broadcast::Sender<ControlEvent>,
    /// Weak so the actor does not keep its own channel open.
    self_tx: mpsc::WeakSender<RegistryCommand>,
    stop_grace: Duration,
    exit_waiters: HashMap<CommandKey, Vec<oneshot::Sender<()>>>,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl RegistryActor {
    async fn run(mut self, mut rx: mpsc::Receiver<RegistryCommand>) {
        info!("process registry started");

        while let Some(cmd) = rx.recv().await {
            self.handle(cmd);
        }

        // Every handle is gone; nobody can stop these any more.
        for key in self.state.running_keys() {
            self.terminate(&key);
        }
        info!("process registry finished (channel closed)");
    }

    fn handle(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Run { spec, reply } => {
                let _ = reply.send(self.start(spec));
            }
            RegistryCommand::Stop { key, reply } => {
                let _ = reply.send(self.terminate(&key));
            }
            RegistryCommand::IsRunning { key, reply } => {
                let _ = reply.send(self.state.is_running(&key));
            }
            RegistryCommand::GetBuffer { source, reply } => {
                let _ = reply.send(self.state.buffer(&source));
            }
            RegistryCommand::Clear { source, reply } => {
                let event = self.state.clear_buffer(&source);
                self.emit(event);
                let _ = reply.send(());
            }
            RegistryCommand::WaitExit { key, reply } => {
                if self.state.is_running(&key) {
                    self.exit_waiters.entry(key).or_default().push(reply);
                } else {
                    let _ = reply.send(());
                }
            }
            RegistryCommand::Shutdown { reply } => {
                let keys = self.state.running_keys();
                info!(count = keys.len(), "terminating managed processes");
                for key in keys.iter() {
                    self.terminate(key);
                }
                if self.state.is_empty() {
                    let _ = reply.send(());
                } else {
                    self.shutdown_waiters.push(reply);
                }
            }
            RegistryCommand::Output { key, chunk } => {
                let event = self.state.record_output(&key, chunk);
                self.emit(event);
            }
            RegistryCommand::Exited {
                key,
                instance,
                exit,
            } => self.exited(key, instance, exit),
            RegistryCommand::Escalate { key, instance } => {
                if let Some(pid) = self.state.pid_of_instance(&key, instance) {
                    warn!(
                        command = %key,
                        pid,
                        grace = ?self.stop_grace,
                        "process group ignored SIGTERM; sending SIGKILL"
                    );
                    if let Err(e) = signal_group(pid, StopSignal::Kill) {
                        error!(command = %key, pid, error = %e, "failed to kill process group");
                    }
                }
            }
        }
    }

    fn start(&mut self, spec: SpawnSpec) -> Result<RunOutcome> {
        if self.state.is_running(&spec.key) {
            return Ok(RunOutcome::AlreadyRunning);
        }

        let Some(tx) = self.self_tx.upgrade() else {
            return Err(RunnerError::RegistryClosed);
        };

        info!(command = %spec.key, argv = ?spec.argv, cwd = ?spec.cwd, "running command");

        let spawned = spawn_child(&spec).and_then(|child| {
            let pid = child
                .id()
                .ok_or_else(|| anyhow::anyhow!("child exited before its pid was read"))?;
            Ok((child, pid))
        });

        match spawned {
            Ok((child, pid)) => {
                let (instance, event) = self.state.register(spec.key.clone(), pid);
                self.emit(event);
                supervise(child, spec.key, instance, tx);
                Ok(RunOutcome::Started { pid })
            }
            Err(e) => {
                error!(command = %spec.key, error = %e, "failed to spawn command");
                let line = format!("Failed to start {}: {:#}\n", spec.key, e);
                let data = self.state.record_output(&spec.key, line);
                self.emit(data);
                self.emit(ControlEvent::Status {
                    source: spec.key.source.clone(),
                    command: spec.key.command.clone(),
                    running: false,
                });
                Err(RunnerError::Spawn {
                    source_name: spec.key.source,
                    command: spec.key.command,
                    message: format!("{e:#}"),
                })
            }
        }
    }

    /// SIGTERM the group and arm the SIGKILL timer. `false` if nothing is
    /// registered for `key`.
    fn terminate(&mut self, key: &CommandKey) -> bool {
        let Some((pid, instance)) = self.state.mark_stopping(key) else {
            warn!(command = %key, "stop requested but no process is running");
            return false;
        };

        info!(command = %key, pid, "sending SIGTERM to process group");
        if let Err(e) = signal_group(pid, StopSignal::Terminate) {
            warn!(command = %key, pid, error = %e, "failed to signal process group");
        }

        if let Some(tx) = self.self_tx.upgrade() {
            let key = key.clone();
            let grace = self.stop_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let _ = tx.send(RegistryCommand::Escalate { key, instance }).await;
            });
        }
        true
    }

    fn exited(&mut self, key: CommandKey, instance: InstanceId, exit: ExitKind) {
        let Some((process, events)) = self.state.record_exit(&key, instance, exit) else {
            debug!(command = %key, instance, "exit of a replaced instance; ignoring");
            return;
        };

        info!(
            command = %key,
            pid = process.pid,
            exit = ?exit,
            uptime = ?process.started_at.elapsed(),
            "command exited"
        );
        for event in events {
            self.emit(event);
        }

        if let Some(waiters) = self.exit_waiters.remove(&key) {
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
        if self.state.is_empty() {
            for waiter in self.shutdown_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    fn emit(&self, event: ControlEvent) {
        // No observers is fine.
        let _ = self.events.send(event);
    }
}
