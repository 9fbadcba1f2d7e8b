// src/process/state.rs

//! Pure bookkeeping for the process registry.
//!
//! No IO happens here: the actor in [`super::registry`] spawns and signals
//! processes and feeds the results into [`RegistryState`], which decides what
//! is registered and which events to emit.

use std::collections::HashMap;
use std::time::Instant;

use crate::process::buffer::OutputBuffer;
use crate::process::events::ControlEvent;
use crate::types::{CommandKey, SourceName};

/// Monotonic id distinguishing successive processes of the same key.
pub type InstanceId = u64;

/// One registered, currently running command.
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    pub key: CommandKey,
    /// Also the process group id (children lead their own group).
    pub pid: u32,
    pub instance: InstanceId,
    pub started_at: Instant,
    /// Set once a termination signal has been sent.
    pub stopping: bool,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Code(i32),
    Signal(i32),
    Unknown,
}

impl ExitKind {
    pub fn describe(&self, key: &CommandKey) -> String {
        match self {
            ExitKind::Code(code) => format!("Command {key} exited with code {code}\n"),
            ExitKind::Signal(sig) => format!("Command {key} was terminated by signal {sig}\n"),
            ExitKind::Unknown => format!("Command {key} exited\n"),
        }
    }
}

#[derive(Debug)]
pub struct RegistryState {
    processes: HashMap<CommandKey, ManagedProcess>,
    buffers: HashMap<SourceName, OutputBuffer>,
    buffer_size: usize,
    next_instance: InstanceId,
}

impl RegistryState {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            processes: HashMap::new(),
            buffers: HashMap::new(),
            buffer_size,
            next_instance: 1,
        }
    }

    pub fn is_running(&self, key: &CommandKey) -> bool {
        self.processes.contains_key(key)
    }

    pub fn get(&self, key: &CommandKey) -> Option<&ManagedProcess> {
        self.processes.get(key)
    }

    /// Keys of every registered process, sorted.
    pub fn running_keys(&self) -> Vec<CommandKey> {
        let mut keys: Vec<_> = self.processes.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Register a freshly spawned process and return its instance id plus the
    /// `status(true)` event.
    pub fn register(&mut self, key: CommandKey, pid: u32) -> (InstanceId, ControlEvent) {
        let instance = self.next_instance;
        self.next_instance += 1;

        let event = ControlEvent::Status {
            source: key.source.clone(),
            command: key.command.clone(),
            running: true,
        };
        self.processes.insert(
            key.clone(),
            ManagedProcess {
                key,
                pid,
                instance,
                started_at: Instant::now(),
                stopping: false,
            },
        );
        (instance, event)
    }

    /// Append output to the source's buffer (created lazily) and return the
    /// unclipped `data` event.
    pub fn record_output(&mut self, key: &CommandKey, chunk: String) -> ControlEvent {
        let buffer_size = self.buffer_size;
        self.buffers
            .entry(key.source.clone())
            .or_insert_with(|| OutputBuffer::new(buffer_size))
            .append(&chunk);

        ControlEvent::Data {
            source: key.source.clone(),
            command: key.command.clone(),
            chunk,
        }
    }

    /// Handle the exit of `instance`.
    ///
    /// Returns the removed entry and the `data` exit line plus `status(false)`
    /// events, or `None` if a newer instance already replaced it. The exit line
    /// is not written to the buffer.
    pub fn record_exit(
        &mut self,
        key: &CommandKey,
        instance: InstanceId,
        exit: ExitKind,
    ) -> Option<(ManagedProcess, [ControlEvent; 2])> {
        if self.processes.get(key).map(|p| p.instance) != Some(instance) {
            return None;
        }
        let process = self.processes.remove(key)?;

        let events = [
            ControlEvent::Data {
                source: key.source.clone(),
                command: key.command.clone(),
                chunk: exit.describe(key),
            },
            ControlEvent::Status {
                source: key.source.clone(),
                command: key.command.clone(),
                running: false,
            },
        ];
        Some((process, events))
    }

    /// Flag the process as stopping and return its pid, if registered.
    pub fn mark_stopping(&mut self, key: &CommandKey) -> Option<(u32, InstanceId)> {
        let process = self.processes.get_mut(key)?;
        process.stopping = true;
        Some((process.pid, process.instance))
    }

    /// Pid of `instance` if that exact instance is still registered.
    pub fn pid_of_instance(&self, key: &CommandKey, instance: InstanceId) -> Option<u32> {
        self.processes
            .get(key)
            .filter(|p| p.instance == instance)
            .map(|p| p.pid)
    }

    /// Current buffer content; empty if the source never produced output.
    pub fn buffer(&self, source: &str) -> String {
        self.buffers
            .get(source)
            .map(|b| b.as_str().to_string())
            .unwrap_or_default()
    }

    pub fn clear_buffer(&mut self, source: &str) -> ControlEvent {
        if let Some(buffer) = self.buffers.get_mut(source) {
            buffer.clear();
        }
        ControlEvent::Clear {
            source: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(source: &str, command: &str) -> CommandKey {
        CommandKey::new(source, command)
    }

    #[test]
    fn register_then_exit_round_trip() {
        let mut state = RegistryState::new(100);
        let k = key("server", "run");

        let (instance, started) = state.register(k.clone(), 4242);
        assert!(state.is_running(&k));
        assert_eq!(
            started,
            ControlEvent::Status {
                source: "server".into(),
                command: "run".into(),
                running: true
            }
        );

        let (process, [line, status]) = state.record_exit(&k, instance, ExitKind::Code(3)).unwrap();
        assert_eq!(process.pid, 4242);
        assert!(!state.is_running(&k));
        assert_eq!(
            line,
            ControlEvent::Data {
                source: "server".into(),
                command: "run".into(),
                chunk: "Command server.run exited with code 3\n".into()
            }
        );
        assert!(matches!(status, ControlEvent::Status { running: false, .. }));
        // Exit line stays out of the buffer.
        assert_eq!(state.buffer("server"), "");
    }

    #[test]
    fn stale_exit_does_not_remove_newer_instance() {
        let mut state = RegistryState::new(100);
        let k = key("server", "run");

        let (old, _) = state.register(k.clone(), 1);
        let (new, _) = state.register(k.clone(), 2);
        assert_ne!(old, new);

        assert!(state.record_exit(&k, old, ExitKind::Signal(15)).is_none());
        assert!(state.is_running(&k));
        assert_eq!(state.pid_of_instance(&k, new), Some(2));
        assert_eq!(state.pid_of_instance(&k, old), None);
    }

    #[test]
    fn output_is_shared_per_source_and_bounded() {
        let mut state = RegistryState::new(6);
        state.record_output(&key("api", "run"), "abcd".into());
        let event = state.record_output(&key("api", "test"), "efgh".into());

        assert_eq!(state.buffer("api"), "cdefgh");
        assert_eq!(
            event,
            ControlEvent::Data {
                source: "api".into(),
                command: "test".into(),
                chunk: "efgh".into()
            }
        );

        assert_eq!(
            state.clear_buffer("api"),
            ControlEvent::Clear {
                source: "api".into()
            }
        );
        assert_eq!(state.buffer("api"), "");
    }

    #[test]
    fn mark_stopping_only_for_registered() {
        let mut state = RegistryState::new(10);
        let k = key("a", "run");
        assert_eq!(state.mark_stopping(&k), None);

        let (instance, _) = state.register(k.clone(), 77);
        assert_eq!(state.mark_stopping(&k), Some((77, instance)));
        assert!(state.get(&k).unwrap().stopping);
    }
}
