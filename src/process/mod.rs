// src/process/mod.rs

//! Managed child processes.
//!
//! - [`buffer`]: bounded per-source output buffer.
//! - [`state`]: pure process table + buffers.
//! - [`registry`]: the actor owning that state and its [`RegistryHandle`].
//! - [`spawn`]: starting children and forwarding their output.
//! - [`signal`]: process-group signalling.
//! - [`events`]: events pushed to observers.

pub mod buffer;
pub mod events;
pub mod registry;
pub mod signal;
pub mod spawn;
pub mod state;

pub use buffer::OutputBuffer;
pub use events::ControlEvent;
pub use registry::{RegistryHandle, RunOutcome, SourceSummary, spawn_registry};
pub use state::{ExitKind, ManagedProcess, RegistryState};
