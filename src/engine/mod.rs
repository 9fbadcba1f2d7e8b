// src/engine/mod.rs

//! Build orchestration.
//!
//! The pass scheduling rules live in the pure [`crate::dag::Scheduler`];
//! this module is the async shell around it:
//!
//! - [`orchestrator`] runs the passes, wires rebuild links between workers
//!   and owns shutdown.
//! - [`worker`] drives one source: its bundler stream, its supervised `run`
//!   process, and rebuild requests to dependents.

pub mod orchestrator;
pub mod worker;

pub use orchestrator::Orchestrator;
pub use worker::{BuildWorker, RebuildLink, WorkerSignal};
