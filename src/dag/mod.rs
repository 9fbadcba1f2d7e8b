// src/dag/mod.rs

//! Dependency graph and pass scheduling.
//!
//! - [`graph`] holds adjacency between sources and can name a cycle.
//! - [`scheduler`] is the pure pass state machine that decides which sources
//!   may start building and detects unsatisfiable dependency sets.

pub mod graph;
pub mod scheduler;

pub use graph::DagGraph;
pub use scheduler::{BuildState, BuildTask, CorrelationId, PassPlan, Scheduler, StartedBuild};
