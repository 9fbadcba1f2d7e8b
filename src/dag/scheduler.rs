// src/dag/scheduler.rs

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::config::model::ConfigFile;
use crate::dag::graph::DagGraph;
use crate::errors::{Result, RunnerError};
use crate::types::SourceName;

/// Identifier handed to a build worker so its first-build signal can be
/// matched to the task that is waiting for it.
pub type CorrelationId = u64;

/// Per-orchestration state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    /// Not yet started, dependencies outstanding.
    Waiting,
    /// A worker has been started and its first build has not settled.
    Building,
    /// The first build finished; dependents may start.
    Completed,
}

/// The scheduler's mutable view of one source.
#[derive(Debug, Clone)]
pub struct BuildTask {
    pub source: SourceName,
    pub deps: Vec<SourceName>,
    pub state: BuildState,
    pub first_build_completed: bool,
}

/// A build started by [`Scheduler::begin_pass`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedBuild {
    pub source: SourceName,
    pub correlation: CorrelationId,
}

/// What one pass over the queue decided.
#[derive(Debug, Clone)]
pub struct PassPlan {
    /// 1-based pass number.
    pub pass: u32,
    /// Eligible sources, in declaration order.
    pub started: Vec<StartedBuild>,
    /// Sources skipped this pass because a dependency has not completed.
    pub waiting: Vec<SourceName>,
}

/// Pure, IO-free pass scheduler.
///
/// The driver loop is:
///
/// 1. [`begin_pass`](Self::begin_pass) marks every eligible source
///    `Building` and hands out correlation ids.
/// 2. The caller starts one worker per started build and reports each first
///    build with [`complete`](Self::complete) (or
///    [`abandon`](Self::abandon) if the worker died first).
/// 3. [`end_pass`](Self::end_pass) moves the waiting set back into the queue,
///    or fails if no progress is possible.
///
/// Repeat until [`is_finished`](Self::is_finished).
#[derive(Debug)]
pub struct Scheduler {
    graph: DagGraph,
    tasks: HashMap<SourceName, BuildTask>,
    to_process: Vec<SourceName>,
    waiting: Vec<SourceName>,
    completed: HashSet<SourceName>,
    in_flight: HashMap<CorrelationId, SourceName>,
    abandoned: Vec<SourceName>,
    /// Queue length at the start of the current pass.
    pass_queue_len: usize,
    pass: u32,
    next_correlation: CorrelationId,
}

impl Scheduler {
    /// Construct a scheduler over every source of a validated [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(DagGraph::from_config(cfg))
    }

    pub fn new(graph: DagGraph) -> Self {
        let mut tasks = HashMap::new();
        for name in graph.sources() {
            tasks.insert(
                name.to_string(),
                BuildTask {
                    source: name.to_string(),
                    deps: graph.dependencies_of(name).to_vec(),
                    state: BuildState::Waiting,
                    first_build_completed: false,
                },
            );
        }
        let to_process = graph.sources().map(|s| s.to_string()).collect();

        Self {
            graph,
            tasks,
            to_process,
            waiting: Vec::new(),
            completed: HashSet::new(),
            in_flight: HashMap::new(),
            abandoned: Vec::new(),
            pass_queue_len: 0,
            pass: 0,
            next_correlation: 1,
        }
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn state_of(&self, source: &str) -> Option<BuildState> {
        self.tasks.get(source).map(|t| t.state)
    }

    pub fn task(&self, source: &str) -> Option<&BuildTask> {
        self.tasks.get(source)
    }

    pub fn is_completed(&self, source: &str) -> bool {
        self.completed.contains(source)
    }

    /// Sources whose worker died before its first build.
    pub fn abandoned(&self) -> &[SourceName] {
        &self.abandoned
    }

    /// Correlation ids handed out but not yet settled.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// `true` once the queue is empty and nothing is in flight.
    pub fn is_finished(&self) -> bool {
        self.to_process.is_empty() && self.in_flight.is_empty()
    }

    /// Walk the queue once, starting every source whose dependencies have all
    /// completed.
    pub fn begin_pass(&mut self) -> PassPlan {
        self.pass += 1;
        self.pass_queue_len = self.to_process.len();

        let queue = std::mem::take(&mut self.to_process);
        let mut started = Vec::new();

        for name in queue {
            let eligible = self
                .tasks
                .get(&name)
                .map(|task| task.deps.iter().all(|dep| self.completed.contains(dep)))
                .unwrap_or(false);

            if !eligible {
                debug!(source = %name, pass = self.pass, "dependencies outstanding; waiting");
                self.waiting.push(name);
                continue;
            }

            let correlation = self.next_correlation;
            self.next_correlation += 1;

            if let Some(task) = self.tasks.get_mut(&name) {
                task.state = BuildState::Building;
            }
            self.in_flight.insert(correlation, name.clone());
            started.push(StartedBuild {
                source: name,
                correlation,
            });
        }

        info!(
            pass = self.pass,
            started = ?started.iter().map(|s| s.source.as_str()).collect::<Vec<_>>(),
            waiting = ?self.waiting,
            "scheduler: pass planned"
        );

        PassPlan {
            pass: self.pass,
            started,
            waiting: self.waiting.clone(),
        }
    }

    /// Record the first-build signal for `correlation`.
    ///
    /// Returns the source it belonged to, or `None` for an unknown or already
    /// settled id.
    pub fn complete(&mut self, correlation: CorrelationId) -> Option<SourceName> {
        let Some(name) = self.in_flight.remove(&correlation) else {
            warn!(correlation, "completion for unknown correlation id; ignoring");
            return None;
        };

        if let Some(task) = self.tasks.get_mut(&name) {
            task.state = BuildState::Completed;
            task.first_build_completed = true;
        }
        self.completed.insert(name.clone());
        debug!(source = %name, correlation, "first build completed");
        Some(name)
    }

    /// Settle `correlation` without completing it. The task stays `Building`
    /// forever, so its dependents can never become eligible.
    pub fn abandon(&mut self, correlation: CorrelationId) -> Option<SourceName> {
        let name = self.in_flight.remove(&correlation)?;
        warn!(source = %name, correlation, "build abandoned before its first build");
        self.abandoned.push(name.clone());
        Some(name)
    }

    /// Close the current pass.
    ///
    /// Fails with [`RunnerError::UnsatisfiableDependencies`] when the waiting
    /// set is as large as the queue the pass started with, i.e. nothing
    /// became eligible.
    pub fn end_pass(&mut self) -> Result<()> {
        if !self.in_flight.is_empty() {
            warn!(
                pass = self.pass,
                in_flight = self.in_flight.len(),
                "pass closed with unsettled builds"
            );
        }

        if !self.waiting.is_empty() && self.waiting.len() == self.pass_queue_len {
            return Err(RunnerError::UnsatisfiableDependencies {
                waiting: self.waiting.clone(),
            });
        }

        self.to_process = std::mem::take(&mut self.waiting);
        Ok(())
    }

    /// Run every pass with instant completions and return the sources started
    /// in each pass. Used by `check` to print the build order.
    pub fn simulate(graph: DagGraph) -> Result<Vec<Vec<SourceName>>> {
        let mut scheduler = Scheduler::new(graph);
        let mut passes = Vec::new();

        while !scheduler.is_finished() {
            let plan = scheduler.begin_pass();
            for build in plan.started.iter() {
                scheduler.complete(build.correlation);
            }
            scheduler.end_pass()?;
            passes.push(plan.started.into_iter().map(|b| b.source).collect());
        }

        Ok(passes)
    }
}
