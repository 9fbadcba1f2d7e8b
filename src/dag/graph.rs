// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::config::model::ConfigFile;
use crate::errors::{Result, RunnerError};
use crate::types::SourceName;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies: sources whose first build must finish first.
    deps: Vec<SourceName>,
    /// Direct dependents: sources that list this one in `after`.
    dependents: Vec<SourceName>,
}

/// In-memory dependency graph keyed by source name.
///
/// Unlike a task DAG this may contain cycles; the scheduler is the component
/// that reports them (see [`crate::dag::Scheduler::end_pass`]). Declaration
/// order is kept so that passes start sources deterministically.
#[derive(Debug, Clone)]
pub struct DagGraph {
    order: Vec<SourceName>,
    nodes: HashMap<SourceName, DagNode>,
}

impl DagGraph {
    /// Build a graph from a validated [`ConfigFile`].
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::from_edges(
            cfg.sources()
                .iter()
                .map(|s| (s.name.clone(), s.after.clone())),
        )
    }

    /// Build a graph from `(name, dependencies)` pairs in declaration order.
    ///
    /// Dependencies on names that are not themselves declared are kept as
    /// edges but never get a node, so they can never complete.
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (SourceName, Vec<SourceName>)>,
    {
        let mut order = Vec::new();
        let mut nodes: HashMap<SourceName, DagNode> = HashMap::new();

        for (name, deps) in edges {
            order.push(name.clone());
            nodes.insert(
                name,
                DagNode {
                    deps,
                    dependents: Vec::new(),
                },
            );
        }

        for name in order.iter() {
            let deps = nodes.get(name).map(|n| n.deps.clone()).unwrap_or_default();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(name.clone());
                }
            }
        }

        Self { order, nodes }
    }

    /// Source names in declaration order.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Immediate dependencies of a source (the names in its `after`).
    pub fn dependencies_of(&self, name: &str) -> &[SourceName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a source.
    pub fn dependents_of(&self, name: &str) -> &[SourceName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Restrict the graph to `requested` plus everything they transitively
    /// depend on. Declaration order is preserved.
    pub fn with_dependencies(&self, requested: &[SourceName]) -> Result<DagGraph> {
        let mut keep: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();

        for name in requested {
            if !self.contains(name) {
                return Err(RunnerError::SourceNotFound(name.clone()));
            }
            stack.push(name.as_str());
        }

        while let Some(name) = stack.pop() {
            if !keep.insert(name) {
                continue;
            }
            for dep in self.dependencies_of(name) {
                stack.push(dep.as_str());
            }
        }

        Ok(Self::from_edges(
            self.order
                .iter()
                .filter(|name| keep.contains(name.as_str()))
                .map(|name| (name.clone(), self.dependencies_of(name).to_vec())),
        ))
    }

    /// Members of one dependency cycle, in declaration order, if any exists.
    pub fn find_cycle(&self) -> Option<Vec<SourceName>> {
        // Edge direction: dep -> dependent.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for name in self.order.iter() {
            graph.add_node(name.as_str());
        }
        for name in self.order.iter() {
            for dep in self.dependencies_of(name) {
                if self.contains(dep) {
                    graph.add_edge(dep.as_str(), name.as_str(), ());
                }
            }
        }

        let stuck = match toposort(&graph, None) {
            Ok(_) => return None,
            Err(cycle) => cycle.node_id(),
        };

        let members: HashSet<&str> = tarjan_scc(&graph)
            .into_iter()
            .find(|component| component.len() > 1 && component.contains(&stuck))
            .or_else(|| {
                tarjan_scc(&graph)
                    .into_iter()
                    .find(|component| component.len() > 1)
            })?
            .into_iter()
            .collect();

        Some(
            self.order
                .iter()
                .filter(|name| members.contains(name.as_str()))
                .cloned()
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &[&str])]) -> DagGraph {
        DagGraph::from_edges(edges.iter().map(|(name, deps)| {
            (
                name.to_string(),
                deps.iter().map(|d| d.to_string()).collect(),
            )
        }))
    }

    #[test]
    fn dependents_are_derived_from_after() {
        let g = graph(&[("server", &[]), ("client", &["server"]), ("docs", &["server"])]);
        assert_eq!(g.dependents_of("server"), &["client", "docs"]);
        assert_eq!(g.dependencies_of("client"), &["server"]);
        assert!(g.dependents_of("client").is_empty());
    }

    #[test]
    fn restriction_pulls_in_transitive_dependencies() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]);
        let sub = g.with_dependencies(&["c".to_string()]).unwrap();
        assert_eq!(sub.sources().collect::<Vec<_>>(), vec!["a", "b", "c"]);

        let err = g.with_dependencies(&["nope".to_string()]).unwrap_err();
        assert!(matches!(err, RunnerError::SourceNotFound(name) if name == "nope"));
    }

    #[test]
    fn cycle_members_are_reported() {
        let g = graph(&[("x", &[]), ("a", &["b"]), ("b", &["a"]), ("c", &["a"])]);
        assert_eq!(g.find_cycle(), Some(vec!["a".to_string(), "b".to_string()]));

        let acyclic = graph(&[("a", &[]), ("b", &["a"])]);
        assert_eq!(acyclic.find_cycle(), None);
    }
}
