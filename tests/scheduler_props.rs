// tests/scheduler_props.rs

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use devrunner::dag::{DagGraph, Scheduler};
use devrunner::errors::RunnerError;

/// Random acyclic graph: `src_i` may only depend on `src_j` with `j < i`.
fn dag_strategy() -> impl Strategy<Value = Vec<(String, Vec<String>)>> {
    (1usize..12).prop_flat_map(|n| {
        proptest::collection::vec(proptest::collection::vec(any::<prop::sample::Index>(), 0..4), n)
            .prop_map(move |picks| {
                picks
                    .into_iter()
                    .enumerate()
                    .map(|(i, deps)| {
                        let mut deps: Vec<String> = if i == 0 {
                            Vec::new()
                        } else {
                            deps.iter().map(|ix| format!("src_{}", ix.index(i))).collect()
                        };
                        deps.sort();
                        deps.dedup();
                        (format!("src_{i}"), deps)
                    })
                    .collect()
            })
    })
}

/// Complete builds in an order chosen by `shuffle`, checking eligibility as
/// we go. Returns the order in which sources started.
fn drive(
    edges: &[(String, Vec<String>)],
    shuffle: &[prop::sample::Index],
) -> Result<Vec<String>, RunnerError> {
    let deps: HashMap<&str, &Vec<String>> =
        edges.iter().map(|(n, d)| (n.as_str(), d)).collect();
    let mut scheduler = Scheduler::new(DagGraph::from_edges(edges.iter().cloned()));
    let mut completed: HashSet<String> = HashSet::new();
    let mut started = Vec::new();
    let mut step = 0usize;

    while !scheduler.is_finished() {
        let plan = scheduler.begin_pass();
        let mut in_flight = plan.started.clone();

        for build in &plan.started {
            for dep in deps[build.source.as_str()] {
                assert!(
                    completed.contains(dep),
                    "{} started before its dependency {}",
                    build.source,
                    dep
                );
            }
            started.push(build.source.clone());
        }

        while !in_flight.is_empty() {
            let pick = shuffle
                .get(step % shuffle.len().max(1))
                .map(|ix| ix.index(in_flight.len()))
                .unwrap_or(0);
            step += 1;
            let build = in_flight.remove(pick);
            let name = scheduler.complete(build.correlation);
            assert_eq!(name.as_deref(), Some(build.source.as_str()));
            completed.insert(build.source);
        }

        scheduler.end_pass()?;
    }

    Ok(started)
}

proptest! {
    #[test]
    fn every_source_builds_once_after_its_dependencies(
        edges in dag_strategy(),
        shuffle in proptest::collection::vec(any::<prop::sample::Index>(), 1..16),
    ) {
        let started = drive(&edges, &shuffle).expect("acyclic graph must schedule");

        let mut sorted = started.clone();
        sorted.sort();
        let mut expected: Vec<String> = edges.iter().map(|(n, _)| n.clone()).collect();
        expected.sort();
        prop_assert_eq!(sorted, expected);
    }

    #[test]
    fn pass_count_matches_longest_chain(edges in dag_strategy()) {
        let passes = Scheduler::simulate(DagGraph::from_edges(edges.iter().cloned()))
            .expect("acyclic graph must schedule");

        // Depth of a source = 1 + max depth of its dependencies.
        let mut depth: HashMap<&str, usize> = HashMap::new();
        for (name, deps) in &edges {
            let d = deps.iter().map(|dep| depth[dep.as_str()]).max().unwrap_or(0) + 1;
            depth.insert(name.as_str(), d);
        }
        let longest = depth.values().copied().max().unwrap_or(0);
        prop_assert_eq!(passes.len(), longest);
    }

    #[test]
    fn back_edge_makes_graph_unsatisfiable(edges in dag_strategy()) {
        let mut edges = edges;
        if edges.len() == 1 {
            edges.push(("src_1".to_string(), Vec::new()));
        }
        let last = edges.len() - 1;
        // src_0 <-> src_last
        edges[0].1.push(format!("src_{last}"));
        if !edges[last].1.contains(&"src_0".to_string()) {
            edges[last].1.push("src_0".to_string());
        }

        match Scheduler::simulate(DagGraph::from_edges(edges.iter().cloned())) {
            Err(RunnerError::UnsatisfiableDependencies { waiting }) => {
                prop_assert!(waiting.contains(&"src_0".to_string()));
            }
            other => prop_assert!(false, "expected unsatisfiable, got {:?}", other),
        }
    }
}
