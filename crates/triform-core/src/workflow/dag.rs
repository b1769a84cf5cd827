//! Dependency resolution: Kahn's algorithm over the step graph.
//!
//! Steps are modelled as a `petgraph` directed graph with an edge from each
//! prerequisite to its dependent. Each Kahn "wave" (every node whose
//! in-degree reached zero in the previous round) becomes one parallel group.
//! Groups hold arena indices into `WorkflowDefinition::steps` and are sorted
//! by definition order so dispatch is deterministic.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use triform_types::workflow::StepDefinition;

use super::definition::WorkflowError;

/// One parallel group: arena indices of steps dispatchable together.
pub type ParallelGroup = Vec<usize>;

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

fn build_graph(steps: &[StepDefinition]) -> Result<DiGraph<usize, ()>, WorkflowError> {
    let id_to_idx: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    // Node weight is the arena index; node i is step i.
    let mut graph = DiGraph::<usize, ()>::with_capacity(steps.len(), steps.len());
    for i in 0..steps.len() {
        graph.add_node(i);
    }

    for (to_idx, step) in steps.iter().enumerate() {
        let mut seen = HashSet::new();
        for dep in &step.depends_on {
            let from_idx = id_to_idx.get(dep.as_str()).ok_or_else(|| {
                WorkflowError::UnknownDependency(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                ))
            })?;
            if seen.insert(*from_idx) {
                graph.add_edge(NodeIndex::new(*from_idx), NodeIndex::new(to_idx), ());
            }
        }
    }

    Ok(graph)
}

// ---------------------------------------------------------------------------
// Kahn's algorithm
// ---------------------------------------------------------------------------

/// Compute parallel groups for all steps.
///
/// Concatenating the groups yields a valid topological order, and every
/// step's prerequisites sit in a strictly earlier group. Fails with
/// `CycleDetected` naming a step on an actual cycle. O(V + E).
pub fn resolve_groups(steps: &[StepDefinition]) -> Result<Vec<ParallelGroup>, WorkflowError> {
    resolve_remaining(steps, &HashSet::new())
}

/// Compute parallel groups for the steps not in `done`.
///
/// Steps in `done` count as satisfied prerequisites. Used on resume to
/// recompute the schedule over the unexecuted subset.
pub fn resolve_remaining(
    steps: &[StepDefinition],
    done: &HashSet<usize>,
) -> Result<Vec<ParallelGroup>, WorkflowError> {
    let graph = build_graph(steps)?;
    let pending = |i: usize| !done.contains(&i);

    let mut in_degree: Vec<usize> = (0..steps.len())
        .map(|i| {
            graph
                .neighbors_directed(NodeIndex::new(i), Direction::Incoming)
                .filter(|n| pending(n.index()))
                .count()
        })
        .collect();

    let mut wave: Vec<usize> = (0..steps.len())
        .filter(|&i| pending(i) && in_degree[i] == 0)
        .collect();
    let total = (0..steps.len()).filter(|&i| pending(i)).count();
    let mut processed = 0;
    let mut groups = Vec::new();

    while !wave.is_empty() {
        processed += wave.len();
        let mut next = Vec::new();
        for &i in &wave {
            for dependent in graph.neighbors_directed(NodeIndex::new(i), Direction::Outgoing) {
                let d = dependent.index();
                if !pending(d) {
                    continue;
                }
                in_degree[d] -= 1;
                if in_degree[d] == 0 {
                    next.push(d);
                }
            }
        }
        next.sort_unstable();
        groups.push(std::mem::replace(&mut wave, next));
    }

    if processed < total {
        let unresolved: Vec<usize> = (0..steps.len())
            .filter(|&i| pending(i) && in_degree[i] > 0)
            .collect();
        return Err(cycle_error(steps, &graph, &unresolved, &in_degree, &pending));
    }

    Ok(groups)
}

/// Find a concrete cycle inside the unresolved set.
///
/// Every unresolved node still has an unresolved predecessor, so walking
/// predecessors from any of them must revisit a node; the revisited suffix
/// is a cycle.
fn cycle_error(
    steps: &[StepDefinition],
    graph: &DiGraph<usize, ()>,
    unresolved: &[usize],
    in_degree: &[usize],
    pending: &impl Fn(usize) -> bool,
) -> WorkflowError {
    let start = unresolved.first().copied().unwrap_or_default();
    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;

    loop {
        let predecessor = graph
            .neighbors_directed(NodeIndex::new(current), Direction::Incoming)
            .map(|n| n.index())
            .filter(|&p| pending(p) && in_degree[p] > 0)
            .min();
        let Some(p) = predecessor else {
            break;
        };
        if let Some(&at) = position.get(&p) {
            // Walked backwards, so reverse to read in dependency order.
            let mut cycle: Vec<String> = path[at..].iter().map(|&i| steps[i].id.clone()).collect();
            cycle.reverse();
            cycle.push(cycle[0].clone());
            return WorkflowError::CycleDetected {
                step: steps[p].id.clone(),
                cycle,
            };
        }
        position.insert(p, path.len());
        path.push(p);
        current = p;
    }

    WorkflowError::CycleDetected {
        step: steps[start].id.clone(),
        cycle: vec![steps[start].id.clone()],
    }
}

// ---------------------------------------------------------------------------
// Transitive dependency closure
// ---------------------------------------------------------------------------

/// Returns the transitive closure of all dependencies for a given step.
///
/// If `step_id` is not found, returns an empty vec. Terminates on cyclic
/// input.
pub fn get_step_dependencies<'a>(step_id: &str, steps: &'a [StepDefinition]) -> Vec<&'a str> {
    let step_map: HashMap<&str, &StepDefinition> =
        steps.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut visited = HashSet::new();
    let mut stack = vec![step_id];

    while let Some(current) = stack.pop() {
        if let Some(step) = step_map.get(current) {
            for dep in &step.depends_on {
                if visited.insert(dep.as_str()) {
                    stack.push(dep.as_str());
                }
            }
        }
    }

    visited.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use triform_types::tool::ErrorClass;

    /// Helper: build a step with given ID and dependencies.
    fn step(id: &str, depends_on: Vec<&str>) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            name: None,
            tool: "data.literal".to_string(),
            tool_version: None,
            inputs: BTreeMap::new(),
            depends_on: depends_on.into_iter().map(String::from).collect(),
            optional: false,
            timeout_secs: None,
            retry: None,
            on_error_status: ErrorClass::Fatal,
            options: serde_json::Value::Null,
        }
    }

    fn ids(steps: &[StepDefinition], groups: &[ParallelGroup]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|g| g.iter().map(|&i| steps[i].id.clone()).collect())
            .collect()
    }

    /// Every prerequisite must sit in a strictly earlier group.
    fn assert_valid_order(steps: &[StepDefinition], groups: &[ParallelGroup]) {
        let mut group_of = HashMap::new();
        for (g, members) in groups.iter().enumerate() {
            for &i in members {
                assert!(group_of.insert(steps[i].id.as_str(), g).is_none(), "step listed twice");
            }
        }
        assert_eq!(group_of.len(), steps.len(), "every step scheduled");
        for s in steps {
            for dep in &s.depends_on {
                assert!(
                    group_of[dep.as_str()] < group_of[s.id.as_str()],
                    "{} must run after {}",
                    s.id,
                    dep
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Group computation
    // -----------------------------------------------------------------------

    #[test]
    fn test_no_dependencies_single_group() {
        let steps = vec![step("a", vec![]), step("b", vec![]), step("c", vec![])];
        let groups = resolve_groups(&steps).unwrap();
        assert_eq!(groups, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_linear_chain() {
        let steps = vec![step("a", vec![]), step("b", vec!["a"]), step("c", vec!["b"])];
        let groups = resolve_groups(&steps).unwrap();
        assert_eq!(ids(&steps, &groups), vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_two_roots_then_join() {
        let steps = vec![step("a", vec![]), step("b", vec![]), step("c", vec!["a", "b"])];
        let groups = resolve_groups(&steps).unwrap();
        assert_eq!(ids(&steps, &groups), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn test_diamond() {
        let steps = vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            step("c", vec!["a"]),
            step("d", vec!["b", "c"]),
        ];
        let groups = resolve_groups(&steps).unwrap();
        assert_eq!(ids(&steps, &groups), vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_groups_follow_definition_order() {
        let steps = vec![step("z", vec!["y"]), step("y", vec![]), step("x", vec![])];
        let groups = resolve_groups(&steps).unwrap();
        assert_eq!(groups, vec![vec![1, 2], vec![0]]);
    }

    #[test]
    fn test_duplicate_dependency_entries() {
        let steps = vec![step("a", vec![]), step("b", vec!["a", "a"])];
        let groups = resolve_groups(&steps).unwrap();
        assert_eq!(groups, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_empty_steps() {
        assert!(resolve_groups(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_random_dags_yield_valid_orders() {
        // Deterministic LCG so failures are reproducible.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };
        for _ in 0..200 {
            let n = 1 + next() % 12;
            let names: Vec<String> = (0..n).map(|i| format!("s{i}")).collect();
            let mut steps: Vec<StepDefinition> = Vec::new();
            for i in 0..n {
                // Only depend on lower-numbered steps: guaranteed acyclic.
                let deps: Vec<&str> = (0..i)
                    .filter(|_| next() % 3 == 0)
                    .map(|j| names[j].as_str())
                    .collect();
                steps.push(step(&names[i], deps));
            }
            // Shuffle definition order.
            for i in (1..steps.len()).rev() {
                let j = next() % (i + 1);
                steps.swap(i, j);
            }
            let groups = resolve_groups(&steps).unwrap();
            assert_valid_order(&steps, &groups);
        }
    }

    // -----------------------------------------------------------------------
    // Cycles
    // -----------------------------------------------------------------------

    #[test]
    fn test_cycle_detected_names_cycle_member() {
        let steps = vec![step("a", vec!["b"]), step("b", vec!["a"])];
        let err = resolve_groups(&steps).unwrap_err();
        match err {
            WorkflowError::CycleDetected { step, cycle } => {
                assert!(step == "a" || step == "b");
                assert_eq!(cycle.first(), cycle.last());
                assert_eq!(cycle.len(), 3);
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_member_not_downstream_bystander() {
        // d depends on the cycle but is not part of it.
        let steps = vec![
            step("d", vec!["c"]),
            step("a", vec![]),
            step("b", vec!["a", "c"]),
            step("c", vec!["b"]),
        ];
        let err = resolve_groups(&steps).unwrap_err();
        match err {
            WorkflowError::CycleDetected { step, cycle } => {
                assert!(step == "b" || step == "c", "got {step}");
                assert!(!cycle.contains(&"d".to_string()));
                assert!(!cycle.contains(&"a".to_string()));
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_self_loop() {
        let steps = vec![step("a", vec!["a"])];
        let err = resolve_groups(&steps).unwrap_err();
        assert!(err.to_string().contains("cycle detected involving step 'a'"));
    }

    #[test]
    fn test_unknown_dependency() {
        let steps = vec![step("a", vec!["ghost"])];
        let err = resolve_groups(&steps).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownDependency(_)));
    }

    // -----------------------------------------------------------------------
    // Remaining subset (resume)
    // -----------------------------------------------------------------------

    #[test]
    fn test_resolve_remaining_skips_done() {
        let steps = vec![
            step("a", vec![]),
            step("b", vec![]),
            step("c", vec!["a", "b"]),
            step("d", vec!["c"]),
        ];
        let done = HashSet::from([0, 1]);
        let groups = resolve_remaining(&steps, &done).unwrap();
        assert_eq!(ids(&steps, &groups), vec![vec!["c"], vec!["d"]]);
    }

    #[test]
    fn test_resolve_remaining_partial_group() {
        let steps = vec![step("a", vec![]), step("b", vec![]), step("c", vec!["a", "b"])];
        let done = HashSet::from([0]);
        let groups = resolve_remaining(&steps, &done).unwrap();
        assert_eq!(ids(&steps, &groups), vec![vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_resolve_remaining_all_done() {
        let steps = vec![step("a", vec![])];
        let groups = resolve_remaining(&steps, &HashSet::from([0])).unwrap();
        assert!(groups.is_empty());
    }

    // -----------------------------------------------------------------------
    // Transitive closure
    // -----------------------------------------------------------------------

    #[test]
    fn test_get_step_dependencies() {
        let steps = vec![
            step("a", vec![]),
            step("b", vec!["a"]),
            step("c", vec!["b"]),
        ];
        let mut deps = get_step_dependencies("c", &steps);
        deps.sort();
        assert_eq!(deps, vec!["a", "b"]);
        assert!(get_step_dependencies("missing", &steps).is_empty());
    }
}
