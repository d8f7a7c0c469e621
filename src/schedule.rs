//! Validation and scheduling.
//!
//! Both are the same procedure: Kahn's algorithm run over the *distinct*
//! predecessor tasks of every task. Each round extracts every task whose
//! in-degree dropped to zero, sorted by registration index, and that batch is
//! one execution level. Tasks that never reach zero in-degree sit on a cycle or
//! downstream of one; the shortest cycle among them is reported.

use std::collections::VecDeque;

use tracing::debug;

use crate::TaskId;
use crate::error::CycleError;
use crate::graph::Graph;

/// The execution levels of a graph.
///
/// Every task appears in exactly one level, all of its predecessors appear in
/// strictly earlier levels, and within a level tasks keep registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    levels: Vec<Vec<TaskId>>,
}

impl Schedule {
    /// The groups of mutually independent tasks, in execution order.
    pub fn levels(&self) -> &[Vec<TaskId>] {
        &self.levels
    }

    /// The linear execution order, the levels concatenated.
    pub fn order(&self) -> Vec<TaskId> {
        self.levels.iter().flatten().copied().collect()
    }

    pub fn level_of(&self, task: TaskId) -> Option<usize> {
        self.levels.iter().position(|level| level.contains(&task))
    }

    /// Number of tasks scheduled.
    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Computes the schedule of `graph`.
pub fn schedule<G: Send + Sync>(graph: &Graph<G>) -> Result<Schedule, CycleError> {
    let successors: Vec<Vec<usize>> = graph
        .task_ids()
        .map(|id| graph.successors(id).into_iter().map(TaskId::index).collect())
        .collect();

    let levels = levels_or_cycle(&successors, |index| {
        graph
            .task(TaskId(index))
            .map(|task| task.name().to_string())
            .unwrap_or_default()
    })?;

    debug!(levels = levels.len(), tasks = successors.len(), "scheduled task graph");

    Ok(Schedule {
        levels: levels
            .into_iter()
            .map(|level| level.into_iter().map(TaskId).collect())
            .collect(),
    })
}

/// Checks that `graph` is acyclic.
pub fn validate<G: Send + Sync>(graph: &Graph<G>) -> Result<(), CycleError> {
    schedule(graph).map(|_| ())
}

/// Kahn levels over an adjacency list, or the shortest cycle as names.
pub(crate) fn levels_or_cycle(
    successors: &[Vec<usize>],
    name: impl Fn(usize) -> String,
) -> Result<Vec<Vec<usize>>, CycleError> {
    kahn(successors).map_err(|stuck| {
        let cycle = shortest_cycle(successors, &stuck).unwrap_or(stuck);
        CycleError {
            path: cycle.into_iter().map(name).collect(),
        }
    })
}

/// Returns the levels, or the indices that never became ready.
fn kahn(successors: &[Vec<usize>]) -> Result<Vec<Vec<usize>>, Vec<usize>> {
    let successors: Vec<Vec<usize>> = successors
        .iter()
        .map(|next| {
            let mut next = next.clone();
            next.sort_unstable();
            next.dedup();
            next
        })
        .collect();

    let mut in_degree = vec![0usize; successors.len()];
    for next in &successors {
        for &target in next {
            in_degree[target] += 1;
        }
    }

    let mut levels = Vec::new();
    let mut placed = 0;
    let mut ready: Vec<usize> = (0..successors.len())
        .filter(|&index| in_degree[index] == 0)
        .collect();

    while !ready.is_empty() {
        let mut next_ready = Vec::new();

        for &index in &ready {
            for &target in &successors[index] {
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    next_ready.push(target);
                }
            }
        }

        next_ready.sort_unstable();
        placed += ready.len();
        levels.push(std::mem::replace(&mut ready, next_ready));
    }

    if placed == successors.len() {
        Ok(levels)
    } else {
        Err((0..successors.len())
            .filter(|&index| in_degree[index] > 0)
            .collect())
    }
}

/// Shortest cycle through the `stuck` nodes, started at the lowest index
/// among the shortest ones.
fn shortest_cycle(successors: &[Vec<usize>], stuck: &[usize]) -> Option<Vec<usize>> {
    let mut allowed = vec![false; successors.len()];
    for &index in stuck {
        allowed[index] = true;
    }

    let mut best: Option<Vec<usize>> = None;

    for &start in stuck {
        let mut parent = vec![None; successors.len()];
        let mut seen = vec![false; successors.len()];
        let mut queue = VecDeque::from([start]);
        let mut closing = None;
        seen[start] = true;

        'search: while let Some(node) = queue.pop_front() {
            for &next in &successors[node] {
                if !allowed[next] {
                    continue;
                }
                if next == start {
                    closing = Some(node);
                    break 'search;
                }
                if !seen[next] {
                    seen[next] = true;
                    parent[next] = Some(node);
                    queue.push_back(next);
                }
            }
        }

        let Some(last) = closing else {
            continue;
        };

        let mut path = vec![last];
        let mut current = last;
        while let Some(previous) = parent[current] {
            path.push(previous);
            current = previous;
        }
        path.reverse();

        if best.as_ref().is_none_or(|best| path.len() < best.len()) {
            best = Some(path);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{datasets, names, task};

    #[test]
    fn test_independent_tasks_single_level() {
        let [a, b, c] = datasets(["a", "b", "c"]);
        let graph = Graph::build([
            task("t2", &[], &[&c]),
            task("t0", &[], &[&a]),
            task("t1", &[], &[&b]),
        ])
        .unwrap();

        let schedule = graph.schedule().unwrap();
        assert_eq!(names(&graph, schedule.levels()), vec![vec!["t2", "t0", "t1"]]);
        assert_eq!(
            schedule.order(),
            vec![TaskId(0), TaskId(1), TaskId(2)]
        );
    }

    #[test]
    fn test_chain() {
        let [src, x, y, z] = datasets(["src", "x", "y", "z"]);
        let graph = Graph::build([
            task("C", &[&y], &[&z]),
            task("A", &[&src], &[&x]),
            task("B", &[&x], &[&y]),
        ])
        .unwrap();

        let schedule = graph.schedule().unwrap();
        assert_eq!(
            names(&graph, schedule.levels()),
            vec![vec!["A"], vec!["B"], vec!["C"]]
        );
        assert_eq!(
            names(&graph, &[schedule.order()]),
            vec![vec!["A", "B", "C"]]
        );
    }

    #[test]
    fn test_diamond_levels_independent_of_registration() {
        let [src, x, y, b, c, d] = datasets(["src", "x", "y", "b", "c", "d"]);

        for swap in [false, true] {
            let mut tasks = vec![
                task("A", &[&src], &[&x, &y]),
                task("B", &[&x], &[&b]),
                task("C", &[&y], &[&c]),
                task("D", &[&b, &c], &[&d]),
            ];
            if swap {
                tasks.swap(1, 2);
            }

            let graph = Graph::build(tasks).unwrap();
            let schedule = graph.schedule().unwrap();
            let levels = names(&graph, schedule.levels());

            assert_eq!(levels.len(), 3);
            assert_eq!(levels[0], vec!["A"]);
            let mut middle = levels[1].clone();
            middle.sort();
            assert_eq!(middle, vec!["B", "C"]);
            assert_eq!(levels[2], vec!["D"]);
        }
    }

    #[test]
    fn test_repeated_predecessor_counts_once() {
        let [x, y, out] = datasets(["x", "y", "out"]);
        let graph = Graph::build([
            task("A", &[], &[&x, &y]),
            task("B", &[&x, &y], &[&out]),
        ])
        .unwrap();

        assert_eq!(graph.edges().count(), 2);
        let schedule = graph.schedule().unwrap();
        assert_eq!(names(&graph, schedule.levels()), vec![vec!["A"], vec!["B"]]);
    }

    #[test]
    fn test_cycle_reports_path_with_task() {
        let [x, y, z] = datasets(["x", "y", "z"]);
        let graph = Graph::build([
            task("A", &[&z], &[&x]),
            task("B", &[&x], &[&y]),
            task("C", &[&y], &[&z]),
        ])
        .unwrap();

        let err = graph.validate().unwrap_err();
        assert_eq!(err.path, vec!["A", "B", "C"]);
        assert_eq!(graph.schedule().unwrap_err(), err);
    }

    #[test]
    fn test_cycle_is_minimal() {
        // A -> B -> C -> A and B <-> D; the two-task cycle wins.
        let [ab, bc, ca, bd, db, out] = datasets(["ab", "bc", "ca", "bd", "db", "out"]);
        let graph = Graph::build([
            task("A", &[&ca], &[&ab]),
            task("B", &[&ab, &db], &[&bc, &bd]),
            task("C", &[&bc], &[&ca]),
            task("D", &[&bd], &[&db]),
            task("E", &[&ca], &[&out]),
        ])
        .unwrap();

        let err = graph.validate().unwrap_err();
        assert_eq!(err.path, vec!["B", "D"]);
    }

    #[test]
    fn test_self_consumption_is_cycle() {
        let [x] = datasets(["x"]);
        let graph = Graph::build([task("loop", &[&x], &[&x])]).unwrap();

        let err = graph.validate().unwrap_err();
        assert_eq!(err.path, vec!["loop"]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = Graph::<()>::build([]).unwrap();
        let schedule = graph.schedule().unwrap();
        assert!(schedule.is_empty());
        assert!(schedule.order().is_empty());
    }

    #[test]
    fn test_kahn_dedupes_successors() {
        let levels = kahn(&[vec![1, 1], vec![]]).unwrap();
        assert_eq!(levels, vec![vec![0], vec![1]]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        // Acyclic by construction: node i may only point at nodes > i.
        fn dag_strategy(max: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
            (1..=max).prop_flat_map(|n| {
                proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n)
                    .prop_map(move |raw| {
                        raw.into_iter()
                            .enumerate()
                            .map(|(i, targets)| {
                                let span = n - i - 1;
                                if span == 0 {
                                    return vec![];
                                }
                                targets.into_iter().map(|t| i + 1 + t % span).collect()
                            })
                            .collect()
                    })
            })
        }

        proptest! {
            #[test]
            fn levels_respect_edges(successors in dag_strategy(12)) {
                let levels = kahn(&successors).unwrap();

                let mut level_of = vec![usize::MAX; successors.len()];
                for (depth, level) in levels.iter().enumerate() {
                    prop_assert!(level.windows(2).all(|w| w[0] < w[1]));
                    for &index in level {
                        prop_assert_eq!(level_of[index], usize::MAX);
                        level_of[index] = depth;
                    }
                }

                prop_assert!(level_of.iter().all(|&depth| depth != usize::MAX));
                for (source, targets) in successors.iter().enumerate() {
                    for &target in targets {
                        prop_assert!(level_of[source] < level_of[target]);
                    }
                }
            }
        }
    }
}
