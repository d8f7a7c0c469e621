//! Dependency inference.
//!
//! Tasks never name each other. A consumer is wired to a producer when one of
//! its input bindings refers to a dataset the producer declares as output.
//! [`Graph::build`] derives those edges in two passes over the tasks, in
//! registration order:
//!
//! 1. the producer pass maps every output dataset to the task producing it,
//! 2. the edge pass looks up the producer of each input binding.
//!
//! Inputs without a producer are boundary inputs and must be supplied by the
//! caller when running.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Display;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::TaskId;
use crate::dataset::{DatasetId, DatasetRef};
use crate::error::{CycleError, DuplicateProducerError};
use crate::schedule::Schedule;
use crate::task::Task;

/// Edge weight: which dataset flows, and into which consumer parameter.
#[derive(Debug, Clone)]
struct Binding {
    dataset: DatasetRef,
    param: String,
}

/// A derived producer to consumer relation.
#[derive(Debug, Clone, Copy)]
pub struct Edge<'a> {
    pub producer: TaskId,
    pub consumer: TaskId,
    pub dataset: &'a DatasetRef,
    pub param: &'a str,
}

/// Where a dataset is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Producer {
    pub task: TaskId,
    /// Position among the task's output bindings.
    pub position: usize,
}

/// The tasks and the edges inferred between them.
///
/// Node `i` of the inner graph is the task registered `i`-th, so a [`TaskId`]
/// doubles as the node index.
pub struct Graph<G: Send + Sync = ()> {
    graph: DiGraph<Task<G>, Binding>,
    producers: HashMap<DatasetId, Producer>,
    boundary: Vec<DatasetRef>,
}

impl<G: Send + Sync> Graph<G> {
    /// Builds the graph out of `tasks`, keeping their order.
    pub fn build(tasks: impl IntoIterator<Item = Task<G>>) -> Result<Self, DuplicateProducerError> {
        let mut graph = DiGraph::new();
        let mut producers: HashMap<DatasetId, Producer> = HashMap::new();

        for task in tasks {
            let index = graph.add_node(task);
            let task = &graph[index];

            for (position, dataset) in task.outputs().iter().enumerate() {
                if let Some(first) = producers.get(&dataset.id()) {
                    return Err(DuplicateProducerError {
                        dataset: dataset.name().to_string(),
                        first: graph[NodeIndex::new(first.task.0)].name().to_string(),
                        second: task.name().to_string(),
                    });
                }

                producers.insert(
                    dataset.id(),
                    Producer {
                        task: TaskId(index.index()),
                        position,
                    },
                );
            }
        }

        let mut edges = Vec::new();
        let mut boundary = Vec::new();
        let mut seen = HashSet::new();

        for consumer in graph.node_indices() {
            for (param, dataset) in graph[consumer].inputs() {
                match producers.get(&dataset.id()) {
                    Some(producer) => edges.push((
                        NodeIndex::new(producer.task.0),
                        consumer,
                        Binding {
                            dataset: dataset.clone(),
                            param: param.to_string(),
                        },
                    )),
                    None => {
                        if seen.insert(dataset.id()) {
                            boundary.push(dataset.clone());
                        }
                    }
                }
            }
        }

        for (producer, consumer, binding) in edges {
            graph.add_edge(producer, consumer, binding);
        }

        debug!(
            tasks = graph.node_count(),
            edges = graph.edge_count(),
            boundary = boundary.len(),
            "built task graph"
        );

        Ok(Self {
            graph,
            producers,
            boundary,
        })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn task(&self, id: TaskId) -> Option<&Task<G>> {
        self.graph.node_weight(NodeIndex::new(id.0))
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + use<G> {
        (0..self.graph.node_count()).map(TaskId)
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = (TaskId, &Task<G>)> {
        self.graph
            .node_indices()
            .map(|index| (TaskId(index.index()), &self.graph[index]))
    }

    /// Edges in insertion order: consumer registration order, then input
    /// binding order within the consumer.
    pub fn edges(&self) -> impl Iterator<Item = Edge<'_>> {
        self.graph.raw_edges().iter().map(|edge| Edge {
            producer: TaskId(edge.source().index()),
            consumer: TaskId(edge.target().index()),
            dataset: &edge.weight.dataset,
            param: &edge.weight.param,
        })
    }

    pub fn producer_of(&self, dataset: impl AsRef<DatasetRef>) -> Option<Producer> {
        self.producers.get(&dataset.as_ref().id()).copied()
    }

    /// Datasets read by some task but produced by none, in first-seen order.
    pub fn boundary_inputs(&self) -> &[DatasetRef] {
        &self.boundary
    }

    /// Distinct tasks `id` reads from, sorted by registration index.
    pub fn predecessors(&self, id: TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Distinct tasks reading from `id`, sorted by registration index.
    pub fn successors(&self, id: TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: TaskId, direction: Direction) -> Vec<TaskId> {
        self.graph
            .neighbors_directed(NodeIndex::new(id.0), direction)
            .map(|index| TaskId(index.index()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Checks that the graph is acyclic.
    pub fn validate(&self) -> Result<(), CycleError> {
        crate::schedule::validate(self)
    }

    /// Computes the execution levels and order.
    pub fn schedule(&self) -> Result<Schedule, CycleError> {
        crate::schedule::schedule(self)
    }

    pub fn order(&self) -> Result<Vec<TaskId>, CycleError> {
        self.schedule().map(|schedule| schedule.order())
    }

    pub fn levels(&self) -> Result<Vec<Vec<TaskId>>, CycleError> {
        self.schedule().map(|schedule| schedule.levels().to_vec())
    }
}

impl<G: Send + Sync> Clone for Graph<G> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            producers: self.producers.clone(),
            boundary: self.boundary.clone(),
        }
    }
}

impl<G: Send + Sync> std::fmt::Debug for Graph<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("tasks", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .field("boundary", &self.boundary)
            .finish()
    }
}

/// Renders the graph as a Mermaid flowchart.
impl<G: Send + Sync> Display for Graph<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for (index, dataset) in self.boundary.iter().enumerate() {
            let name = dataset.name().replace('"', "\\\"");
            writeln!(f, "    in{index}([\"{name}\"])")?;
        }

        for (id, task) in self.tasks() {
            let name = task.name().replace('"', "\\\"");
            writeln!(f, "    {id}[\"{name}\"]")?;
        }

        let boundary: HashMap<DatasetId, usize> = self
            .boundary
            .iter()
            .enumerate()
            .map(|(index, dataset)| (dataset.id(), index))
            .collect();

        for (id, task) in self.tasks() {
            let mut linked = BTreeSet::new();
            for (_, input) in task.inputs() {
                if let Some(&index) = boundary.get(&input.id())
                    && linked.insert(index)
                {
                    writeln!(f, "    in{index} --> {id}")?;
                }
            }
        }

        for edge in self.edges() {
            let label = edge
                .dataset
                .name()
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            writeln!(
                f,
                "    {} -- \"{}\" --> {}",
                edge.producer, label, edge.consumer
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{datasets, task};

    #[test]
    fn test_edges_follow_shared_datasets() {
        let [src, x, y, z] = datasets(["src", "x", "y", "z"]);
        let graph = Graph::build([
            task("A", &[&src], &[&x]),
            task("B", &[&x], &[&y]),
            task("C", &[&x, &y], &[&z]),
        ])
        .unwrap();

        let edges: Vec<_> = graph
            .edges()
            .map(|e| (e.producer.index(), e.consumer.index(), e.dataset.name().to_string(), e.param.to_string()))
            .collect();

        assert_eq!(
            edges,
            vec![
                (0, 1, "x".to_string(), "x".to_string()),
                (0, 2, "x".to_string(), "x".to_string()),
                (1, 2, "y".to_string(), "y".to_string()),
            ]
        );
        assert_eq!(graph.predecessors(TaskId(2)), vec![TaskId(0), TaskId(1)]);
        assert_eq!(graph.successors(TaskId(0)), vec![TaskId(1), TaskId(2)]);
    }

    #[test]
    fn test_boundary_inputs() {
        let [src, extra, x] = datasets(["src", "extra", "x"]);
        let graph = Graph::build([
            task("A", &[&src], &[&x]),
            task("B", &[&x, &src, &extra], &[]),
        ])
        .unwrap();

        assert_eq!(graph.boundary_inputs(), &[src.clone(), extra.clone()]);
        assert_eq!(graph.producer_of(&x), Some(Producer { task: TaskId(0), position: 0 }));
        assert_eq!(graph.producer_of(&src), None);
    }

    #[test]
    fn test_output_positions() {
        let [x, y] = datasets(["x", "y"]);
        let graph = Graph::build([task("split", &[], &[&x, &y])]).unwrap();
        assert_eq!(graph.producer_of(&y).map(|p| p.position), Some(1));
    }

    #[test]
    fn test_duplicate_producer_names_both() {
        let [x] = datasets(["x"]);
        let err = Graph::build([
            task("first", &[], &[&x]),
            task("other", &[], &[]),
            task("second", &[], &[&x]),
        ])
        .unwrap_err();

        assert_eq!(
            err,
            DuplicateProducerError {
                dataset: "x".into(),
                first: "first".into(),
                second: "second".into(),
            }
        );
    }

    #[test]
    fn test_same_name_datasets_do_not_connect() {
        let x1 = crate::Dataset::<()>::new("x");
        let x2 = crate::Dataset::<()>::new("x");
        let graph = Graph::build([
            task("A", &[], &[x1.erased()]),
            task("B", &[x2.erased()], &[]),
        ])
        .unwrap();

        assert_eq!(graph.edges().count(), 0);
        assert_eq!(graph.boundary_inputs(), &[x2.erased().clone()]);
    }

    #[test]
    fn test_mermaid() {
        let [src, x] = datasets(["src", "x"]);
        let graph = Graph::build([task("A", &[&src], &[&x]), task("B", &[&x], &[])]).unwrap();
        let rendered = graph.to_string();

        assert!(rendered.starts_with("graph LR\n"));
        assert!(rendered.contains("    in0([\"src\"])\n"));
        assert!(rendered.contains("    in0 --> 0\n"));
        assert!(rendered.contains("    0 -- \"x\" --> 1\n"));
    }

    #[test]
    fn test_mermaid_boundary_links_once_per_task() {
        let [src, extra, x] = datasets(["src", "extra", "x"]);
        let graph = Graph::build([
            task("A", &[&src], &[&x]),
            task("B", &[&x, &extra], &[]),
            task("C", &[&extra, &src], &[]),
        ])
        .unwrap();
        let rendered = graph.to_string();

        let links: Vec<_> = rendered
            .lines()
            .filter(|line| line.starts_with("    in") && line.contains("-->"))
            .collect();
        assert_eq!(
            links,
            vec!["    in0 --> 0", "    in1 --> 1", "    in1 --> 2", "    in0 --> 2"]
        );
    }
}
