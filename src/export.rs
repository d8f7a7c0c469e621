//! Read-only, serializable view of a graph.
//!
//! A [`GraphSpec`] carries everything an outside consumer needs to rebuild
//! the task relations: task bindings, dataset descriptions, the derived edges
//! and the execution levels. Task bodies are not part of it.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::TaskId;
use crate::dataset::{DatasetId, DatasetRef, Schema};
use crate::error::CycleError;
use crate::graph::Graph;
use crate::schedule::{Schedule, levels_or_cycle};
use crate::task::Param;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub tasks: Vec<TaskEntry>,
    pub datasets: Vec<DatasetEntry>,
    pub edges: Vec<EdgeEntry>,
    pub levels: Vec<Vec<TaskId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: TaskId,
    pub name: String,
    pub inputs: Vec<BindingEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamEntry>,
    pub outputs: Vec<DatasetId>,
    #[serde(default)]
    pub context: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingEntry {
    pub param: String,
    pub dataset: DatasetId,
}

/// A pass-through parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamEntry {
    pub name: String,
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub id: DatasetId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// Read by some task, produced by none.
    pub boundary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeEntry {
    pub producer: TaskId,
    pub consumer: TaskId,
    pub dataset: DatasetId,
    pub param: String,
}

impl GraphSpec {
    pub fn from_graph<G: Send + Sync>(graph: &Graph<G>, schedule: &Schedule) -> Self {
        let boundary: HashSet<DatasetId> =
            graph.boundary_inputs().iter().map(DatasetRef::id).collect();

        let mut datasets = Vec::new();
        let mut seen = HashSet::new();
        let mut describe = |dataset: &DatasetRef| {
            if seen.insert(dataset.id()) {
                datasets.push(DatasetEntry {
                    id: dataset.id(),
                    name: dataset.name().to_string(),
                    schema: dataset.schema().cloned(),
                    metadata: dataset.metadata().clone(),
                    boundary: boundary.contains(&dataset.id()),
                });
            }
        };

        let mut tasks = Vec::with_capacity(graph.len());

        for (id, task) in graph.tasks() {
            let mut inputs = Vec::new();
            let mut params = Vec::new();

            for param in task.params() {
                match param {
                    Param::Input { name, dataset } => {
                        describe(dataset);
                        inputs.push(BindingEntry {
                            param: name.to_string(),
                            dataset: dataset.id(),
                        });
                    }
                    Param::PassThrough { name, default } => params.push(ParamEntry {
                        name: name.to_string(),
                        has_default: default.is_some(),
                    }),
                    Param::Context => {}
                }
            }

            task.outputs().iter().for_each(&mut describe);

            tasks.push(TaskEntry {
                id,
                name: task.name().to_string(),
                inputs,
                params,
                outputs: task.outputs().iter().map(DatasetRef::id).collect(),
                context: task.uses_context(),
            });
        }

        let edges = graph
            .edges()
            .map(|edge| EdgeEntry {
                producer: edge.producer,
                consumer: edge.consumer,
                dataset: edge.dataset.id(),
                param: edge.param.to_string(),
            })
            .collect();

        Self {
            tasks,
            datasets,
            edges,
            levels: schedule.levels().to_vec(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Rebuilds the edges from the task bindings alone, in the order the graph
    /// builder derives them. The first task claiming a dataset is its
    /// producer.
    pub fn derive_edges(&self) -> Vec<EdgeEntry> {
        let mut producers = HashMap::new();
        for task in &self.tasks {
            for &dataset in &task.outputs {
                producers.entry(dataset).or_insert(task.id);
            }
        }

        let mut edges = Vec::new();
        for task in &self.tasks {
            for input in &task.inputs {
                if let Some(&producer) = producers.get(&input.dataset) {
                    edges.push(EdgeEntry {
                        producer,
                        consumer: task.id,
                        dataset: input.dataset,
                        param: input.param.clone(),
                    });
                }
            }
        }

        edges
    }

    /// Recomputes the execution levels from the task bindings alone.
    pub fn derive_levels(&self) -> Result<Vec<Vec<TaskId>>, CycleError> {
        let position: HashMap<TaskId, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(index, task)| (task.id, index))
            .collect();

        let mut successors = vec![Vec::new(); self.tasks.len()];
        for edge in self.derive_edges() {
            if let (Some(&from), Some(&to)) = (position.get(&edge.producer), position.get(&edge.consumer)) {
                successors[from].push(to);
            }
        }

        let levels = levels_or_cycle(&successors, |index| self.tasks[index].name.clone())?;

        Ok(levels
            .into_iter()
            .map(|level| level.into_iter().map(|index| self.tasks[index].id).collect())
            .collect())
    }

    pub fn dataset(&self, id: DatasetId) -> Option<&DatasetEntry> {
        self.datasets.iter().find(|dataset| dataset.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dataset;
    use crate::core::Value;
    use crate::dataset::DatasetInfo;
    use crate::task::TaskDef;

    fn graph() -> Graph {
        let raw = Dataset::<Vec<u8>>::describe(
            DatasetInfo::new("raw")
                .schema(Schema::new().field("byte", "u8"))
                .meta("owner", "ingest"),
        );
        let clean = Dataset::<Vec<u8>>::new("clean");
        let stats = Dataset::<usize>::new("stats");
        let report = Dataset::<String>::new("report");

        Graph::build([
            TaskDef::new()
                .name("clean")
                .input("raw", &raw)
                .param_or("threshold", 3u8)
                .output(&clean)
                .build(|_| Ok(Value::unit()))
                .unwrap(),
            TaskDef::new()
                .name("stats")
                .input("rows", &clean)
                .context()
                .output(&stats)
                .build(|_| Ok(Value::unit()))
                .unwrap(),
            TaskDef::new()
                .name("report")
                .input("rows", &clean)
                .input("stats", &stats)
                .param("title")
                .output(&report)
                .build(|_| Ok(Value::unit()))
                .unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_export_contents() {
        let graph = graph();
        let exported = GraphSpec::from_graph(&graph, &graph.schedule().unwrap());

        assert_eq!(exported.tasks.len(), 3);
        assert_eq!(exported.edges.len(), 3);
        assert_eq!(exported.levels, vec![vec![TaskId(0)], vec![TaskId(1)], vec![TaskId(2)]]);

        let names: Vec<_> = exported.datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["raw", "clean", "stats", "report"]);

        let raw = &exported.datasets[0];
        assert!(raw.boundary);
        assert_eq!(raw.metadata.get("owner").map(String::as_str), Some("ingest"));
        assert_eq!(raw.schema.as_ref().map(|s| s.fields.len()), Some(1));
        assert!(!exported.datasets[1].boundary);

        assert!(exported.tasks[1].context);
        assert_eq!(
            exported.tasks[0].params,
            vec![ParamEntry {
                name: "threshold".into(),
                has_default: true
            }]
        );
    }

    #[test]
    fn test_derived_relations_match_graph() {
        let graph = graph();
        let exported = GraphSpec::from_graph(&graph, &graph.schedule().unwrap());

        assert_eq!(exported.derive_edges(), exported.edges);
        assert_eq!(exported.derive_levels().unwrap(), exported.levels);
    }

    #[test]
    fn test_json_roundtrip_keeps_relations() {
        let graph = graph();
        let exported = GraphSpec::from_graph(&graph, &graph.schedule().unwrap());

        let json = exported.to_json().unwrap();
        let back = GraphSpec::from_json(&json).unwrap();

        assert_eq!(back, exported);
        assert_eq!(back.derive_levels().unwrap(), exported.levels);
    }

    #[test]
    fn test_derive_levels_detects_cycle() {
        let graph = graph();
        let mut exported = GraphSpec::from_graph(&graph, &graph.schedule().unwrap());

        // Make `clean` read what `report` writes.
        let report = exported.tasks[2].outputs[0];
        exported.tasks[0].inputs.push(BindingEntry {
            param: "feedback".into(),
            dataset: report,
        });

        let err = exported.derive_levels().unwrap_err();
        assert_eq!(err.path, vec!["clean", "report"]);
    }
}
