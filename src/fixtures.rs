//! Shared helpers for unit tests.

use crate::core::Value;
use crate::dataset::{Dataset, DatasetRef};
use crate::task::{Task, TaskDef};

/// Untyped datasets, one per name.
pub(crate) fn datasets<const N: usize>(names: [&str; N]) -> [DatasetRef; N] {
    names.map(|name| Dataset::<()>::new(name).erased().clone())
}

/// A task whose inputs are named after their datasets and whose body does
/// nothing.
pub(crate) fn task(name: &'static str, inputs: &[&DatasetRef], outputs: &[&DatasetRef]) -> Task {
    let mut def = TaskDef::new().name(name);
    for dataset in inputs {
        def = def.input(dataset.name().to_string(), *dataset);
    }
    for dataset in outputs {
        def = def.output(*dataset);
    }
    def.build(|_| Ok(Value::unit())).unwrap()
}

/// Names of the tasks of each level.
pub(crate) fn names<G: Send + Sync>(
    graph: &crate::Graph<G>,
    levels: &[Vec<crate::TaskId>],
) -> Vec<Vec<String>> {
    levels
        .iter()
        .map(|level| {
            level
                .iter()
                .filter_map(|&id| graph.task(id))
                .map(|task| task.name().to_string())
                .collect()
        })
        .collect()
}
