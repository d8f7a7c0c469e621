#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod bind;
pub mod config;
mod core;
mod dataset;
mod error;
pub mod executor;
pub mod export;
mod graph;
mod pipeline;
pub mod schedule;
mod task;
pub mod utils;

#[cfg(test)]
mod fixtures;

pub use crate::bind::{Reads, Writes};
pub use crate::config::{ExecutionMode, Options};
pub use crate::core::{TaskContext, Value};
pub use crate::dataset::{Dataset, DatasetId, DatasetInfo, DatasetRef, Field, Schema};
pub use crate::error::*;
pub use crate::executor::{Arguments, Boundary, Diagnostics, Results, TaskExecution, execute, execute_levels};
pub use crate::export::GraphSpec;
pub use crate::graph::{Edge, Graph, Producer};
pub use crate::pipeline::{Pipeline, Plan, TaskBinder};
pub use crate::schedule::Schedule;
pub use crate::task::{Args, CONTEXT, Param, Task, TaskDef, TaskId};

#[cfg(test)]
mod tests {
    use super::*;

    /// Extract, transform, load, with two independent branches in between.
    #[test]
    fn test_end_to_end() {
        let source = Dataset::<String>::describe(
            DatasetInfo::new("source")
                .schema(Schema::new().field("line", "string"))
                .meta("format", "csv"),
        );
        let rows = Dataset::<Vec<Vec<String>>>::new("rows");
        let widths = Dataset::<Vec<usize>>::new("widths");
        let header = Dataset::<Vec<String>>::new("header");
        let report = Dataset::<String>::new("report");

        let mut pipeline: Pipeline = Pipeline::new();

        pipeline
            .task()
            .name("render")
            .map((header.clone(), widths.clone()), report.clone(), |_, (header, widths)| {
                Ok(header
                    .iter()
                    .zip(widths)
                    .map(|(name, width)| format!("{name}:{width}"))
                    .collect::<Vec<_>>()
                    .join(","))
            })
            .unwrap();

        let parse = pipeline
            .task()
            .name("parse")
            .input("text", &source)
            .param_or("separator", ',')
            .output(&rows)
            .run(|args| {
                let text = args.input::<String>("text")?;
                let separator = *args.param::<char>("separator")?;
                let rows: Vec<Vec<String>> = text
                    .lines()
                    .map(|line| line.split(separator).map(String::from).collect())
                    .collect();
                Ok(Value::new(rows))
            })
            .unwrap();

        pipeline
            .task()
            .name("widths")
            .map(rows.clone(), widths.clone(), |_, rows| {
                let columns = rows.first().map(Vec::len).unwrap_or_default();
                Ok((0..columns)
                    .map(|c| rows.iter().map(|row| row[c].len()).max().unwrap_or_default())
                    .collect())
            })
            .unwrap();

        pipeline
            .task()
            .name("header")
            .map(rows.clone(), header.clone(), |_, rows| {
                Ok(rows.first().cloned().unwrap_or_default())
            })
            .unwrap();

        pipeline.returns(&report);

        let plan = pipeline.plan().unwrap();
        assert_eq!(plan.graph().boundary_inputs(), &[source.erased().clone()]);

        let levels: Vec<Vec<&str>> = plan
            .levels()
            .iter()
            .map(|level| {
                level
                    .iter()
                    .filter_map(|&id| plan.graph().task(id))
                    .map(Task::name)
                    .collect()
            })
            .collect();
        assert_eq!(levels, vec![vec!["parse"], vec!["widths", "header"], vec!["render"]]);

        let boundary = Boundary::new().with(&source, String::from("id;name\n1;alice"));
        let arguments = Arguments::new().with(parse, "separator", ';');

        for options in [Options::sequential(), Options::parallel(Some(2))] {
            let results = plan.execute(&boundary, &arguments, &(), &options).unwrap();
            let outputs = pipeline.outputs(&results);

            assert_eq!(outputs.len(), 1);
            assert_eq!(outputs.get(&report).map(String::as_str), Some("id:2,name:5"));
            assert_eq!(results.diagnostics().execution_times.len(), 4);
        }

        let exported = plan.export();
        assert_eq!(exported.derive_levels().unwrap(), plan.levels());
        assert!(plan.graph().to_string().starts_with("graph LR"));
    }
}
