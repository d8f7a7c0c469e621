use thiserror::Error;

use crate::TaskId;

pub use anyhow::Error as RuntimeError;

/// Malformed task declaration, detected when the task is built.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Task '{task}': dataset '{dataset}' is declared as output more than once")]
    DuplicateOutput { task: String, dataset: String },

    #[error("Task '{task}': parameter '{param}' is declared more than once")]
    DuplicateParameter { task: String, param: String },

    #[error("Task '{task}': parameter name '{param}' is reserved for the injected context")]
    ReservedParameter { task: String, param: String },
}

/// Two tasks claim the same output dataset.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Dataset '{dataset}' is produced by both '{first}' and '{second}'")]
pub struct DuplicateProducerError {
    pub dataset: String,
    pub first: String,
    pub second: String,
}

/// The dependency relation between tasks is not acyclic.
///
/// `path` lists the task names of one shortest cycle in cyclic order, the
/// last task feeding back into the first one.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Dependency cycle: {}", display_cycle(.path))]
pub struct CycleError {
    pub path: Vec<String>,
}

fn display_cycle(path: &[String]) -> String {
    match path.first() {
        Some(first) => format!("{} -> {first}", path.join(" -> ")),
        None => String::from("<empty>"),
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Task '{task}': input '{param}' is bound to dataset '{dataset}', which has no producer and no boundary value")]
pub struct UnboundDatasetError {
    pub task: String,
    pub param: String,
    pub dataset: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Task '{task}': no value supplied for parameter '{param}' and it has no default")]
pub struct MissingArgumentError {
    pub task: String,
    pub param: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Task '{task}': declares {expected} outputs but returned {}", display_actual(.actual))]
pub struct OutputArityError {
    pub task: String,
    pub expected: usize,
    /// Length of the returned sequence, `None` when the body returned a
    /// single item.
    pub actual: Option<usize>,
}

fn display_actual(actual: &Option<usize>) -> String {
    match actual {
        Some(n) => format!("a sequence of {n}"),
        None => String::from("a single value"),
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    UnboundDataset(#[from] UnboundDatasetError),

    #[error(transparent)]
    MissingArgument(#[from] MissingArgumentError),

    #[error(transparent)]
    OutputArity(#[from] OutputArityError),

    #[error("Task '{task}':\n{source}")]
    Task {
        task: String,
        source: RuntimeError,
    },

    #[error("Task id {0} is not part of the graph")]
    UnknownTask(TaskId),

    #[error("Failed to build the worker pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid progress style")]
    ProgressStyle(#[from] indicatif::style::TemplateError),
}

#[derive(Debug, Error)]
pub enum SuiroError {
    #[error("Error while declaring a task:\n{0}")]
    Schema(#[from] SchemaError),

    #[error("Error while building the graph:\n{0}")]
    DuplicateProducer(#[from] DuplicateProducerError),

    #[error("Error while scheduling the graph:\n{0}")]
    Cycle(#[from] CycleError),

    #[error("Error while running the pipeline:\n{0}")]
    Execution(#[from] ExecutionError),

    #[error("Invalid options:\n{0}")]
    Options(#[from] serde_json::Error),
}
