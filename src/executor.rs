mod diagnostics;

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use rayon::prelude::*;
use tracing::{Span, debug, info, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::TaskId;
use crate::core::{TaskContext, Value};
use crate::dataset::{Dataset, DatasetId, DatasetRef};
use crate::error::{
    ExecutionError, MissingArgumentError, OutputArityError, RuntimeError, UnboundDatasetError,
};
use crate::graph::Graph;
use crate::task::{Args, Param, Slot, Task};

pub use diagnostics::{Diagnostics, TaskExecution};

/// Values for the boundary datasets of a graph, supplied before a run.
#[derive(Debug, Clone, Default)]
pub struct Boundary {
    values: HashMap<DatasetId, (DatasetRef, Value)>,
}

impl Boundary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Boundary::insert`].
    pub fn with<T>(mut self, dataset: &Dataset<T>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.insert(dataset, value);
        self
    }

    pub fn insert<T>(&mut self, dataset: &Dataset<T>, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.insert_value(dataset, Value::new(value))
    }

    /// Inserts an already erased value.
    pub fn insert_value(&mut self, dataset: impl AsRef<DatasetRef>, value: Value) -> &mut Self {
        let dataset = dataset.as_ref();
        self.values.insert(dataset.id(), (dataset.clone(), value));
        self
    }

    pub fn get(&self, dataset: impl AsRef<DatasetRef>) -> Option<&Value> {
        self.values
            .get(&dataset.as_ref().id())
            .map(|(_, value)| value)
    }

    pub fn contains(&self, dataset: impl AsRef<DatasetRef>) -> bool {
        self.values.contains_key(&dataset.as_ref().id())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Values for pass-through parameters, keyed by task and parameter name.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: HashMap<TaskId, HashMap<String, Value>>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T>(mut self, task: TaskId, name: impl Into<String>, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.set(task, name, value);
        self
    }

    pub fn set<T>(&mut self, task: TaskId, name: impl Into<String>, value: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        self.set_value(task, name, Value::new(value))
    }

    pub fn set_value(&mut self, task: TaskId, name: impl Into<String>, value: Value) -> &mut Self {
        self.values.entry(task).or_default().insert(name.into(), value);
        self
    }

    pub fn get(&self, task: TaskId, name: &str) -> Option<&Value> {
        self.values.get(&task)?.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn keys(&self) -> impl Iterator<Item = (TaskId, &str)> {
        self.values
            .iter()
            .flat_map(|(id, params)| params.keys().map(|name| (*id, name.as_str())))
    }
}

/// Values produced during a run, in commit order.
#[derive(Debug, Clone, Default)]
pub struct Results {
    values: Vec<(DatasetRef, Value)>,
    index: HashMap<DatasetId, usize>,
    diagnostics: Diagnostics,
}

impl Results {
    /// Typed access to the value committed to `dataset`.
    pub fn get<T: 'static>(&self, dataset: &Dataset<T>) -> Option<&T> {
        self.value(dataset)?.downcast_ref::<T>()
    }

    pub fn value(&self, dataset: impl AsRef<DatasetRef>) -> Option<&Value> {
        self.index
            .get(&dataset.as_ref().id())
            .map(|&position| &self.values[position].1)
    }

    pub fn contains(&self, dataset: impl AsRef<DatasetRef>) -> bool {
        self.index.contains_key(&dataset.as_ref().id())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DatasetRef, &Value)> {
        self.values.iter().map(|(dataset, value)| (dataset, value))
    }

    /// Keeps only the given datasets. Datasets that were never produced are
    /// skipped.
    pub fn select<'a>(&self, datasets: impl IntoIterator<Item = &'a DatasetRef>) -> Results {
        let mut selected = Results {
            diagnostics: self.diagnostics.clone(),
            ..Results::default()
        };

        for dataset in datasets {
            if let Some(value) = self.value(dataset) {
                selected.insert(dataset.clone(), value.clone());
            }
        }

        selected
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn insert(&mut self, dataset: DatasetRef, value: Value) {
        match self.index.get(&dataset.id()) {
            Some(&position) => self.values[position].1 = value,
            None => {
                self.index.insert(dataset.id(), self.values.len());
                self.values.push((dataset, value));
            }
        }
    }

    fn commit(&mut self, task: TaskId, produced: Produced) {
        let (outputs, execution) = produced;
        for (dataset, value) in outputs {
            self.insert(dataset, value);
        }
        self.diagnostics.execution_times.insert(task, execution);
    }
}

/// Output values of one invocation, with its timing.
type Produced = (Vec<(DatasetRef, Value)>, TaskExecution);

/// Runs the tasks of `graph` one after another on the calling thread, in the
/// given order.
///
/// The order is taken as is. An input whose producer has not run yet falls
/// back to the boundary values. The level reported to a task is one past the
/// deepest predecessor that already ran, which matches the scheduled level
/// for topological orders.
pub fn execute<G: Send + Sync>(
    graph: &Graph<G>,
    order: &[TaskId],
    boundary: &Boundary,
    arguments: &Arguments,
    data: &G,
) -> Result<Results, ExecutionError> {
    let levels: Vec<Vec<TaskId>> = order.iter().map(|&id| vec![id]).collect();
    preflight(graph, &levels, boundary, arguments)?;

    let span = tracing::info_span!("run", tasks = order.len());
    let _enter = span.enter();
    info!(tasks = order.len(), "running tasks sequentially");

    let mut results = Results::default();
    let mut depths: HashMap<TaskId, usize> = HashMap::new();

    for &id in order {
        let task = graph.task(id).ok_or(ExecutionError::UnknownTask(id))?;
        let level = graph
            .predecessors(id)
            .iter()
            .filter_map(|pred| depths.get(pred))
            .map(|depth| depth + 1)
            .max()
            .unwrap_or(0);

        let produced = invoke(task, id, level, &results, boundary, arguments, data, &span)?;
        results.commit(id, produced);
        depths.insert(id, level);
    }

    info!(datasets = results.len(), "run complete");
    Ok(results)
}

/// Runs `levels` one after another, the tasks of each level in parallel on a
/// rayon pool of `threads` workers (rayon's default when `None`).
///
/// Outputs of a level are committed once every task of the level finished,
/// so tasks never observe values produced within their own level.
pub fn execute_levels<G: Send + Sync>(
    graph: &Graph<G>,
    levels: &[Vec<TaskId>],
    boundary: &Boundary,
    arguments: &Arguments,
    data: &G,
    threads: Option<usize>,
) -> Result<Results, ExecutionError> {
    preflight(graph, levels, boundary, arguments)?;

    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(threads) = threads {
        builder = builder.num_threads(threads);
    }
    let pool = builder.build()?;

    let total: usize = levels.iter().map(Vec::len).sum();

    let span = tracing::info_span!("run", tasks = total);
    span.pb_set_style(&crate::utils::progress_style()?);
    span.pb_set_length(total as u64);
    span.pb_set_message("Running tasks...");
    let _enter = span.enter();
    info!(
        tasks = total,
        levels = levels.len(),
        threads = pool.current_num_threads(),
        "running tasks in parallel"
    );

    let mut results = Results::default();

    for (depth, level) in levels.iter().enumerate() {
        let tasks = level
            .iter()
            .map(|&id| {
                graph
                    .task(id)
                    .map(|task| (id, task))
                    .ok_or(ExecutionError::UnknownTask(id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let produced = pool.install(|| {
            tasks
                .par_iter()
                .map(|&(id, task)| {
                    invoke(task, id, depth, &results, boundary, arguments, data, &span)
                        .map(|produced| (id, produced))
                })
                .collect::<Result<Vec<_>, _>>()
        })?;

        for (id, produced) in produced {
            results.commit(id, produced);
            span.pb_inc(1);
        }

        debug!(level = depth, tasks = level.len(), "level complete");
    }

    info!(datasets = results.len(), "run complete");
    Ok(results)
}

/// Checks input and parameter resolution for the whole run before any task
/// body executes.
fn preflight<G: Send + Sync>(
    graph: &Graph<G>,
    levels: &[Vec<TaskId>],
    boundary: &Boundary,
    arguments: &Arguments,
) -> Result<(), ExecutionError> {
    let mut available = HashSet::new();

    for level in levels {
        let mut produced = Vec::new();

        for &id in level {
            let task = graph.task(id).ok_or(ExecutionError::UnknownTask(id))?;

            for param in task.params() {
                match param {
                    Param::Input { name, dataset } => {
                        if !available.contains(&dataset.id()) && !boundary.contains(dataset) {
                            return Err(UnboundDatasetError {
                                task: task.name().to_string(),
                                param: name.to_string(),
                                dataset: dataset.name().to_string(),
                            }
                            .into());
                        }
                    }
                    Param::PassThrough { name, default } => {
                        if default.is_none() && arguments.get(id, name).is_none() {
                            return Err(MissingArgumentError {
                                task: task.name().to_string(),
                                param: name.to_string(),
                            }
                            .into());
                        }
                    }
                    Param::Context => {}
                }
            }

            produced.extend(task.outputs().iter().map(DatasetRef::id));
        }

        available.extend(produced);
    }

    for (id, name) in arguments.keys() {
        let known = graph
            .task(id)
            .is_some_and(|task| task.pass_through().any(|param| param == name));

        if !known {
            warn!(task = %id, param = name, "argument does not match any pass-through parameter");
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn invoke<G: Send + Sync>(
    task: &Task<G>,
    id: TaskId,
    level: usize,
    results: &Results,
    boundary: &Boundary,
    arguments: &Arguments,
    data: &G,
    parent: &Span,
) -> Result<Produced, ExecutionError> {
    let mut slots = Vec::with_capacity(task.params().len());

    for param in task.params() {
        match param {
            Param::Input { name, dataset } => {
                let value = results
                    .value(dataset)
                    .or_else(|| boundary.get(dataset))
                    .ok_or_else(|| UnboundDatasetError {
                        task: task.name().to_string(),
                        param: name.to_string(),
                        dataset: dataset.name().to_string(),
                    })?;

                slots.push(Slot {
                    name: &**name,
                    dataset: Some(dataset),
                    value,
                });
            }
            Param::PassThrough { name, default } => {
                let value = arguments
                    .get(id, name)
                    .or(default.as_ref())
                    .ok_or_else(|| MissingArgumentError {
                        task: task.name().to_string(),
                        param: name.to_string(),
                    })?;

                slots.push(Slot {
                    name: &**name,
                    dataset: None,
                    value,
                });
            }
            Param::Context => {}
        }
    }

    let span = tracing::info_span!(parent: parent, "task", name = task.name(), level);
    let _enter = span.enter();

    let context = task.uses_context().then(|| TaskContext {
        data,
        task: task.name(),
        level,
        span: span.clone(),
    });

    let args = Args::new(task.name(), slots, context.as_ref());

    let start = Instant::now();

    let output = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.call(&args))) {
        Ok(result) => result,
        Err(panic) => Err(panic_error(panic)),
    };

    let duration = start.elapsed();
    debug!(?duration, "task finished");

    let value = output.map_err(|source| ExecutionError::Task {
        task: task.name().to_string(),
        source,
    })?;

    Ok((capture(task, value)?, TaskExecution { start, duration }))
}

fn panic_error(panic: Box<dyn std::any::Any + Send>) -> RuntimeError {
    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
        format!("Task panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("Task panicked: {s}")
    } else {
        String::from("Task panicked with unknown payload")
    };

    anyhow::anyhow!(msg)
}

/// Maps a body's return value onto the task's output bindings.
fn capture<G: Send + Sync>(
    task: &Task<G>,
    value: Value,
) -> Result<Vec<(DatasetRef, Value)>, OutputArityError> {
    let outputs = task.outputs();

    match outputs {
        [] => Ok(vec![]),
        [output] => Ok(vec![(output.clone(), value)]),
        _ => {
            let expected = outputs.len();
            let items = value.into_sequence().map_err(|_| OutputArityError {
                task: task.name().to_string(),
                expected,
                actual: None,
            })?;

            if items.len() != expected {
                return Err(OutputArityError {
                    task: task.name().to_string(),
                    expected,
                    actual: Some(items.len()),
                });
            }

            Ok(outputs.iter().cloned().zip(items).collect())
        }
    }
}
