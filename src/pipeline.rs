use std::borrow::Cow;

use tracing::debug;

use crate::TaskId;
use crate::bind::{Reads, Writes};
use crate::config::{ExecutionMode, Options};
use crate::core::{TaskContext, Value};
use crate::dataset::DatasetRef;
use crate::error::{SchemaError, SuiroError};
use crate::executor::{self, Arguments, Boundary, Results};
use crate::export::GraphSpec;
use crate::graph::Graph;
use crate::schedule::Schedule;
use crate::task::{Args, Task, TaskDef};

/// A collection of tasks and the datasets the caller wants back.
///
/// `Pipeline` owns its tasks, there is no global registry. Tasks are wired
/// together by the datasets they share, see [`Graph::build`].
///
/// # Example
///
/// ```rust
/// use suiro::{Boundary, Dataset, Pipeline};
///
/// let text = Dataset::<String>::new("text");
/// let words = Dataset::<Vec<String>>::new("words");
/// let count = Dataset::<usize>::new("count");
///
/// let mut pipeline: Pipeline = Pipeline::new();
///
/// pipeline
///     .task()
///     .name("split")
///     .map(text.clone(), words.clone(), |_, text| {
///         Ok(text.split_whitespace().map(String::from).collect())
///     })
///     .unwrap();
///
/// pipeline
///     .task()
///     .name("count")
///     .map(words.clone(), count.clone(), |_, words| Ok(words.len()))
///     .unwrap();
///
/// pipeline.returns(&count);
///
/// let boundary = Boundary::new().with(&text, String::from("a b c"));
/// let results = pipeline.run(&boundary, &Default::default(), &()).unwrap();
/// let outputs = pipeline.outputs(&results);
///
/// assert_eq!(outputs.get(&count), Some(&3));
/// assert!(!outputs.contains(&words));
/// ```
pub struct Pipeline<G: Send + Sync = ()> {
    tasks: Vec<Task<G>>,
    returns: Vec<DatasetRef>,
    options: Options,
}

impl<G: Send + Sync + 'static> Pipeline<G> {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            tasks: Vec::new(),
            returns: Vec::new(),
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn set_options(&mut self, options: Options) -> &mut Self {
        self.options = options;
        self
    }

    /// Starts declaring a task registered into this pipeline.
    pub fn task(&mut self) -> TaskBinder<'_, G> {
        TaskBinder {
            pipeline: self,
            def: TaskDef::new(),
        }
    }

    /// Registers an already built task.
    pub fn add(&mut self, task: Task<G>) -> TaskId {
        let id = TaskId(self.tasks.len());
        debug!(task = task.name(), %id, "registered task");
        self.tasks.push(task);
        id
    }

    /// Registered tasks, in registration order.
    pub fn tasks(&self) -> &[Task<G>] {
        &self.tasks
    }

    /// Declares `dataset` as an output of the pipeline.
    pub fn returns(&mut self, dataset: impl AsRef<DatasetRef>) -> &mut Self {
        let dataset = dataset.as_ref();
        if !self.returns.contains(dataset) {
            self.returns.push(dataset.clone());
        }
        self
    }

    /// The declared pipeline outputs.
    pub fn returned(&self) -> &[DatasetRef] {
        &self.returns
    }

    /// Builds the dependency graph of the registered tasks.
    pub fn graph(&self) -> Result<Graph<G>, SuiroError> {
        Ok(Graph::build(self.tasks.iter().cloned())?)
    }

    /// Builds, validates and schedules the graph.
    pub fn plan(&self) -> Result<Plan<G>, SuiroError> {
        let graph = self.graph()?;
        let schedule = graph.schedule()?;
        Ok(Plan { graph, schedule })
    }

    /// Plans and runs the pipeline with its options.
    pub fn run(
        &self,
        boundary: &Boundary,
        arguments: &Arguments,
        data: &G,
    ) -> Result<Results, SuiroError> {
        self.plan()?
            .execute(boundary, arguments, data, &self.options)
    }

    /// The declared outputs out of `results`. When no outputs were declared
    /// every produced value is kept.
    pub fn outputs(&self, results: &Results) -> Results {
        if self.returns.is_empty() {
            results.clone()
        } else {
            results.select(&self.returns)
        }
    }
}

impl<G: Send + Sync + 'static> Default for Pipeline<G> {
    fn default() -> Self {
        Self::new()
    }
}

/// A task declaration bound to the pipeline it will be registered in.
pub struct TaskBinder<'a, G: Send + Sync> {
    pipeline: &'a mut Pipeline<G>,
    def: TaskDef<G>,
}

impl<'a, G: Send + Sync + 'static> TaskBinder<'a, G> {
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.def = self.def.name(name);
        self
    }

    pub fn input(mut self, name: impl Into<Cow<'static, str>>, dataset: impl AsRef<DatasetRef>) -> Self {
        self.def = self.def.input(name, dataset);
        self
    }

    pub fn param(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.def = self.def.param(name);
        self
    }

    pub fn param_or<T>(mut self, name: impl Into<Cow<'static, str>>, default: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.def = self.def.param_or(name, default);
        self
    }

    pub fn context(mut self) -> Self {
        self.def = self.def.context();
        self
    }

    pub fn output(mut self, dataset: impl AsRef<DatasetRef>) -> Self {
        self.def = self.def.output(dataset);
        self
    }

    /// Finishes the declaration with a dynamic body and registers the task.
    pub fn run<F>(self, body: F) -> Result<TaskId, SchemaError>
    where
        F: Fn(&Args<'_, G>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let task = self.def.build(body)?;
        Ok(self.pipeline.add(task))
    }

    /// Finishes the declaration with a typed callback and registers the task.
    pub fn map<R, W, F>(self, reads: R, writes: W, callback: F) -> Result<TaskId, SchemaError>
    where
        R: Reads + Send + Sync + 'static,
        W: Writes + 'static,
        F: for<'b> Fn(&TaskContext<'b, G>, R::Output<'b>) -> anyhow::Result<W::Output>
            + Send
            + Sync
            + 'static,
    {
        let task = self.def.map(reads, writes, callback)?;
        Ok(self.pipeline.add(task))
    }
}

/// A validated graph and its schedule, ready to run any number of times.
pub struct Plan<G: Send + Sync = ()> {
    graph: Graph<G>,
    schedule: Schedule,
}

impl<G: Send + Sync> Plan<G> {
    pub fn graph(&self) -> &Graph<G> {
        &self.graph
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn order(&self) -> Vec<TaskId> {
        self.schedule.order()
    }

    pub fn levels(&self) -> &[Vec<TaskId>] {
        self.schedule.levels()
    }

    /// Serializable view of the graph and its levels.
    pub fn export(&self) -> GraphSpec {
        GraphSpec::from_graph(&self.graph, &self.schedule)
    }

    pub fn execute(
        &self,
        boundary: &Boundary,
        arguments: &Arguments,
        data: &G,
        options: &Options,
    ) -> Result<Results, SuiroError> {
        let results = match options.mode {
            ExecutionMode::Sequential => {
                executor::execute(&self.graph, &self.order(), boundary, arguments, data)?
            }
            ExecutionMode::Parallel { threads } => executor::execute_levels(
                &self.graph,
                self.levels(),
                boundary,
                arguments,
                data,
                threads,
            )?,
        };

        Ok(results)
    }
}
