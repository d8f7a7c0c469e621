//! Task descriptors and their binding declarations.
//!
//! A [`Task`] wraps an opaque body together with the datasets it reads and
//! writes. The bindings are declared explicitly through a [`TaskDef`] and are
//! immutable once the task is built; the graph builder only ever looks at
//! them, never at the body.

use std::any::type_name;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt::{Debug, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{TaskContext, Value};
use crate::dataset::{Dataset, DatasetRef};
use crate::error::SchemaError;

/// Name of the reserved parameter that receives the injected [`TaskContext`].
pub const CONTEXT: &str = "context";

/// Position of a task in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One declared parameter of a task body.
#[derive(Debug, Clone)]
pub enum Param {
    /// Bound to a dataset; takes part in edge inference.
    Input { name: Cow<'static, str>, dataset: DatasetRef },
    /// Supplied by the caller at run time, excluded from the graph.
    PassThrough {
        name: Cow<'static, str>,
        default: Option<Value>,
    },
    /// Receives the engine-injected context.
    Context,
}

impl Param {
    pub fn name(&self) -> &str {
        match self {
            Param::Input { name, .. } | Param::PassThrough { name, .. } => &**name,
            Param::Context => CONTEXT,
        }
    }
}

pub(crate) type Body<G> = Arc<dyn Fn(&Args<'_, G>) -> anyhow::Result<Value> + Send + Sync>;

/// A unit of work with declared input/output dataset bindings and a body.
pub struct Task<G: Send + Sync = ()> {
    name: Cow<'static, str>,
    params: Arc<[Param]>,
    outputs: Arc<[DatasetRef]>,
    body: Body<G>,
}

impl<G: Send + Sync> Task<G> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All parameters in declaration order.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Input bindings as `(parameter name, dataset)`, in declaration order.
    pub fn inputs(&self) -> impl Iterator<Item = (&str, &DatasetRef)> {
        self.params.iter().filter_map(|param| match param {
            Param::Input { name, dataset } => Some((&**name, dataset)),
            _ => None,
        })
    }

    /// Names of the pass-through parameters, in declaration order.
    pub fn pass_through(&self) -> impl Iterator<Item = &str> {
        self.params.iter().filter_map(|param| match param {
            Param::PassThrough { name, .. } => Some(&**name),
            _ => None,
        })
    }

    pub fn outputs(&self) -> &[DatasetRef] {
        &self.outputs
    }

    pub fn uses_context(&self) -> bool {
        self.params.iter().any(|param| matches!(param, Param::Context))
    }

    pub(crate) fn call(&self, args: &Args<'_, G>) -> anyhow::Result<Value> {
        (self.body)(args)
    }
}

impl<G: Send + Sync> Clone for Task<G> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            params: self.params.clone(),
            outputs: self.outputs.clone(),
            body: self.body.clone(),
        }
    }
}

impl<G: Send + Sync> Debug for Task<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// Binding declaration for a task.
///
/// ```rust
/// use suiro::{Dataset, TaskDef, Value};
///
/// let raw = Dataset::<Vec<i64>>::new("raw");
/// let clean = Dataset::<Vec<i64>>::new("clean");
///
/// let task = TaskDef::<()>::new()
///     .name("clean")
///     .input("rows", &raw)
///     .param_or("limit", 100usize)
///     .output(&clean)
///     .build(|args| {
///         let rows = args.input::<Vec<i64>>("rows")?;
///         let limit = *args.param::<usize>("limit")?;
///         Ok(Value::new(rows.iter().copied().take(limit).collect::<Vec<_>>()))
///     })
///     .unwrap();
///
/// assert_eq!(task.inputs().count(), 1);
/// ```
pub struct TaskDef<G: Send + Sync = ()> {
    name: Option<Cow<'static, str>>,
    params: Vec<Param>,
    outputs: Vec<DatasetRef>,
    _phantom: std::marker::PhantomData<fn(&G)>,
}

impl<G: Send + Sync + 'static> TaskDef<G> {
    pub fn new() -> Self {
        Self {
            name: None,
            params: Vec::new(),
            outputs: Vec::new(),
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Binds parameter `name` to `dataset`.
    pub fn input(mut self, name: impl Into<Cow<'static, str>>, dataset: impl AsRef<DatasetRef>) -> Self {
        self.params.push(Param::Input {
            name: name.into(),
            dataset: dataset.as_ref().clone(),
        });
        self
    }

    /// Declares a pass-through parameter the caller must supply.
    pub fn param(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.params.push(Param::PassThrough {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Declares a pass-through parameter with a default.
    pub fn param_or<T>(mut self, name: impl Into<Cow<'static, str>>, default: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.params.push(Param::PassThrough {
            name: name.into(),
            default: Some(Value::new(default)),
        });
        self
    }

    /// Declares the context parameter at the current position.
    pub fn context(mut self) -> Self {
        self.params.push(Param::Context);
        self
    }

    /// Appends an output binding.
    pub fn output(mut self, dataset: impl AsRef<DatasetRef>) -> Self {
        self.outputs.push(dataset.as_ref().clone());
        self
    }

    /// Finishes the declaration.
    ///
    /// Without an explicit name the task is named after the type of `body`.
    pub fn build<F>(self, body: F) -> Result<Task<G>, SchemaError>
    where
        F: Fn(&Args<'_, G>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let name = self.name.unwrap_or(type_name::<F>().into());

        let mut seen = HashSet::new();
        for param in &self.params {
            match param {
                Param::Input { name: param, .. } | Param::PassThrough { name: param, .. }
                    if param == CONTEXT =>
                {
                    return Err(SchemaError::ReservedParameter {
                        task: name.to_string(),
                        param: param.to_string(),
                    });
                }
                _ => {}
            }

            if !seen.insert(param.name()) {
                return Err(SchemaError::DuplicateParameter {
                    task: name.to_string(),
                    param: param.name().to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        for output in &self.outputs {
            if !seen.insert(output.id()) {
                return Err(SchemaError::DuplicateOutput {
                    task: name.to_string(),
                    dataset: output.name().to_string(),
                });
            }
        }

        Ok(Task {
            name,
            params: self.params.into(),
            outputs: self.outputs.into(),
            body: Arc::new(body),
        })
    }
}

impl<G: Send + Sync + 'static> Default for TaskDef<G> {
    fn default() -> Self {
        Self::new()
    }
}

/// A resolved argument slot.
pub(crate) struct Slot<'a> {
    pub name: &'a str,
    pub dataset: Option<&'a DatasetRef>,
    pub value: &'a Value,
}

/// Arguments handed to a task body, in declaration order.
pub struct Args<'a, G: Send + Sync = ()> {
    task: &'a str,
    slots: Vec<Slot<'a>>,
    context: Option<&'a TaskContext<'a, G>>,
}

impl<'a, G: Send + Sync> Args<'a, G> {
    pub(crate) fn new(
        task: &'a str,
        slots: Vec<Slot<'a>>,
        context: Option<&'a TaskContext<'a, G>>,
    ) -> Self {
        Self {
            task,
            slots,
            context,
        }
    }

    /// Name of the task being invoked.
    pub fn task(&self) -> &'a str {
        self.task
    }

    /// The injected context, present when the task declared one.
    pub fn context(&self) -> Option<&'a TaskContext<'a, G>> {
        self.context
    }

    /// Value of the input bound to `dataset`.
    pub fn get<T: 'static>(&self, dataset: &Dataset<T>) -> anyhow::Result<&'a T> {
        let slot = self
            .slots
            .iter()
            .find(|slot| slot.dataset.is_some_and(|bound| bound.id() == dataset.id()))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "task '{}' has no input bound to dataset '{}'",
                    self.task,
                    dataset.name()
                )
            })?;

        self.downcast(slot)
    }

    /// Value of the input parameter `name`.
    pub fn input<T: 'static>(&self, name: &str) -> anyhow::Result<&'a T> {
        let slot = self.slot(name, true)?;
        self.downcast(slot)
    }

    /// Value of the pass-through parameter `name`.
    pub fn param<T: 'static>(&self, name: &str) -> anyhow::Result<&'a T> {
        let slot = self.slot(name, false)?;
        self.downcast(slot)
    }

    /// Untyped value of any parameter.
    pub fn value(&self, name: &str) -> Option<&'a Value> {
        self.slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.value)
    }

    /// All `(name, value)` pairs in declaration order, context excluded.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Value)> + '_ {
        self.slots.iter().map(|slot| (slot.name, slot.value))
    }

    fn slot(&self, name: &str, input: bool) -> anyhow::Result<&Slot<'a>> {
        self.slots
            .iter()
            .find(|slot| slot.name == name && slot.dataset.is_some() == input)
            .ok_or_else(|| {
                let kind = if input { "input" } else { "parameter" };
                anyhow::anyhow!("task '{}' has no {kind} named '{name}'", self.task)
            })
    }

    fn downcast<T: 'static>(&self, slot: &Slot<'a>) -> anyhow::Result<&'a T> {
        let value: &'a Value = slot.value;
        value.downcast_ref::<T>().ok_or_else(|| {
            anyhow::anyhow!(
                "task '{}': '{}' holds {}, expected {}",
                self.task,
                slot.name,
                value.type_name(),
                type_name::<T>()
            )
        })
    }
}
