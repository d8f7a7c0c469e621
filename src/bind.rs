//! Typed binding sugar.
//!
//! [`Reads`] and [`Writes`] are implemented for a single [`Dataset<T>`] and
//! for tuples of them, so a task can be declared with its inputs and outputs
//! as plain Rust types:
//!
//! ```rust
//! use suiro::{Dataset, TaskDef};
//!
//! let words = Dataset::<Vec<String>>::new("words");
//! let count = Dataset::<usize>::new("count");
//! let longest = Dataset::<String>::new("longest");
//!
//! let task = TaskDef::<()>::new()
//!     .name("stats")
//!     .map(words.clone(), (count.clone(), longest.clone()), |_, words| {
//!         let longest = words.iter().max_by_key(|w| w.len()).cloned().unwrap_or_default();
//!         Ok((words.len(), longest))
//!     })
//!     .unwrap();
//!
//! assert_eq!(task.outputs().len(), 2);
//! ```
//!
//! Under the hood every read becomes an input binding named after its
//! dataset (suffixed with its position when an earlier read already took the
//! name) and the typed callback is adapted to the dynamic task body. The
//! downcasts cannot fail for values committed by other typed tasks, since the
//! compiler ties the producer's output type to the dataset's type parameter.

use std::collections::HashSet;

use crate::core::{TaskContext, Value};
use crate::dataset::{Dataset, DatasetRef};
use crate::error::SchemaError;
use crate::task::{Args, Task, TaskDef};

/// A collection of datasets a task reads.
pub trait Reads {
    /// The resulting type when all inputs are resolved.
    /// For a tuple of [`Dataset<T>`]s, this will be a tuple of `&'a T`s.
    type Output<'a>;

    /// The datasets in declaration order.
    fn datasets(&self) -> Vec<DatasetRef>;

    /// Resolves the values out of the invocation arguments.
    fn resolve<'a, G: Send + Sync>(&self, args: &Args<'a, G>) -> anyhow::Result<Self::Output<'a>>;
}

/// A collection of datasets a task writes.
pub trait Writes {
    /// The value the typed callback returns.
    type Output: Send + Sync + 'static;

    /// The datasets in output position order.
    fn datasets(&self) -> Vec<DatasetRef>;

    /// Erases the callback's return value.
    fn erase(output: Self::Output) -> Value;
}

impl Reads for () {
    type Output<'a> = ();

    fn datasets(&self) -> Vec<DatasetRef> {
        vec![]
    }

    fn resolve<'a, G: Send + Sync>(&self, _: &Args<'a, G>) -> anyhow::Result<Self::Output<'a>> {
        Ok(())
    }
}

impl<T> Reads for Dataset<T>
where
    T: Send + Sync + 'static,
{
    type Output<'a> = &'a T;

    fn datasets(&self) -> Vec<DatasetRef> {
        vec![self.erased().clone()]
    }

    fn resolve<'a, G: Send + Sync>(&self, args: &Args<'a, G>) -> anyhow::Result<Self::Output<'a>> {
        args.get(self)
    }
}

impl Writes for () {
    type Output = ();

    fn datasets(&self) -> Vec<DatasetRef> {
        vec![]
    }

    fn erase(_: Self::Output) -> Value {
        Value::unit()
    }
}

impl<T> Writes for Dataset<T>
where
    T: Send + Sync + 'static,
{
    type Output = T;

    fn datasets(&self) -> Vec<DatasetRef> {
        vec![self.erased().clone()]
    }

    fn erase(output: Self::Output) -> Value {
        Value::new(output)
    }
}

/// A task with one output binding commits its raw return value, so a 1-tuple
/// must not be wrapped in a sequence.
fn pack(mut items: Vec<Value>) -> Value {
    match items.len() {
        1 => items.remove(0),
        _ => Value::sequence(items),
    }
}

macro_rules! impl_bindings {
    ($($T:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($T),*> Reads for ($(Dataset<$T>,)*)
        where
            $($T: Send + Sync + 'static),*
        {
            type Output<'a> = ($(&'a $T,)*);

            fn datasets(&self) -> Vec<DatasetRef> {
                let ($($T,)*) = self;
                vec![$($T.erased().clone(),)*]
            }

            fn resolve<'a, G: Send + Sync>(&self, args: &Args<'a, G>) -> anyhow::Result<Self::Output<'a>> {
                let ($($T,)*) = self;
                Ok(($(args.get($T)?,)*))
            }
        }

        #[allow(non_snake_case)]
        impl<$($T),*> Writes for ($(Dataset<$T>,)*)
        where
            $($T: Send + Sync + 'static),*
        {
            type Output = ($($T,)*);

            fn datasets(&self) -> Vec<DatasetRef> {
                let ($($T,)*) = self;
                vec![$($T.erased().clone(),)*]
            }

            fn erase(output: Self::Output) -> Value {
                let ($($T,)*) = output;
                pack(vec![$(Value::new($T),)*])
            }
        }
    };
}

impl_bindings!(A);
impl_bindings!(A, B);
impl_bindings!(A, B, C);
impl_bindings!(A, B, C, D);
impl_bindings!(A, B, C, D, E);
impl_bindings!(A, B, C, D, E, F);
impl_bindings!(A, B, C, D, E, F, H);
impl_bindings!(A, B, C, D, E, F, H, I);

impl<G: Send + Sync + 'static> TaskDef<G> {
    /// Declares a typed task.
    ///
    /// Each dataset in `reads` is bound to an input parameter named after the
    /// dataset. Distinct datasets sharing a display name get `name#position`
    /// for every read after the first. The context is declared and each
    /// dataset in `writes` becomes an output binding.
    pub fn map<R, W, F>(self, reads: R, writes: W, callback: F) -> Result<Task<G>, SchemaError>
    where
        R: Reads + Send + Sync + 'static,
        W: Writes + 'static,
        F: for<'a> Fn(&TaskContext<'a, G>, R::Output<'a>) -> anyhow::Result<W::Output>
            + Send
            + Sync
            + 'static,
    {
        let mut def = self;
        let mut taken = HashSet::new();
        for (position, dataset) in reads.datasets().into_iter().enumerate() {
            let mut name = dataset.name().to_string();
            if !taken.insert(name.clone()) {
                name = format!("{}#{position}", dataset.name());
                taken.insert(name.clone());
            }
            def = def.input(name, &dataset);
        }
        def = def.context();
        for dataset in writes.datasets() {
            def = def.output(&dataset);
        }

        def.build(move |args| {
            let context = args
                .context()
                .ok_or_else(|| anyhow::anyhow!("task '{}' was invoked without a context", args.task()))?;
            let inputs = reads.resolve(args)?;
            let output = callback(context, inputs)?;
            Ok(W::erase(output))
        })
    }
}
