use std::any::{Any, type_name};
use std::fmt::Debug;
use std::sync::Arc;

/// A type-erased, thread-safe container.
pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// A type-erased value flowing between tasks.
///
/// Task bodies return a `Value`. A task with a single output binding may
/// return anything, the whole value is committed to that dataset. A task with
/// several output bindings returns a [`Value::sequence`] whose items map to
/// the outputs by position.
///
/// Cloning is cheap, the payload is reference counted.
#[derive(Clone)]
pub struct Value(Repr);

#[derive(Clone)]
enum Repr {
    Item {
        data: Dynamic,
        type_name: &'static str,
    },
    Sequence(Vec<Value>),
}

impl Value {
    /// Wraps a single item.
    pub fn new<T>(item: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        Value(Repr::Item {
            data: Arc::new(item),
            type_name: type_name::<T>(),
        })
    }

    /// Builds an ordered sequence, used as the return value of multi-output
    /// tasks.
    pub fn sequence(items: impl IntoIterator<Item = Value>) -> Self {
        Value(Repr::Sequence(items.into_iter().collect()))
    }

    /// The empty sequence. Returned by typed tasks without outputs.
    pub fn unit() -> Self {
        Value(Repr::Sequence(Vec::new()))
    }

    /// Borrows the item as `T`, `None` for sequences or other types.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match &self.0 {
            Repr::Item { data, .. } => data.downcast_ref::<T>(),
            Repr::Sequence(_) => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match &self.0 {
            Repr::Item { .. } => None,
            Repr::Sequence(items) => Some(items),
        }
    }

    pub(crate) fn into_sequence(self) -> Result<Vec<Value>, Value> {
        match self.0 {
            Repr::Sequence(items) => Ok(items),
            item => Err(Value(item)),
        }
    }

    /// The Rust type name of the item, or `"sequence"`.
    pub fn type_name(&self) -> &'static str {
        match &self.0 {
            Repr::Item { type_name, .. } => type_name,
            Repr::Sequence(_) => "sequence",
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.0 {
            Repr::Item { type_name, .. } => write!(f, "Value({type_name})"),
            Repr::Sequence(items) => f.debug_list().entries(items).finish(),
        }
    }
}

/// The context injected into tasks that declare a context parameter.
///
/// It is immutable during task execution.
pub struct TaskContext<'a, G: Send + Sync = ()> {
    /// User-defined global data shared by the whole run.
    pub data: &'a G,
    /// Name of the running task.
    pub task: &'a str,
    /// Index of the execution level the task belongs to.
    pub level: usize,
    /// Tracing span assigned to this task.
    pub span: tracing::Span,
}

impl<G: Send + Sync> Debug for TaskContext<'_, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("task", &self.task)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let value = Value::new(42u32);
        assert_eq!(value.downcast_ref::<u32>(), Some(&42));
        assert_eq!(value.downcast_ref::<i64>(), None);
        assert_eq!(value.type_name(), "u32");
    }

    #[test]
    fn test_sequence() {
        let value = Value::sequence([Value::new(1u8), Value::new("two")]);
        let items = value.as_sequence().unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[1].downcast_ref::<&str>(), Some(&"two"));
        assert!(value.downcast_ref::<u8>().is_none());
    }

    #[test]
    fn test_into_sequence_rejects_item() {
        let value = Value::new(String::from("x"));
        let back = value.into_sequence().unwrap_err();
        assert_eq!(back.downcast_ref::<String>().map(String::as_str), Some("x"));
    }
}
