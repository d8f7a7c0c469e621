//! Datasets are identity tokens for the data flowing between tasks.
//!
//! A [`Dataset<T>`] carries no data. It names one logical artifact and holds
//! the value type `T` in `PhantomData`, so that a task reading it gets back a
//! `&T`. Identity is allocated on construction and never derived from the
//! name: two datasets called `"events"` are two different graph nodes.
//!
//! The graph itself is type-erased and keys everything by [`DatasetRef`].

use std::collections::BTreeMap;
use std::fmt::{Debug, Display};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Unique identity of a dataset within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(u64);

impl DatasetId {
    fn fresh() -> Self {
        DatasetId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A single named, typed column of a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub kind: String,
}

/// Optional structural description of a dataset.
///
/// The engine never interprets it; it is carried along so that downstream
/// consumers of the exported graph can see it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, kind: impl Into<String>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            kind: kind.into(),
        });
        self
    }
}

/// Descriptive part of a dataset: display name, schema and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub name: String,
    pub schema: Option<Schema>,
    pub metadata: BTreeMap<String, String>,
}

impl DatasetInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Type-erased dataset handle, used as the node key of the graph.
///
/// Equality and hashing go through the identity only.
#[derive(Clone)]
pub struct DatasetRef {
    id: DatasetId,
    info: Arc<DatasetInfo>,
}

impl DatasetRef {
    fn new(info: DatasetInfo) -> Self {
        Self {
            id: DatasetId::fresh(),
            info: Arc::new(info),
        }
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.info.schema.as_ref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.info.metadata
    }

    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }
}

impl PartialEq for DatasetRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DatasetRef {}

impl Hash for DatasetRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Debug for DatasetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Dataset({}{})", self.info.name, self.id)
    }
}

impl Display for DatasetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.info.name)
    }
}

impl AsRef<DatasetRef> for DatasetRef {
    fn as_ref(&self) -> &DatasetRef {
        self
    }
}

/// A typed token representing one logical data artifact.
///
/// Cloning keeps the identity; constructing a new one never does.
///
/// ```rust
/// use suiro::Dataset;
///
/// let a = Dataset::<Vec<u8>>::new("blob");
/// let b = Dataset::<Vec<u8>>::new("blob");
/// assert_ne!(a.id(), b.id());
/// assert_eq!(a.id(), a.clone().id());
/// ```
pub struct Dataset<T> {
    inner: DatasetRef,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Dataset<T> {
    /// Creates a fresh dataset with only a display name.
    pub fn new(name: impl Into<String>) -> Self {
        Self::describe(DatasetInfo::new(name))
    }

    /// Creates a fresh dataset with schema and metadata.
    pub fn describe(info: DatasetInfo) -> Self {
        Self {
            inner: DatasetRef::new(info),
            _phantom: PhantomData,
        }
    }

    pub fn id(&self) -> DatasetId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Returns the type-erased handle.
    pub fn erased(&self) -> &DatasetRef {
        &self.inner
    }
}

impl<T> Clone for Dataset<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _phantom: PhantomData,
        }
    }
}

impl<T> AsRef<DatasetRef> for Dataset<T> {
    fn as_ref(&self) -> &DatasetRef {
        &self.inner
    }
}

impl<T> PartialEq for Dataset<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<T> Eq for Dataset<T> {}

impl<T> Hash for Dataset<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl<T> Debug for Dataset<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.inner, f)
    }
}

impl<T> From<&Dataset<T>> for DatasetRef {
    fn from(value: &Dataset<T>) -> Self {
        value.inner.clone()
    }
}
