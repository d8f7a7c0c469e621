use serde::{Deserialize, Serialize};

use crate::error::SuiroError;

/// How a pipeline runs its tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run the tasks one at a time, in schedule order, on the calling thread.
    #[default]
    Sequential,
    /// Run each execution level on a thread pool.
    Parallel {
        /// Worker count, rayon's default when absent.
        #[serde(default)]
        threads: Option<usize>,
    },
}

/// Run options of a [`Pipeline`](crate::Pipeline).
///
/// ```rust
/// use suiro::{ExecutionMode, Options};
///
/// let options = Options::from_json(r#"{ "mode": "parallel", "threads": 4 }"#).unwrap();
/// assert_eq!(options.mode, ExecutionMode::Parallel { threads: Some(4) });
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    #[serde(flatten)]
    pub mode: ExecutionMode,
}

impl Options {
    pub fn sequential() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
        }
    }

    pub fn parallel(threads: Option<usize>) -> Self {
        Self {
            mode: ExecutionMode::Parallel { threads },
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SuiroError> {
        Ok(serde_json::from_str(json)?)
    }
}
