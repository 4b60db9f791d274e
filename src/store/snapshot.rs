// Snapshot of a remote location.
// Wraps the raw JSON value read from the store with its path and read time.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FetchError, Result};

/// Result of one read of a remote location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Path the snapshot was read from.
    pub path: String,
    /// Raw value, `None` when the location is empty.
    value: Option<Value>,
    /// When the read completed.
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot read now. A JSON `null` counts as empty.
    pub fn new(path: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            path: path.into(),
            value: value.filter(|v| !v.is_null()),
            fetched_at: Utc::now(),
        }
    }

    /// Snapshot of an empty location.
    pub fn empty(path: impl Into<String>) -> Self {
        Self::new(path, None)
    }

    /// The stored value, if any.
    pub fn val(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Whether the location held any data.
    pub fn exists(&self) -> bool {
        match &self.value {
            None => false,
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Array(items)) => items.iter().any(|v| !v.is_null()),
            Some(_) => true,
        }
    }

    /// Check if the snapshot is older than `max_age`.
    pub fn is_older_than(&self, max_age: Duration) -> bool {
        let elapsed = Utc::now()
            .signed_duration_since(self.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        elapsed > max_age
    }

    /// Convert the value into a key/value mapping in store order.
    ///
    /// Empty locations give an empty map. Arrays are keyed by index with
    /// `null` holes skipped. Any other scalar is rejected.
    pub fn into_mapping(self) -> Result<Map<String, Value>> {
        match self.value {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map),
            Some(Value::Array(items)) => Ok(items
                .into_iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(i, v)| (i.to_string(), v))
                .collect()),
            Some(other) => Err(FetchError::UnexpectedShape(format!(
                "{} holds {}",
                self.path, other
            ))),
        }
    }
}
