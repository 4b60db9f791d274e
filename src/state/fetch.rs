// Fetch result state.
// Holds the sequence and mapping views of one snapshot plus loading and error flags.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::FetchError;

/// One record derived from a snapshot key and its value.
///
/// The key is injected as a field holding the whole value, then the value's
/// own fields are merged on top.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    #[serde(skip)]
    key: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        let mut fields = Map::new();
        fields.insert(key.clone(), value.clone());
        if let Value::Object(own) = value {
            // Spread after injection: a field named like the key wins.
            for (name, v) in own {
                fields.insert(name, v);
            }
        }
        Self { key, fields }
    }

    /// The snapshot key this entry came from.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

/// Build one entry per key of `mapping`, in mapping order.
pub fn entries_from(mapping: &Map<String, Value>) -> Vec<Entry> {
    mapping
        .iter()
        .map(|(key, value)| Entry::new(key.clone(), value.clone()))
        .collect()
}

/// Coarse view of a [`FetchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Idle,
    Loading,
    Loaded,
    Failed,
}

/// What a fetcher exposes to its consumer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchResult {
    /// Entries in store order, `None` until the first successful read.
    pub sequence: Option<Vec<Entry>>,
    /// Raw key/value mapping, `None` until the first successful read.
    pub mapping: Option<Map<String, Value>>,
    pub is_loading: bool,
    /// Error from the most recent read, cleared on success.
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<Arc<FetchError>>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Key of the ref the views were read from.
    pub source: Option<String>,
}

impl FetchResult {
    pub fn status(&self) -> FetchStatus {
        if self.is_loading {
            FetchStatus::Loading
        } else if self.error.is_some() {
            FetchStatus::Failed
        } else if self.sequence.is_some() {
            FetchStatus::Loaded
        } else {
            FetchStatus::Idle
        }
    }

    pub fn is_fetched(&self) -> bool {
        self.sequence.is_some()
    }

    /// Look up a raw value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.mapping.as_ref()?.get(key)
    }

    pub(crate) fn set_loading(&mut self) {
        self.is_loading = true;
    }

    /// Replace both views from one mapping read from `source`.
    pub(crate) fn set_loaded(
        &mut self,
        source: &str,
        mapping: Map<String, Value>,
        fetched_at: DateTime<Utc>,
    ) {
        self.sequence = Some(entries_from(&mapping));
        self.mapping = Some(mapping);
        self.is_loading = false;
        self.error = None;
        self.fetched_at = Some(fetched_at);
        self.source = Some(source.to_string());
    }

    /// Record a failed read of `source`. Views from another ref are dropped.
    pub(crate) fn set_error(&mut self, source: &str, error: FetchError) {
        if self.source.as_deref() != Some(source) {
            self.clear_views();
        }
        self.is_loading = false;
        self.error = Some(Arc::new(error));
    }

    fn clear_views(&mut self) {
        self.sequence = None;
        self.mapping = None;
        self.fetched_at = None;
        self.source = None;
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<Arc<FetchError>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}
