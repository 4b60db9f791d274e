// In-process data store.
// Holds a JSON tree addressed by slash-separated paths, with scripted read failures.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Map, Value};

use crate::error::{FetchError, Result};

use super::{DataRef, Snapshot};

#[derive(Debug, Default)]
struct Inner {
    root: Map<String, Value>,
    failures: HashMap<String, VecDeque<String>>,
    reads: HashMap<String, usize>,
}

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// Shared in-memory store. Clones refer to the same tree.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    id: u64,
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            id: NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed),
            inner: Arc::default(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identity shared by all clones of this store.
    pub fn id(&self) -> u64 {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a reference to `path`.
    pub fn reference(&self, path: impl Into<String>) -> MemoryRef {
        let path = normalize(&path.into());
        MemoryRef {
            key: format!("memory://{}/{}", self.id, path),
            store: self.clone(),
            path,
        }
    }

    /// Write `value` at `path`, creating intermediate objects.
    ///
    /// At the root only objects are accepted; `null` clears the whole tree.
    pub fn set(&self, path: &str, value: Value) {
        let mut inner = self.lock();
        let segments = segments(path);
        let Some((last, parents)) = segments.split_last() else {
            match value {
                Value::Object(map) => inner.root = map,
                Value::Null => inner.root.clear(),
                other => tracing::warn!(value = %other, "ignoring non-object write at store root"),
            }
            return;
        };

        let mut node = &mut inner.root;
        for segment in parents {
            let child = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            let Value::Object(map) = child else {
                return;
            };
            node = map;
        }

        if value.is_null() {
            node.remove(*last);
        } else {
            node.insert(last.to_string(), value);
        }
    }

    /// Delete the value at `path`.
    pub fn remove(&self, path: &str) {
        self.set(path, Value::Null);
    }

    /// Make the next read of `path` fail with `message`.
    pub fn fail_next(&self, path: &str, message: impl Into<String>) {
        self.lock()
            .failures
            .entry(normalize(path))
            .or_default()
            .push_back(message.into());
    }

    /// Number of reads issued against `path`.
    pub fn read_count(&self, path: &str) -> usize {
        self.lock().reads.get(&normalize(path)).copied().unwrap_or(0)
    }

    fn read(&self, path: &str) -> Result<Snapshot> {
        let mut inner = self.lock();
        *inner.reads.entry(path.to_string()).or_default() += 1;

        if let Some(message) = inner.failures.get_mut(path).and_then(|q| q.pop_front()) {
            return Err(FetchError::Other(message));
        }

        let mut segments = segments(path).into_iter();
        let value = match segments.next() {
            None => Some(Value::Object(inner.root.clone())),
            Some(first) => {
                let mut node = inner.root.get(first);
                for segment in segments {
                    node = node.and_then(|v| v.get(segment));
                }
                node.cloned()
            }
        };

        Ok(Snapshot::new(path, value))
    }
}

/// Reference to a path inside a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryRef {
    store: MemoryStore,
    path: String,
    /// Store id plus path, so equal paths in different stores differ.
    key: String,
}

impl MemoryRef {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reference to a child of this path.
    pub fn child(&self, name: &str) -> MemoryRef {
        self.store.reference(format!("{}/{}", self.path, name))
    }
}

impl DataRef for MemoryRef {
    fn key(&self) -> &str {
        &self.key
    }

    async fn once(&self) -> Result<Snapshot> {
        // Completion always arrives on a later poll, like a network read.
        tokio::task::yield_now().await;
        self.store.read(&self.path)
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn normalize(path: &str) -> String {
    segments(path).join("/")
}
