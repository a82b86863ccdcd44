//! The shared key-value collaborator and an in-memory implementation.
//!
//! Paths are flat strings; each path holds one JSON object. Notifications carry
//! the full value after a change (`None` once the path is deleted).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable while accessing {path}")]
    Unavailable { path: String },
    #[error("value at {path} is not an object")]
    NotAnObject { path: String },
}

pub type ChangeCallback = Box<dyn FnMut(Option<Value>) + Send>;

pub trait KeyValueStore {
    fn read(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Replaces the value at `path`. `Value::Null` deletes it.
    fn write(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Shallow update: top-level `fields` overwrite, siblings survive.
    fn merge(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError>;

    /// Delivers the current value immediately, then every later change.
    fn subscribe(&self, path: &str, on_change: ChangeCallback) -> Result<Subscription, StoreError>;
}

/// Handle that stops delivery when cancelled or dropped.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

type SharedCallback = Arc<Mutex<ChangeCallback>>;

struct Watcher {
    id: u64,
    path: String,
    callback: SharedCallback,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, Value>,
    watchers: Vec<Watcher>,
    next_id: u64,
    offline: bool,
    holding: bool,
    held: Vec<(SharedCallback, Option<Value>)>,
}

/// Process-local store. Clones share the same records, so two sessions built
/// from clones of one `MemoryStore` see each other's writes.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// While offline every operation fails with [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Queue notifications instead of delivering them.
    pub fn hold(&self) {
        self.lock().holding = true;
    }

    /// Deliver queued notifications in the order they were produced.
    pub fn release_held(&self) {
        let held = self.take_held();
        deliver(held);
    }

    /// Deliver queued notifications newest first.
    pub fn release_held_reversed(&self) {
        let mut held = self.take_held();
        held.reverse();
        deliver(held);
    }

    pub fn watcher_count(&self, path: &str) -> usize {
        self.lock()
            .watchers
            .iter()
            .filter(|watcher| watcher.path == path)
            .count()
    }

    fn take_held(&self) -> Vec<(SharedCallback, Option<Value>)> {
        let mut inner = self.lock();
        inner.holding = false;
        std::mem::take(&mut inner.held)
    }

    fn ensure_online(inner: &Inner, path: &str) -> Result<(), StoreError> {
        if inner.offline {
            Err(StoreError::Unavailable {
                path: path.to_string(),
            })
        } else {
            Ok(())
        }
    }

    /// Collects callbacks for `path` under the lock; the caller delivers after
    /// releasing it so callbacks may touch the store.
    fn pending_notifications(
        inner: &mut Inner,
        path: &str,
    ) -> Vec<(SharedCallback, Option<Value>)> {
        let value = inner.records.get(path).cloned();
        let pending: Vec<_> = inner
            .watchers
            .iter()
            .filter(|watcher| watcher.path == path)
            .map(|watcher| (Arc::clone(&watcher.callback), value.clone()))
            .collect();
        if inner.holding {
            inner.held.extend(pending);
            Vec::new()
        } else {
            pending
        }
    }
}

fn deliver(pending: Vec<(SharedCallback, Option<Value>)>) {
    for (callback, value) in pending {
        let mut callback = callback.lock().unwrap_or_else(PoisonError::into_inner);
        (*callback)(value);
    }
}

impl KeyValueStore for MemoryStore {
    fn read(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let inner = self.lock();
        Self::ensure_online(&inner, path)?;
        Ok(inner.records.get(path).cloned())
    }

    fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let pending = {
            let mut inner = self.lock();
            Self::ensure_online(&inner, path)?;
            if value.is_null() {
                inner.records.remove(path);
            } else {
                inner.records.insert(path.to_string(), value);
            }
            Self::pending_notifications(&mut inner, path)
        };
        deliver(pending);
        Ok(())
    }

    fn merge(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        let pending = {
            let mut inner = self.lock();
            Self::ensure_online(&inner, path)?;
            let record = inner
                .records
                .entry(path.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            let Value::Object(existing) = record else {
                return Err(StoreError::NotAnObject {
                    path: path.to_string(),
                });
            };
            existing.extend(fields);
            Self::pending_notifications(&mut inner, path)
        };
        deliver(pending);
        Ok(())
    }

    fn subscribe(&self, path: &str, on_change: ChangeCallback) -> Result<Subscription, StoreError> {
        let callback: SharedCallback = Arc::new(Mutex::new(on_change));
        let (id, current) = {
            let mut inner = self.lock();
            Self::ensure_online(&inner, path)?;
            let id = inner.next_id;
            inner.next_id += 1;
            inner.watchers.push(Watcher {
                id,
                path: path.to_string(),
                callback: Arc::clone(&callback),
            });
            (id, inner.records.get(path).cloned())
        };
        deliver(vec![(callback, current)]);

        let inner = Arc::clone(&self.inner);
        Ok(Subscription::new(move || {
            let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.watchers.retain(|watcher| watcher.id != id);
        }))
    }
}
