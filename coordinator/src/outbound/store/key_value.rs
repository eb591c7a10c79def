//! Flat typed key-value storage backing [`FlattenedGeofenceStore`].
//!
//! [`FlattenedGeofenceStore`]: super::FlattenedGeofenceStore

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::domain::ports::GeofenceStoreError;

/// A single typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StoredValue {
    /// Single precision float.
    Float(f32),
    /// 64-bit integer.
    Long(i64),
    /// 32-bit integer.
    Int(i32),
    /// UTF-8 text.
    Text(String),
}

/// A batch of writes applied as one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyValueEdit {
    puts: Vec<(String, StoredValue)>,
    removals: Vec<String>,
}

impl KeyValueEdit {
    /// Start an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn put(&mut self, key: impl Into<String>, value: StoredValue) -> &mut Self {
        self.puts.push((key.into(), value));
        self
    }

    /// Delete `key`. Removing a missing key is a no-op.
    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.removals.push(key.into());
        self
    }

    /// Whether the batch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.removals.is_empty()
    }

    /// Apply the batch to an in-memory map. Removals run before puts.
    pub(super) fn apply_to(self, entries: &mut BTreeMap<String, StoredValue>) {
        for key in self.removals {
            entries.remove(&key);
        }
        entries.extend(self.puts);
    }
}

/// Storage for typed values under string keys.
pub trait KeyValueBackend: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Result<Option<StoredValue>, GeofenceStoreError>;

    /// Commit every change in `edit`, or none of them.
    fn apply(&self, edit: KeyValueEdit) -> Result<(), GeofenceStoreError>;
}

/// Process-local backend.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueBackend {
    entries: Mutex<BTreeMap<String, StoredValue>>,
}

impl InMemoryKeyValueBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no key is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredValue>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueBackend for InMemoryKeyValueBackend {
    fn get(&self, key: &str) -> Result<Option<StoredValue>, GeofenceStoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn apply(&self, edit: KeyValueEdit) -> Result<(), GeofenceStoreError> {
        edit.apply_to(&mut self.lock());
        Ok(())
    }
}
