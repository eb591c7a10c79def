//! JSON file backend for the flattened geofence store.
//!
//! The whole key space lives in one JSON object. Every committed edit
//! rewrites the file through a temporary sibling and a rename, so readers
//! never observe a partially written file.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use cap_std::ambient_authority;
use cap_std::fs::{Dir, OpenOptions};
use tracing::debug;

use super::key_value::{KeyValueBackend, KeyValueEdit, StoredValue};
use crate::domain::ports::GeofenceStoreError;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Key-value backend persisted to a single JSON file.
#[derive(Debug)]
pub struct JsonFileKeyValueBackend {
    dir: Dir,
    file_name: String,
    entries: Mutex<BTreeMap<String, StoredValue>>,
}

impl JsonFileKeyValueBackend {
    /// Open the store at `path`, creating its parent directory when needed.
    /// A missing file is treated as an empty store.
    pub fn open(path: &Path) -> Result<Self, GeofenceStoreError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                GeofenceStoreError::io(format!("{} does not name a file", path.display()))
            })?
            .to_owned();
        let parent = match path.parent() {
            Some(named) if !named.as_os_str().is_empty() => named,
            _ => Path::new("."),
        };
        Dir::create_ambient_dir_all(parent, ambient_authority()).map_err(io_error)?;
        let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(io_error)?;

        let entries = match dir.read_to_string(&file_name) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|error| GeofenceStoreError::corrupt(error.to_string()))?,
            Err(error) if error.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => return Err(io_error(error)),
        };
        debug!(path = %path.display(), keys = entries.len(), "opened geofence store");

        Ok(Self {
            dir,
            file_name,
            entries: Mutex::new(entries),
        })
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

    fn write_atomic(&self, contents: &str) -> Result<(), GeofenceStoreError> {
        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(".{}.tmp.{}.{counter}", self.file_name, std::process::id());

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        let written = self
            .dir
            .open_with(&tmp_name, &options)
            .and_then(|mut file| {
                file.write_all(contents.as_bytes())?;
                file.sync_all()
            })
            .and_then(|()| self.dir.rename(&tmp_name, &self.dir, &self.file_name));

        if let Err(error) = written {
            drop(self.dir.remove_file(&tmp_name));
            return Err(io_error(error));
        }
        Ok(())
    }
}

impl KeyValueBackend for JsonFileKeyValueBackend {
    fn get(&self, key: &str) -> Result<Option<StoredValue>, GeofenceStoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn apply(&self, edit: KeyValueEdit) -> Result<(), GeofenceStoreError> {
        let mut entries = self.lock();
        let mut next = entries.clone();
        edit.apply_to(&mut next);
        let contents = serde_json::to_string_pretty(&next)
            .map_err(|error| GeofenceStoreError::corrupt(error.to_string()))?;
        self.write_atomic(&contents)?;
        *entries = next;
        Ok(())
    }
}

fn io_error(error: io::Error) -> GeofenceStoreError {
    GeofenceStoreError::io(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn committed_edits_survive_reopening() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("nested").join("geofences.json");

        let backend = JsonFileKeyValueBackend::open(&path).expect("open empty store");
        let mut edit = KeyValueEdit::new();
        edit.put("a", StoredValue::Float(1.5))
            .put("b", StoredValue::Text("hello".to_owned()));
        backend.apply(edit).expect("commit");

        let reopened = JsonFileKeyValueBackend::open(&path).expect("reopen");
        assert_eq!(
            reopened.get("a").expect("read"),
            Some(StoredValue::Float(1.5))
        );
        assert_eq!(
            reopened.get("b").expect("read"),
            Some(StoredValue::Text("hello".to_owned()))
        );
    }

    #[rstest]
    fn removals_are_persisted() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("geofences.json");
        let backend = JsonFileKeyValueBackend::open(&path).expect("open");

        let mut edit = KeyValueEdit::new();
        edit.put("a", StoredValue::Long(-1));
        backend.apply(edit).expect("commit put");
        let mut edit = KeyValueEdit::new();
        edit.remove("a");
        backend.apply(edit).expect("commit removal");

        let reopened = JsonFileKeyValueBackend::open(&path).expect("reopen");
        assert_eq!(reopened.get("a").expect("read"), None);
    }

    #[rstest]
    fn unreadable_contents_are_reported_as_corrupt() {
        let temp = tempfile::tempdir().expect("temp dir");
        let path = temp.path().join("geofences.json");
        let dir = Dir::open_ambient_dir(temp.path(), ambient_authority()).expect("open dir");
        dir.write("geofences.json", "not json").expect("seed file");

        let error = JsonFileKeyValueBackend::open(&path).expect_err("corrupt file");
        assert!(matches!(error, GeofenceStoreError::Corrupt { .. }));
    }
}
