//! Geofence persistence adapters.

mod flattened;
mod json_file;
mod key_value;

pub use flattened::FlattenedGeofenceStore;
pub use json_file::JsonFileKeyValueBackend;
pub use key_value::{InMemoryKeyValueBackend, KeyValueBackend, KeyValueEdit, StoredValue};
