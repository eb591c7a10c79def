//! Port for persisting geofence definitions between sessions.

use async_trait::async_trait;

use super::define_port_error;
use crate::domain::GeofenceDefinition;

define_port_error! {
    /// Errors raised by geofence store adapters.
    pub enum GeofenceStoreError {
        /// Reading or writing the backing storage failed.
        Io { message: String } => "geofence store I/O failed: {message}",
        /// Stored contents could not be decoded.
        Corrupt { message: String } => "geofence store contents are corrupt: {message}",
    }
}

/// Keyed persistence for geofence definitions.
///
/// Reads return either a fully populated definition or `None`; a partially
/// written record is never surfaced.
#[async_trait]
pub trait GeofenceStore: Send + Sync {
    /// Fetch the definition stored under `id`.
    async fn get(&self, id: &str) -> Result<Option<GeofenceDefinition>, GeofenceStoreError>;

    /// Fetch every stored definition among `ids`, skipping missing ones.
    async fn get_all(&self, ids: &[String]) -> Result<Vec<GeofenceDefinition>, GeofenceStoreError>;

    /// Insert or replace the definition stored under its own id.
    async fn put(&self, geofence: &GeofenceDefinition) -> Result<(), GeofenceStoreError>;

    /// Remove a definition. Deleting a missing id is a no-op.
    async fn delete(&self, id: &str) -> Result<(), GeofenceStoreError>;

    /// Remove every definition among `ids` in one commit.
    async fn delete_many(&self, ids: &[String]) -> Result<(), GeofenceStoreError>;
}
