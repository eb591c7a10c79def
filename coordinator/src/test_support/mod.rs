//! Test utilities for the geofence coordinator crate.
//!
//! Shared by unit tests (in `src/`) and integration tests (in `tests/`).
//! Only compiled for tests or with the `test-support` feature.

pub mod location_service;

pub use location_service::{ConnectBehaviour, ScriptedLocationService, ServiceCall};

use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::domain::ports::{LocationReminder, Notifier};
use crate::domain::{
    Coordinates, Expiration, GeofenceDefinition, Locale, NewGeofence, TransitionMask,
};
use crate::outbound::{FlattenedGeofenceStore, JsonFileKeyValueBackend};

/// Notifier that keeps every reminder it receives.
#[derive(Clone, Default)]
pub struct RecordingNotifier(Arc<Mutex<Vec<LocationReminder>>>);

impl RecordingNotifier {
    /// Every reminder received so far.
    ///
    /// # Panics
    ///
    /// Panics if the reminder mutex is poisoned.
    #[must_use]
    pub fn reminders(&self) -> Vec<LocationReminder> {
        self.0
            .lock()
            .unwrap_or_else(|_| panic!("notifier mutex poisoned"))
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, reminder: &LocationReminder) {
        self.0
            .lock()
            .unwrap_or_else(|_| panic!("notifier mutex poisoned"))
            .push(reminder.clone());
    }
}

/// Build a valid enter-only geofence centred on `(latitude, longitude)`.
///
/// # Panics
///
/// Panics if the coordinates are out of range.
#[must_use]
pub fn sample_geofence(id: &str, latitude: f64, longitude: f64) -> GeofenceDefinition {
    let center = Coordinates::new(latitude, longitude)
        .unwrap_or_else(|error| panic!("sample coordinates invalid: {error}"));
    let input = NewGeofence {
        id: id.to_owned(),
        center,
        radius_meters: 50.0,
        expiration: Expiration::Never,
        transitions: TransitionMask::ENTER,
        place_id: id.to_owned(),
        locale: Locale {
            country: "Spain".to_owned(),
            city: "Madrid".to_owned(),
            address: "Calle Mayor 1".to_owned(),
        },
    };
    GeofenceDefinition::try_new(input)
        .unwrap_or_else(|error| panic!("sample geofence invalid: {error}"))
}

/// Geofence store persisted under a temporary directory.
///
/// The directory is removed when the returned [`TempDir`] is dropped.
///
/// # Panics
///
/// Panics if the directory or the store file cannot be created.
#[must_use]
pub fn temp_json_store() -> (TempDir, FlattenedGeofenceStore<JsonFileKeyValueBackend>) {
    let dir = TempDir::new().unwrap_or_else(|error| panic!("create temp dir: {error}"));
    let backend = JsonFileKeyValueBackend::open(&dir.path().join("geofences.json"))
        .unwrap_or_else(|error| panic!("open json store: {error}"));
    (dir, FlattenedGeofenceStore::new(backend))
}
