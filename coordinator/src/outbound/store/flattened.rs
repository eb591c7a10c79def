//! Geofence store that flattens each definition into typed keys.
//!
//! A definition with id `7` occupies keys such as `geofence_7_LATITUDE`.
//! Coordinates and the radius are stored as `f32`, so a round trip keeps
//! them only to single precision.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::key_value::{KeyValueBackend, KeyValueEdit, StoredValue};
use crate::domain::ports::{GeofenceStore, GeofenceStoreError};
use crate::domain::{
    Coordinates, Expiration, GeofenceDefinition, Locale, NewGeofence, TransitionMask,
};

const KEY_PREFIX: &str = "geofence";

const LATITUDE: &str = "LATITUDE";
const LONGITUDE: &str = "LONGITUDE";
const RADIUS: &str = "RADIUS";
const EXPIRATION_DURATION: &str = "EXPIRATION_DURATION";
const TRANSITION_TYPE: &str = "TRANSITION_TYPE";
const PLACE_ID: &str = "PLACE_ID";
const COUNTRY: &str = "COUNTRY";
const CITY: &str = "CITY";
const ADDRESS: &str = "ADDRESS";

const FIELDS: [&str; 9] = [
    LATITUDE,
    LONGITUDE,
    RADIUS,
    EXPIRATION_DURATION,
    TRANSITION_TYPE,
    PLACE_ID,
    COUNTRY,
    CITY,
    ADDRESS,
];

#[expect(
    clippy::cast_possible_truncation,
    reason = "coordinates are persisted as f32"
)]
fn narrow(degrees: f64) -> f32 {
    degrees as f32
}

/// [`GeofenceStore`] over any [`KeyValueBackend`].
#[derive(Debug)]
pub struct FlattenedGeofenceStore<B> {
    backend: B,
}

impl<B: KeyValueBackend> FlattenedGeofenceStore<B> {
    /// Store definitions in `backend`.
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// The backend holding the flattened keys.
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    fn key(id: &str, field: &str) -> String {
        format!("{KEY_PREFIX}_{id}_{field}")
    }

    fn float(&self, id: &str, field: &str) -> Result<Option<f32>, GeofenceStoreError> {
        Ok(match self.backend.get(&Self::key(id, field))? {
            Some(StoredValue::Float(value)) => Some(value),
            _ => None,
        })
    }

    fn long(&self, id: &str, field: &str) -> Result<Option<i64>, GeofenceStoreError> {
        Ok(match self.backend.get(&Self::key(id, field))? {
            Some(StoredValue::Long(value)) => Some(value),
            _ => None,
        })
    }

    fn int(&self, id: &str, field: &str) -> Result<Option<i32>, GeofenceStoreError> {
        Ok(match self.backend.get(&Self::key(id, field))? {
            Some(StoredValue::Int(value)) => Some(value),
            _ => None,
        })
    }

    fn text(&self, id: &str, field: &str) -> Result<String, GeofenceStoreError> {
        Ok(match self.backend.get(&Self::key(id, field))? {
            Some(StoredValue::Text(value)) => value,
            _ => String::new(),
        })
    }

    fn read(&self, id: &str) -> Result<Option<GeofenceDefinition>, GeofenceStoreError> {
        let (
            Some(latitude),
            Some(longitude),
            Some(radius),
            Some(raw_expiration),
            Some(raw_transitions),
        ) = (
            self.float(id, LATITUDE)?,
            self.float(id, LONGITUDE)?,
            self.float(id, RADIUS)?,
            self.long(id, EXPIRATION_DURATION)?,
            self.int(id, TRANSITION_TYPE)?,
        )
        else {
            return Ok(None);
        };
        let place_id = self.text(id, PLACE_ID)?;
        if place_id.is_empty() {
            return Ok(None);
        }

        let (Some(expiration), Some(transitions)) = (
            Expiration::from_millis(raw_expiration),
            TransitionMask::from_bits(raw_transitions),
        ) else {
            warn!(
                id,
                "stored geofence has an invalid expiration or transition mask"
            );
            return Ok(None);
        };
        let Ok(center) = Coordinates::new(f64::from(latitude), f64::from(longitude))
            .inspect_err(|error| warn!(id, %error, "stored geofence has invalid coordinates"))
        else {
            return Ok(None);
        };
        let input = NewGeofence {
            id: id.to_owned(),
            center,
            radius_meters: radius,
            expiration,
            transitions,
            place_id,
            locale: Locale {
                country: self.text(id, COUNTRY)?,
                city: self.text(id, CITY)?,
                address: self.text(id, ADDRESS)?,
            },
        };
        Ok(GeofenceDefinition::try_new(input)
            .inspect_err(|error| warn!(id, %error, "stored geofence failed validation"))
            .ok())
    }

    fn removal(edit: &mut KeyValueEdit, id: &str) {
        for field in FIELDS {
            edit.remove(Self::key(id, field));
        }
    }
}

#[async_trait]
impl<B: KeyValueBackend> GeofenceStore for FlattenedGeofenceStore<B> {
    async fn get(&self, id: &str) -> Result<Option<GeofenceDefinition>, GeofenceStoreError> {
        self.read(id)
    }

    async fn get_all(&self, ids: &[String]) -> Result<Vec<GeofenceDefinition>, GeofenceStoreError> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(geofence) = self.read(id)? {
                found.push(geofence);
            }
        }
        Ok(found)
    }

    async fn put(&self, geofence: &GeofenceDefinition) -> Result<(), GeofenceStoreError> {
        let id = geofence.id();
        let center = geofence.center();
        let locale = geofence.locale();
        let mut edit = KeyValueEdit::new();
        edit.put(
            Self::key(id, LATITUDE),
            StoredValue::Float(narrow(center.latitude())),
        )
        .put(
            Self::key(id, LONGITUDE),
            StoredValue::Float(narrow(center.longitude())),
        )
        .put(
            Self::key(id, RADIUS),
            StoredValue::Float(geofence.radius_meters()),
        )
        .put(
            Self::key(id, EXPIRATION_DURATION),
            StoredValue::Long(geofence.expiration().to_millis()),
        )
        .put(
            Self::key(id, TRANSITION_TYPE),
            StoredValue::Int(geofence.transitions().bits()),
        )
        .put(
            Self::key(id, PLACE_ID),
            StoredValue::Text(geofence.place_id().to_owned()),
        )
        .put(
            Self::key(id, COUNTRY),
            StoredValue::Text(locale.country.clone()),
        )
        .put(Self::key(id, CITY), StoredValue::Text(locale.city.clone()))
        .put(
            Self::key(id, ADDRESS),
            StoredValue::Text(locale.address.clone()),
        );
        self.backend.apply(edit)?;
        debug!(id, "stored geofence");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), GeofenceStoreError> {
        let mut edit = KeyValueEdit::new();
        Self::removal(&mut edit, id);
        self.backend.apply(edit)
    }

    async fn delete_many(&self, ids: &[String]) -> Result<(), GeofenceStoreError> {
        let mut edit = KeyValueEdit::new();
        for id in ids {
            Self::removal(&mut edit, id);
        }
        if edit.is_empty() {
            return Ok(());
        }
        self.backend.apply(edit)?;
        debug!(count = ids.len(), "deleted geofences");
        Ok(())
    }
}
