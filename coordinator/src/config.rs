//! Place settings loaded via OrthoConfig.

use std::path::PathBuf;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::domain::{Expiration, ParseTransitionError, PlaceSettings, TransitionMask};

const DEFAULT_PLACE_ID: &str = "1";
const DEFAULT_RADIUS_METERS: f32 = 50.0;
const DEFAULT_STORE_FILE: &str = "geofences.json";

/// Errors raised while turning loaded settings into [`PlaceSettings`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    /// Expiration that is neither `-1` nor a positive duration.
    #[error("expiration must be -1 (never) or a positive number of milliseconds, got {0}")]
    InvalidExpiration(i64),
    /// Radius that is not a positive finite number.
    #[error("radius must be positive and finite, got {0}")]
    InvalidRadius(f32),
    /// Transition list naming an unknown transition.
    #[error(transparent)]
    InvalidTransitions(#[from] ParseTransitionError),
}

/// Configuration for the saved place and where geofences are persisted.
#[derive(Debug, Clone, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "GEOFENCE")]
pub struct GeofenceSettings {
    /// Place identifier; also used as the geofence id.
    pub place_id: Option<String>,
    /// Geofence radius in metres.
    pub radius_meters: Option<f32>,
    /// Expiration in milliseconds, `-1` for never.
    pub expiration_ms: Option<i64>,
    /// Comma separated transitions to monitor, for example `enter,exit`.
    pub transitions: Option<String>,
    /// Path of the JSON file backing the geofence store.
    pub store_path: Option<PathBuf>,
}

impl GeofenceSettings {
    /// Return the configured place id, falling back to the default.
    #[must_use]
    pub fn place_id(&self) -> &str {
        self.place_id.as_deref().unwrap_or(DEFAULT_PLACE_ID)
    }

    /// Return the configured radius, falling back to the default.
    #[must_use]
    pub fn radius_meters(&self) -> f32 {
        self.radius_meters.unwrap_or(DEFAULT_RADIUS_METERS)
    }

    /// Return the configured store path, falling back to the working
    /// directory.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE))
    }

    /// Validate the loaded values and build session settings.
    pub fn place_settings(&self) -> Result<PlaceSettings, SettingsError> {
        let radius_meters = self.radius_meters();
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(SettingsError::InvalidRadius(radius_meters));
        }
        let expiration = self.expiration_ms.map_or(Ok(Expiration::Never), |millis| {
            Expiration::from_millis(millis)
                .filter(|_| millis != 0)
                .ok_or(SettingsError::InvalidExpiration(millis))
        })?;
        let transitions = self
            .transitions
            .as_deref()
            .map_or(Ok(TransitionMask::ENTER), str::parse::<TransitionMask>)?;
        Ok(PlaceSettings {
            place_id: self.place_id().to_owned(),
            radius_meters,
            expiration,
            transitions,
        })
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for place settings parsing.

    use super::*;
    use std::ffi::OsString;
    use std::time::Duration;

    use env_lock::lock_env;
    use rstest::rstest;

    const VARS: [&str; 5] = [
        "GEOFENCE_PLACE_ID",
        "GEOFENCE_RADIUS_METERS",
        "GEOFENCE_EXPIRATION_MS",
        "GEOFENCE_TRANSITIONS",
        "GEOFENCE_STORE_PATH",
    ];

    fn load_from_empty_args() -> GeofenceSettings {
        GeofenceSettings::load_from_iter([OsString::from("geofence-demo")])
            .expect("config should load")
    }

    fn cleared() -> Vec<(&'static str, Option<String>)> {
        VARS.iter().map(|name| (*name, None)).collect()
    }

    #[rstest]
    fn default_values_are_used_when_missing() {
        let _guard = lock_env(cleared());

        let settings = load_from_empty_args();
        assert_eq!(settings.store_path(), PathBuf::from(DEFAULT_STORE_FILE));
        assert_eq!(
            settings.place_settings().expect("defaults are valid"),
            PlaceSettings::default()
        );
    }

    #[rstest]
    #[expect(clippy::float_arithmetic, reason = "radius compared within tolerance")]
    fn environment_overrides_are_respected() {
        let _guard = lock_env([
            ("GEOFENCE_PLACE_ID", Some("home".to_owned())),
            ("GEOFENCE_RADIUS_METERS", Some("120".to_owned())),
            ("GEOFENCE_EXPIRATION_MS", Some("60000".to_owned())),
            ("GEOFENCE_TRANSITIONS", Some("enter,exit".to_owned())),
            ("GEOFENCE_STORE_PATH", Some("/tmp/places.json".to_owned())),
        ]);

        let settings = load_from_empty_args();
        let place = settings.place_settings().expect("valid settings");
        assert_eq!(place.place_id, "home");
        assert!((place.radius_meters - 120.0).abs() < f32::EPSILON);
        assert_eq!(
            place.expiration,
            Expiration::After(Duration::from_millis(60_000))
        );
        assert_eq!(
            place.transitions,
            TransitionMask::ENTER | TransitionMask::EXIT
        );
        assert_eq!(settings.store_path(), PathBuf::from("/tmp/places.json"));
    }

    #[rstest]
    #[case(Some(0), None, None)]
    #[case(None, Some("-5"), None)]
    #[case(None, None, Some("hover"))]
    fn invalid_values_are_rejected(
        #[case] expiration_ms: Option<i64>,
        #[case] radius: Option<&str>,
        #[case] transitions: Option<&str>,
    ) {
        let settings = GeofenceSettings {
            place_id: None,
            radius_meters: radius.map(|raw| raw.parse().expect("numeric radius")),
            expiration_ms,
            transitions: transitions.map(str::to_owned),
            store_path: None,
        };
        assert!(settings.place_settings().is_err());
    }
}
