//! Geofence data model.
//!
//! A [`GeofenceDefinition`] is always valid once constructed: the id is
//! non-empty, the centre lies within WGS84 bounds, the radius is a positive
//! finite number of metres and at least one transition is requested.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;
use std::time::Duration;

/// Wire value used for [`Expiration::Never`].
pub const NEVER_EXPIRE_MILLIS: i64 = -1;

/// Validation errors returned by [`GeofenceDefinition::try_new`] and
/// [`Coordinates::new`].
#[derive(Debug, Clone, PartialEq)]
pub enum GeofenceValidationError {
    /// The id is empty or blank.
    EmptyId,
    /// Latitude outside `[-90, 90]`.
    LatitudeOutOfRange {
        /// The rejected latitude.
        value: f64,
    },
    /// Longitude outside `[-180, 180]`.
    LongitudeOutOfRange {
        /// The rejected longitude.
        value: f64,
    },
    /// Radius that is not a positive finite number.
    InvalidRadius {
        /// The rejected radius.
        value: f32,
    },
    /// No transition was requested.
    EmptyTransitions,
}

impl fmt::Display for GeofenceValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyId => write!(f, "geofence id must not be empty"),
            Self::LatitudeOutOfRange { value } => {
                write!(f, "latitude {value} must lie within [-90, 90]")
            }
            Self::LongitudeOutOfRange { value } => {
                write!(f, "longitude {value} must lie within [-180, 180]")
            }
            Self::InvalidRadius { value } => {
                write!(f, "radius {value} must be a positive number of metres")
            }
            Self::EmptyTransitions => write!(f, "at least one transition type is required"),
        }
    }
}

impl std::error::Error for GeofenceValidationError {}

/// A WGS84 latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl Coordinates {
    /// Validate and construct a coordinate pair.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, GeofenceValidationError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(GeofenceValidationError::LatitudeOutOfRange { value: latitude });
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(GeofenceValidationError::LongitudeOutOfRange { value: longitude });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Latitude in degrees.
    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Longitude in degrees.
    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// How long a geofence stays registered with the location service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiration {
    /// Registered until removed.
    #[default]
    Never,
    /// Dropped by the service once the duration has passed.
    After(Duration),
}

impl Expiration {
    /// Encode as milliseconds, using [`NEVER_EXPIRE_MILLIS`] for `Never`.
    #[must_use]
    pub fn to_millis(self) -> i64 {
        match self {
            Self::Never => NEVER_EXPIRE_MILLIS,
            Self::After(duration) => i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
        }
    }

    /// Decode a millisecond value. Negative values other than
    /// [`NEVER_EXPIRE_MILLIS`] are rejected.
    #[must_use]
    pub fn from_millis(millis: i64) -> Option<Self> {
        if millis == NEVER_EXPIRE_MILLIS {
            return Some(Self::Never);
        }
        u64::try_from(millis)
            .ok()
            .map(|value| Self::After(Duration::from_millis(value)))
    }
}

/// Bit set of the transitions a geofence reports.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionMask(u8);

impl TransitionMask {
    /// The device entered the geofence.
    pub const ENTER: Self = Self(1);
    /// The device left the geofence.
    pub const EXIT: Self = Self(2);
    /// The device lingered inside the geofence.
    pub const DWELL: Self = Self(4);

    const ALL_BITS: u8 = 1 | 2 | 4;

    /// Raw bit value as stored and sent over the wire.
    #[must_use]
    pub fn bits(self) -> i32 {
        i32::from(self.0)
    }

    /// Decode a raw bit value, rejecting empty masks and unknown bits.
    #[must_use]
    pub fn from_bits(bits: i32) -> Option<Self> {
        let byte = u8::try_from(bits).ok()?;
        (byte != 0 && byte & !Self::ALL_BITS == 0).then_some(Self(byte))
    }

    /// Whether every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether no transition is selected.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for TransitionMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for TransitionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (Self::ENTER, "ENTER"),
            (Self::EXIT, "EXIT"),
            (Self::DWELL, "DWELL"),
        ];
        let names: Vec<&str> = flags
            .into_iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
            .collect();
        write!(f, "TransitionMask({})", names.join(" | "))
    }
}

/// Error returned when parsing a transition list such as `"enter,exit"`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown transition `{0}` (expected enter, exit or dwell)")]
pub struct ParseTransitionError(pub String);

impl FromStr for TransitionMask {
    type Err = ParseTransitionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut mask = Self(0);
        for part in value
            .split(',')
            .map(str::trim)
            .filter(|piece| !piece.is_empty())
        {
            let flag = match part.to_ascii_lowercase().as_str() {
                "enter" => Self::ENTER,
                "exit" => Self::EXIT,
                "dwell" => Self::DWELL,
                _ => return Err(ParseTransitionError(part.to_owned())),
            };
            mask = mask | flag;
        }
        if mask.is_empty() {
            return Err(ParseTransitionError(value.to_owned()));
        }
        Ok(mask)
    }
}

/// Human readable location details attached to a geofence.
///
/// Empty strings stand for unknown values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locale {
    /// Country name.
    pub country: String,
    /// City name.
    pub city: String,
    /// Street address.
    pub address: String,
}

/// Unvalidated input for [`GeofenceDefinition::try_new`].
#[derive(Debug, Clone)]
pub struct NewGeofence {
    /// Identifier the geofence is registered under.
    pub id: String,
    /// Centre of the circular region.
    pub center: Coordinates,
    /// Radius of the region in metres.
    pub radius_meters: f32,
    /// How long the registration lasts.
    pub expiration: Expiration,
    /// Transitions to report.
    pub transitions: TransitionMask,
    /// Saved place the geofence belongs to.
    pub place_id: String,
    /// Location details shown to the user.
    pub locale: Locale,
}

/// A circular region the location service monitors.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceDefinition {
    id: String,
    center: Coordinates,
    radius_meters: f32,
    expiration: Expiration,
    transitions: TransitionMask,
    place_id: String,
    locale: Locale,
}

impl GeofenceDefinition {
    /// Validate and construct a geofence.
    ///
    /// # Examples
    /// ```
    /// use geofence_coordinator::domain::{
    ///     Coordinates, Expiration, GeofenceDefinition, Locale, NewGeofence, TransitionMask,
    /// };
    ///
    /// let geofence = GeofenceDefinition::try_new(NewGeofence {
    ///     id: "1".into(),
    ///     center: Coordinates::new(51.5, -0.12)?,
    ///     radius_meters: 50.0,
    ///     expiration: Expiration::Never,
    ///     transitions: TransitionMask::ENTER,
    ///     place_id: "1".into(),
    ///     locale: Locale::default(),
    /// })?;
    /// assert_eq!(geofence.id(), "1");
    /// # Ok::<(), geofence_coordinator::domain::GeofenceValidationError>(())
    /// ```
    pub fn try_new(input: NewGeofence) -> Result<Self, GeofenceValidationError> {
        let NewGeofence {
            id,
            center,
            radius_meters,
            expiration,
            transitions,
            place_id,
            locale,
        } = input;

        if id.trim().is_empty() {
            return Err(GeofenceValidationError::EmptyId);
        }
        if !radius_meters.is_finite() || radius_meters <= 0.0 {
            return Err(GeofenceValidationError::InvalidRadius {
                value: radius_meters,
            });
        }
        if transitions.is_empty() {
            return Err(GeofenceValidationError::EmptyTransitions);
        }

        Ok(Self {
            id,
            center,
            radius_meters,
            expiration,
            transitions,
            place_id,
            locale,
        })
    }

    /// Identifier the geofence is registered under.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Centre of the region.
    #[must_use]
    pub const fn center(&self) -> Coordinates {
        self.center
    }

    /// Radius of the region in metres.
    #[must_use]
    pub const fn radius_meters(&self) -> f32 {
        self.radius_meters
    }

    /// How long the registration lasts.
    #[must_use]
    pub const fn expiration(&self) -> Expiration {
        self.expiration
    }

    /// Transitions the service reports.
    #[must_use]
    pub const fn transitions(&self) -> TransitionMask {
        self.transitions
    }

    /// Identifier of the saved place this geofence belongs to.
    #[must_use]
    pub fn place_id(&self) -> &str {
        &self.place_id
    }

    /// Location details shown to the user.
    #[must_use]
    pub const fn locale(&self) -> &Locale {
        &self.locale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn input() -> NewGeofence {
        NewGeofence {
            id: "1".to_owned(),
            center: Coordinates::new(40.4168, -3.7038).expect("valid coordinates"),
            radius_meters: 50.0,
            expiration: Expiration::Never,
            transitions: TransitionMask::ENTER,
            place_id: "1".to_owned(),
            locale: Locale {
                country: "Spain".to_owned(),
                city: "Madrid".to_owned(),
                address: "Puerta del Sol".to_owned(),
            },
        }
    }

    #[rstest]
    fn valid_input_is_accepted(input: NewGeofence) {
        let geofence = GeofenceDefinition::try_new(input).expect("valid geofence");
        assert_eq!(geofence.id(), "1");
        assert_eq!(geofence.locale().city, "Madrid");
        assert!(geofence.transitions().contains(TransitionMask::ENTER));
    }

    #[rstest]
    #[case("", GeofenceValidationError::EmptyId)]
    #[case("   ", GeofenceValidationError::EmptyId)]
    fn blank_ids_are_rejected(
        mut input: NewGeofence,
        #[case] id: &str,
        #[case] expected: GeofenceValidationError,
    ) {
        input.id = id.to_owned();
        assert_eq!(GeofenceDefinition::try_new(input), Err(expected));
    }

    #[rstest]
    #[case(0.0)]
    #[case(-5.0)]
    #[case(f32::NAN)]
    #[case(f32::INFINITY)]
    fn non_positive_or_non_finite_radius_is_rejected(mut input: NewGeofence, #[case] radius: f32) {
        input.radius_meters = radius;
        let err = GeofenceDefinition::try_new(input).expect_err("radius rejected");
        assert!(matches!(err, GeofenceValidationError::InvalidRadius { .. }));
    }

    #[rstest]
    #[case(90.5, 0.0)]
    #[case(0.0, -180.5)]
    #[case(f64::NAN, 0.0)]
    fn out_of_range_coordinates_are_rejected(#[case] latitude: f64, #[case] longitude: f64) {
        assert!(Coordinates::new(latitude, longitude).is_err());
    }

    #[rstest]
    #[case(-1, Some(Expiration::Never))]
    #[case(0, Some(Expiration::After(Duration::ZERO)))]
    #[case(86_400_000, Some(Expiration::After(Duration::from_secs(86_400))))]
    #[case(-2, None)]
    fn expiration_decodes_wire_values(#[case] millis: i64, #[case] expected: Option<Expiration>) {
        assert_eq!(Expiration::from_millis(millis), expected);
        if let Some(expiration) = expected {
            assert_eq!(expiration.to_millis(), millis);
        }
    }

    #[rstest]
    #[case(0, None)]
    #[case(1, Some(TransitionMask::ENTER))]
    #[case(3, Some(TransitionMask::ENTER | TransitionMask::EXIT))]
    #[case(8, None)]
    #[case(-1, None)]
    fn transition_mask_decodes_known_bits(
        #[case] bits: i32,
        #[case] expected: Option<TransitionMask>,
    ) {
        assert_eq!(TransitionMask::from_bits(bits), expected);
    }

    #[rstest]
    fn transition_lists_parse_case_insensitively() {
        let mask: TransitionMask = "Enter, dwell".parse().expect("valid list");
        assert!(mask.contains(TransitionMask::ENTER | TransitionMask::DWELL));
        assert!(!mask.contains(TransitionMask::EXIT));
        assert!("".parse::<TransitionMask>().is_err());
        assert!("leave".parse::<TransitionMask>().is_err());
    }
}
