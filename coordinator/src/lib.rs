//! Geofence lifecycle coordination.
//!
//! Registers and removes geofences with a location service that must be
//! connected before every operation, reports exactly one outcome per
//! request and keeps a saved place's stored definition in step with its
//! registration.

pub mod config;
pub mod domain;
pub mod outbound;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
