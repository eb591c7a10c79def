//! Outbound adapters implementing the domain ports.

pub mod location;
pub mod notifier;
pub mod store;

pub use location::{SimulatedLocationService, SimulatedServiceConfig};
pub use notifier::TracingNotifier;
pub use store::{FlattenedGeofenceStore, InMemoryKeyValueBackend, JsonFileKeyValueBackend};
