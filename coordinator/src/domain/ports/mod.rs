//! Domain ports and supporting types for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

mod geofence_store;
mod location_service;
mod notifier;
mod resolution_flow;

pub use geofence_store::{GeofenceStore, GeofenceStoreError};
#[cfg(test)]
pub use location_service::MockLocationServiceClient;
pub use location_service::{
    ConnectionEvent, ConnectionEvents, ConnectionFailure, CycleEvent, LocationConnection,
    LocationOperationError, LocationServiceClient, STATUS_GEOFENCE_NOT_AVAILABLE,
    STATUS_TOO_MANY_GEOFENCES, STATUS_TOO_MANY_REQUEST_TOKENS,
};
#[cfg(test)]
pub use notifier::MockNotifier;
pub use notifier::{LocationReminder, Notifier};
#[cfg(test)]
pub use resolution_flow::MockResolutionFlow;
pub use resolution_flow::{
    ChannelResolutionFlow, OperationKind, ResolutionFlow, ResolutionRequest, ResolutionResult,
};
