//! Domain primitives, coordinators and ports.
//!
//! Purpose: Keep geofence registrations with the location service
//! consistent while the service connects, fails and recovers. Types here
//! never touch storage or the platform directly; they go through the
//! traits in [`ports`].
//!
//! Public surface:
//! - `GeofenceDefinition` and its parts: validated geofence input.
//! - `AddCoordinator` and `RemoveCoordinator`: one connection cycle per
//!   request, exactly one outcome each.
//! - `PlaceSession`: a saved place kept in step with its geofence.
//! - `TransitionReceiver`: turns enter transitions into reminders.

pub mod coordinator;
pub mod geofence;
pub mod outcome;
pub mod place_session;
pub mod ports;
pub mod request_token;
pub mod transitions;

pub use self::coordinator::{AddCoordinator, CoordinatorPorts, CyclePhase, RemoveCoordinator};
pub use self::geofence::{
    Coordinates, Expiration, GeofenceDefinition, GeofenceValidationError, Locale,
    NEVER_EXPIRE_MILLIS, NewGeofence, ParseTransitionError, TransitionMask,
};
pub use self::outcome::{
    AddOutcome, AddType, CorrelationId, CycleFailure, RemovalTarget, RemoveOutcome,
    RequestRejection,
};
pub use self::place_session::{PlaceSession, PlaceSettings, SessionError, SessionNotice};
pub use self::request_token::RequestToken;
pub use self::transitions::{
    REMINDER_TITLE, TransitionDisposition, TransitionEvent, TransitionReceiver,
};
