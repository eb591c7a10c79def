//! Port for the platform location service that registers geofences.
//!
//! Every exchange with the service happens over a short-lived connection.
//! Commands are fire-and-forget; their results arrive later as
//! [`ConnectionEvent`]s pushed through the [`ConnectionEvents`] handle the
//! connection was opened with.

use tokio::sync::mpsc;

use super::define_port_error;
use crate::domain::{GeofenceDefinition, RequestToken};

/// Status code reported when geofencing is unavailable on the device.
pub const STATUS_GEOFENCE_NOT_AVAILABLE: i32 = 1000;
/// Status code reported when the per-app geofence limit is exceeded.
pub const STATUS_TOO_MANY_GEOFENCES: i32 = 1001;
/// Status code reported when too many request tokens are registered.
pub const STATUS_TOO_MANY_REQUEST_TOKENS: i32 = 1002;

define_port_error! {
    /// Non-success status returned by an add or remove operation.
    pub enum LocationOperationError {
        /// Geofencing is switched off or unsupported.
        GeofenceNotAvailable => "geofencing is not available on this device",
        /// The per-app geofence limit was reached.
        TooManyGeofences => "too many geofences are registered",
        /// The per-app request token limit was reached.
        TooManyRequestTokens => "too many request tokens are registered",
        /// Any other non-success status.
        Rejected { code: i32 } => "location service rejected the request with status {code}",
    }
}

impl LocationOperationError {
    /// Map a raw non-zero status code to an error.
    #[must_use]
    pub fn from_status_code(code: i32) -> Self {
        match code {
            STATUS_GEOFENCE_NOT_AVAILABLE => Self::geofence_not_available(),
            STATUS_TOO_MANY_GEOFENCES => Self::too_many_geofences(),
            STATUS_TOO_MANY_REQUEST_TOKENS => Self::too_many_request_tokens(),
            other => Self::rejected(other),
        }
    }

    /// Raw status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> i32 {
        match self {
            Self::GeofenceNotAvailable => STATUS_GEOFENCE_NOT_AVAILABLE,
            Self::TooManyGeofences => STATUS_TOO_MANY_GEOFENCES,
            Self::TooManyRequestTokens => STATUS_TOO_MANY_REQUEST_TOKENS,
            Self::Rejected { code } => *code,
        }
    }
}

define_port_error! {
    /// Reason a connection to the location service could not be established.
    pub enum ConnectionFailure {
        /// The user must grant consent or sign in.
        ResolutionRequired { message: String } => "user action is required: {message}",
        /// The service is outdated.
        ServiceUpdateRequired { message: String } =>
            "location service must be updated: {message}",
        /// The service is installed but switched off.
        ServiceDisabled { message: String } => "location service is disabled: {message}",
        /// The service is not installed.
        ServiceMissing { message: String } => "location service is not installed: {message}",
        /// The service did not answer in time.
        Timeout { message: String } => "connection timed out: {message}",
        /// The service could not be reached.
        Network { message: String } => "network error: {message}",
        /// The service failed on its side.
        Internal { message: String } => "internal location service error: {message}",
    }
}

impl ConnectionFailure {
    /// Whether an external resolution flow (user consent, service update)
    /// may fix the failure so the request can be retried.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ResolutionRequired { .. }
                | Self::ServiceUpdateRequired { .. }
                | Self::ServiceDisabled { .. }
        )
    }
}

/// Asynchronous notification delivered on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection is established.
    Connected,
    /// The connection could not be established or broke down.
    ConnectionFailed(ConnectionFailure),
    /// Result of `add_geofences`, carrying the registered ids on success.
    GeofencesAdded(Result<Vec<String>, LocationOperationError>),
    /// Result of `remove_geofences_by_token`.
    GeofencesRemovedByToken(Result<(), LocationOperationError>),
    /// Result of `remove_geofences_by_ids`, carrying the removed ids on success.
    GeofencesRemovedByIds(Result<Vec<String>, LocationOperationError>),
    /// The connection has closed.
    Disconnected,
}

/// A [`ConnectionEvent`] tagged with the request cycle it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleEvent {
    /// Number of the cycle whose connection raised the event.
    pub cycle: u64,
    /// The event itself.
    pub event: ConnectionEvent,
}

/// Sink a connection uses to report events back to its owner.
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    cycle: u64,
    sender: mpsc::UnboundedSender<CycleEvent>,
}

impl ConnectionEvents {
    /// Wrap `sender`, tagging every event with `cycle`.
    #[must_use]
    pub const fn new(cycle: u64, sender: mpsc::UnboundedSender<CycleEvent>) -> Self {
        Self { cycle, sender }
    }

    /// Create a sink and the receiver observing it.
    #[must_use]
    pub fn channel(cycle: u64) -> (Self, mpsc::UnboundedReceiver<CycleEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(cycle, sender), receiver)
    }

    /// Cycle this sink tags events with.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Deliver `event`. Returns `false` once the owner has gone away.
    #[must_use]
    pub fn emit(&self, event: ConnectionEvent) -> bool {
        self.sender
            .send(CycleEvent {
                cycle: self.cycle,
                event,
            })
            .is_ok()
    }
}

/// Factory for connections to the location service.
#[cfg_attr(test, mockall::automock)]
pub trait LocationServiceClient: Send + Sync {
    /// Create a connection whose events are reported through `events`.
    ///
    /// The connection is not established until
    /// [`LocationConnection::connect`] is called.
    fn open(&self, events: ConnectionEvents) -> Box<dyn LocationConnection>;
}

/// A single connection to the location service.
///
/// Each command's outcome is reported asynchronously through the
/// connection's [`ConnectionEvents`].
pub trait LocationConnection: Send + Sync {
    /// Start connecting; answered by `Connected` or `ConnectionFailed`.
    fn connect(&self);
    /// Close the connection; answered by `Disconnected`.
    fn disconnect(&self);
    /// Register `geofences` under `token`; answered by `GeofencesAdded`.
    fn add_geofences(&self, geofences: &[GeofenceDefinition], token: &RequestToken);
    /// Remove everything registered under `token`; answered by
    /// `GeofencesRemovedByToken`.
    fn remove_geofences_by_token(&self, token: &RequestToken);
    /// Remove the geofences named by `ids`; answered by
    /// `GeofencesRemovedByIds`.
    fn remove_geofences_by_ids(&self, ids: &[String]);
}
