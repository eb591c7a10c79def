//! Results reported by the add and remove coordinators.

use std::fmt;

use super::RequestToken;
use super::ports::{ConnectionFailure, LocationOperationError};

/// Caller-chosen value threaded through a request so its outcome can be
/// matched back to the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Wrap a caller-chosen value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The wrapped value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Why a removal was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddType {
    /// Removal is the whole request.
    PlainRemove,
    /// The caller adds a replacement once the removal succeeds.
    RemoveThenAdd,
}

/// Synchronous rejection of a request; no connection was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RequestRejection {
    /// The request named no geofences.
    #[error("request must name at least one geofence")]
    InvalidArgument,
    /// The coordinator is still connecting, operating or disconnecting.
    #[error("a previous request is still in progress")]
    OperationInProgress,
}

/// Why an accepted request did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleFailure {
    /// Connecting failed in a way no resolution flow can fix.
    #[error("could not connect to the location service: {0}")]
    ConnectionFailedTerminal(ConnectionFailure),
    /// The service answered the operation with a non-success status.
    #[error(transparent)]
    OperationFailed(LocationOperationError),
    /// The connection dropped before the operation result arrived.
    #[error("connection to the location service was lost before the request completed")]
    ConnectionLost,
}

/// Final result of an add request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The geofences were registered.
    Succeeded {
        /// Id of the request.
        correlation_id: CorrelationId,
        /// Ids the service registered.
        geofence_ids: Vec<String>,
    },
    /// The geofences were not registered.
    Failed {
        /// Id of the request.
        correlation_id: CorrelationId,
        /// What went wrong.
        failure: CycleFailure,
    },
}

impl AddOutcome {
    /// Id of the request this outcome answers.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        match self {
            Self::Succeeded { correlation_id, .. } | Self::Failed { correlation_id, .. } => {
                correlation_id
            }
        }
    }
}

/// What a removal request targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalTarget {
    /// The geofences with these ids.
    Ids(Vec<String>),
    /// Every geofence registered under the token.
    Token(RequestToken),
}

/// Final result of a remove request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The geofences were removed.
    Succeeded {
        /// Id of the request.
        correlation_id: CorrelationId,
        /// Echo of the requested add type.
        add_type: AddType,
        /// What was removed.
        target: RemovalTarget,
    },
    /// The geofences were not removed.
    Failed {
        /// Id of the request.
        correlation_id: CorrelationId,
        /// Echo of the requested add type.
        add_type: AddType,
        /// What went wrong.
        failure: CycleFailure,
    },
}

impl RemoveOutcome {
    /// Id of the request this outcome answers.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        match self {
            Self::Succeeded { correlation_id, .. } | Self::Failed { correlation_id, .. } => {
                correlation_id
            }
        }
    }

    /// Add type the removal was requested with.
    #[must_use]
    pub const fn add_type(&self) -> AddType {
        match self {
            Self::Succeeded { add_type, .. } | Self::Failed { add_type, .. } => *add_type,
        }
    }
}
