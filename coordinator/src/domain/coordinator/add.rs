//! Registers geofences with the location service.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::cycle::{CoordinatorPorts, CycleDriver, CycleOperation, CyclePhase, SpawnedCycle};
use crate::domain::ports::{ConnectionEvent, LocationConnection, OperationKind};
use crate::domain::{
    AddOutcome, CorrelationId, CycleFailure, GeofenceDefinition, RequestRejection, RequestToken,
};

pub(super) struct AddRequest {
    geofences: Vec<GeofenceDefinition>,
    correlation_id: CorrelationId,
}

pub(super) struct AddOperation {
    token_key: Arc<str>,
    token: Mutex<Option<RequestToken>>,
}

impl AddOperation {
    fn new() -> Self {
        Self {
            token_key: Arc::from(format!("geofence-transitions-{}", Uuid::new_v4())),
            token: Mutex::new(None),
        }
    }

    /// Return the memoised token, re-creating it under the same key once
    /// it has been cancelled.
    fn request_token(&self) -> RequestToken {
        let mut slot = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(live) = slot.as_ref().filter(|cached| !cached.is_cancelled()) {
            return live.clone();
        }
        let fresh = RequestToken::new(Arc::clone(&self.token_key));
        *slot = Some(fresh.clone());
        fresh
    }
}

impl CycleOperation for AddOperation {
    type Request = AddRequest;
    type Outcome = AddOutcome;

    const KIND: OperationKind = OperationKind::Add;

    fn correlation_id(request: &AddRequest) -> &CorrelationId {
        &request.correlation_id
    }

    fn issue(&self, connection: &dyn LocationConnection, request: &AddRequest) {
        connection.add_geofences(&request.geofences, &self.request_token());
    }

    fn complete(&self, request: &AddRequest, event: &ConnectionEvent) -> Option<AddOutcome> {
        let ConnectionEvent::GeofencesAdded(result) = event else {
            return None;
        };
        Some(result.as_ref().map_or_else(
            |error| self.fail(request, CycleFailure::OperationFailed(error.clone())),
            |geofence_ids| AddOutcome::Succeeded {
                correlation_id: request.correlation_id.clone(),
                geofence_ids: geofence_ids.clone(),
            },
        ))
    }

    fn fail(&self, request: &AddRequest, failure: CycleFailure) -> AddOutcome {
        AddOutcome::Failed {
            correlation_id: request.correlation_id.clone(),
            failure,
        }
    }
}

/// Adds batches of geofences, one request at a time.
///
/// Outcomes are delivered on the receiver returned by [`AddCoordinator::new`].
/// Dropping the coordinator stops its event task.
pub struct AddCoordinator {
    driver: Arc<CycleDriver<AddOperation>>,
    task: JoinHandle<()>,
}

impl AddCoordinator {
    /// Create a coordinator and the receiver its outcomes arrive on.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(ports: CoordinatorPorts) -> (Self, mpsc::UnboundedReceiver<AddOutcome>) {
        let SpawnedCycle {
            driver,
            task,
            outcomes,
        } = CycleDriver::spawn(AddOperation::new(), ports);
        (Self { driver, task }, outcomes)
    }

    /// Register `geofences` with the location service.
    ///
    /// Returns once the connection attempt has started; the result arrives
    /// later as an [`AddOutcome`] carrying `correlation_id`.
    pub fn add_geofences(
        &self,
        geofences: Vec<GeofenceDefinition>,
        correlation_id: impl Into<CorrelationId>,
    ) -> Result<(), RequestRejection> {
        if geofences.is_empty() {
            return Err(RequestRejection::InvalidArgument);
        }
        self.driver.submit(AddRequest {
            geofences,
            correlation_id: correlation_id.into(),
        })
    }

    /// Token that every geofence added by this coordinator is registered
    /// under. Pass it to
    /// [`RemoveCoordinator::remove_by_token`](super::RemoveCoordinator::remove_by_token)
    /// to remove them all.
    #[must_use]
    pub fn request_token(&self) -> RequestToken {
        self.driver.operation().request_token()
    }

    /// Whether a request holds the in-progress guard.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.driver.phase().is_in_progress()
    }

    /// Current phase of the request cycle.
    #[must_use]
    pub fn phase(&self) -> CyclePhase {
        self.driver.phase()
    }

    /// Observe phase changes.
    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<CyclePhase> {
        self.driver.subscribe()
    }

    /// Abandon the current cycle, disconnecting if needed, so a new request
    /// can start. Used after a resolution flow completes.
    pub fn release_guard(&self) {
        self.driver.release_guard();
    }
}

impl Drop for AddCoordinator {
    fn drop(&mut self) {
        self.task.abort();
    }
}
