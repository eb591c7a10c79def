//! Removes geofences from the location service.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::cycle::{CoordinatorPorts, CycleDriver, CycleOperation, CyclePhase, SpawnedCycle};
use crate::domain::ports::{ConnectionEvent, LocationConnection, OperationKind};
use crate::domain::{
    AddType, CorrelationId, CycleFailure, RemovalTarget, RemoveOutcome, RequestRejection,
    RequestToken,
};

pub(super) struct RemoveRequest {
    target: RemovalTarget,
    add_type: AddType,
    correlation_id: CorrelationId,
}

pub(super) struct RemoveOperation;

impl CycleOperation for RemoveOperation {
    type Request = RemoveRequest;
    type Outcome = RemoveOutcome;

    const KIND: OperationKind = OperationKind::Remove;

    fn correlation_id(request: &RemoveRequest) -> &CorrelationId {
        &request.correlation_id
    }

    fn issue(&self, connection: &dyn LocationConnection, request: &RemoveRequest) {
        match &request.target {
            RemovalTarget::Ids(ids) => connection.remove_geofences_by_ids(ids),
            RemovalTarget::Token(token) => connection.remove_geofences_by_token(token),
        }
    }

    fn complete(&self, request: &RemoveRequest, event: &ConnectionEvent) -> Option<RemoveOutcome> {
        let result = match (&request.target, event) {
            (RemovalTarget::Ids(_), ConnectionEvent::GeofencesRemovedByIds(removed)) => {
                removed.as_ref().map(|_| ())
            }
            (RemovalTarget::Token(_), ConnectionEvent::GeofencesRemovedByToken(removed)) => {
                removed.as_ref().map(|_| ())
            }
            _ => return None,
        };
        Some(result.map_or_else(
            |error| self.fail(request, CycleFailure::OperationFailed(error.clone())),
            |()| RemoveOutcome::Succeeded {
                correlation_id: request.correlation_id.clone(),
                add_type: request.add_type,
                target: request.target.clone(),
            },
        ))
    }

    fn fail(&self, request: &RemoveRequest, failure: CycleFailure) -> RemoveOutcome {
        RemoveOutcome::Failed {
            correlation_id: request.correlation_id.clone(),
            add_type: request.add_type,
            failure,
        }
    }

    fn finish(&self, request: &RemoveRequest) {
        if let RemovalTarget::Token(token) = &request.target {
            token.cancel();
        }
    }
}

/// Removes geofences by id or by request token, one request at a time.
///
/// Outcomes are delivered on the receiver returned by
/// [`RemoveCoordinator::new`]. Dropping the coordinator stops its event task.
pub struct RemoveCoordinator {
    driver: Arc<CycleDriver<RemoveOperation>>,
    task: JoinHandle<()>,
}

impl RemoveCoordinator {
    /// Create a coordinator and the receiver its outcomes arrive on.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(ports: CoordinatorPorts) -> (Self, mpsc::UnboundedReceiver<RemoveOutcome>) {
        let SpawnedCycle {
            driver,
            task,
            outcomes,
        } = CycleDriver::spawn(RemoveOperation, ports);
        (Self { driver, task }, outcomes)
    }

    /// Remove the geofences named by `ids`.
    ///
    /// `add_type` is echoed back in the outcome so the caller knows whether
    /// to register a replacement afterwards.
    pub fn remove_by_ids(
        &self,
        ids: Vec<String>,
        add_type: AddType,
        correlation_id: impl Into<CorrelationId>,
    ) -> Result<(), RequestRejection> {
        if ids.is_empty() {
            return Err(RequestRejection::InvalidArgument);
        }
        self.driver.submit(RemoveRequest {
            target: RemovalTarget::Ids(ids),
            add_type,
            correlation_id: correlation_id.into(),
        })
    }

    /// Remove every geofence registered under `token`.
    ///
    /// The token is cancelled once the connection closes, so the add
    /// coordinator hands out a fresh one with the same identity next time.
    pub fn remove_by_token(
        &self,
        token: RequestToken,
        correlation_id: impl Into<CorrelationId>,
    ) -> Result<(), RequestRejection> {
        self.driver.submit(RemoveRequest {
            target: RemovalTarget::Token(token),
            add_type: AddType::PlainRemove,
            correlation_id: correlation_id.into(),
        })
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
    /// can start.
    pub fn release_guard(&self) {
        self.driver.release_guard();
    }
}

impl Drop for RemoveCoordinator {
    fn drop(&mut self) {
        self.task.abort();
    }
}
