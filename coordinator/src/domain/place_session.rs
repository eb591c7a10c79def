//! A saved place backed by a single geofence.
//!
//! The session keeps the stored definition and the location service
//! registration in step. Saving a new position for a place that already
//! has a geofence removes the old registration first and adds the
//! replacement once the removal succeeds.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::coordinator::{AddCoordinator, CoordinatorPorts, RemoveCoordinator};
use super::ports::{
    GeofenceStore, GeofenceStoreError, OperationKind, ResolutionRequest, ResolutionResult,
};
use super::{
    AddOutcome, AddType, Coordinates, CorrelationId, Expiration, GeofenceDefinition,
    GeofenceValidationError, Locale, NewGeofence, RemovalTarget, RemoveOutcome, RequestRejection,
    TransitionMask,
};

/// Defaults applied to geofences created by a session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceSettings {
    /// Place identifier, reused as the geofence id.
    pub place_id: String,
    /// Radius of the place's geofence in metres.
    pub radius_meters: f32,
    /// How long the registration lasts.
    pub expiration: Expiration,
    /// Transitions the geofence reports.
    pub transitions: TransitionMask,
}

impl Default for PlaceSettings {
    fn default() -> Self {
        Self {
            place_id: "1".to_owned(),
            radius_meters: 50.0,
            expiration: Expiration::Never,
            transitions: TransitionMask::ENTER,
        }
    }
}

/// Errors raised by [`PlaceSession`] operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Reading or writing the geofence store failed.
    #[error(transparent)]
    Store(#[from] GeofenceStoreError),
    /// The configured settings do not describe a valid geofence.
    #[error(transparent)]
    InvalidGeofence(#[from] GeofenceValidationError),
    /// Both coordinators have gone away.
    #[error("coordinator outcome channels closed")]
    OutcomesClosed,
}

/// User-facing result of a session operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// A request was handed to a coordinator; its outcome follows later.
    Submitted {
        /// Identifies the submitted request in its outcome.
        correlation_id: CorrelationId,
    },
    /// The place's geofence is registered.
    GeofenceAdded {
        /// Place whose geofence was added.
        place_id: String,
    },
    /// The place's geofence and its stored record are gone.
    GeofenceDeleted {
        /// Place whose geofence was removed.
        place_id: String,
    },
    /// There is nothing saved to act on.
    NoSavedPlace,
    /// A coordinator is still busy with an earlier request.
    PreviousRequestPending,
    /// An outcome or resolution that no longer matches a tracked request.
    Stale,
    /// The request did not succeed.
    Failed {
        /// Human readable reason.
        message: String,
    },
}

impl fmt::Display for SessionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted { correlation_id } => write!(f, "request {correlation_id} submitted"),
            Self::GeofenceAdded { place_id } => write!(f, "geofence added for place {place_id}"),
            Self::GeofenceDeleted { place_id } => {
                write!(f, "geofence deleted for place {place_id}")
            }
            Self::NoSavedPlace => write!(f, "no place has been saved"),
            Self::PreviousRequestPending => {
                write!(f, "previous request has not finished yet")
            }
            Self::Stale => write!(f, "ignored an outdated result"),
            Self::Failed { message } => write!(f, "request failed: {message}"),
        }
    }
}

#[derive(Debug, Clone)]
struct PendingAdd {
    geofences: Vec<GeofenceDefinition>,
    correlation_id: CorrelationId,
}

#[derive(Debug, Clone)]
struct PendingRemoval {
    ids: Vec<String>,
    add_type: AddType,
    correlation_id: CorrelationId,
}

/// Keeps one saved place registered with the location service.
///
/// At most one add and one removal are tracked at a time. Each remembers
/// its arguments so a resolved connection problem can re-issue it under
/// the same correlation id.
pub struct PlaceSession {
    settings: PlaceSettings,
    store: Arc<dyn GeofenceStore>,
    adder: AddCoordinator,
    remover: RemoveCoordinator,
    added: mpsc::UnboundedReceiver<AddOutcome>,
    removed: mpsc::UnboundedReceiver<RemoveOutcome>,
    current: Option<GeofenceDefinition>,
    replacement: Option<(Coordinates, Locale)>,
    pending_add: Option<PendingAdd>,
    pending_removal: Option<PendingRemoval>,
    sequence: u64,
}

impl PlaceSession {
    /// Create a session with its own add and remove coordinators.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new(
        settings: PlaceSettings,
        store: Arc<dyn GeofenceStore>,
        ports: &CoordinatorPorts,
    ) -> Self {
        let (adder, added) = AddCoordinator::new(ports.clone());
        let (remover, removed) = RemoveCoordinator::new(ports.clone());
        Self {
            settings,
            store,
            adder,
            remover,
            added,
            removed,
            current: None,
            replacement: None,
            pending_add: None,
            pending_removal: None,
            sequence: 0,
        }
    }

    /// Settings new geofences are created with.
    #[must_use]
    pub const fn settings(&self) -> &PlaceSettings {
        &self.settings
    }

    /// The geofence currently saved for the place, if any.
    #[must_use]
    pub const fn current(&self) -> Option<&GeofenceDefinition> {
        self.current.as_ref()
    }

    /// Coordinator registering the place's geofence.
    #[must_use]
    pub const fn adder(&self) -> &AddCoordinator {
        &self.adder
    }

    /// Coordinator removing the place's geofence.
    #[must_use]
    pub const fn remover(&self) -> &RemoveCoordinator {
        &self.remover
    }

    /// Whether every submitted request has reported its outcome.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.pending_add.is_none() && self.pending_removal.is_none()
    }

    /// Load the saved geofence for the place from the store.
    pub async fn restore(&mut self) -> Result<Option<&GeofenceDefinition>, SessionError> {
        self.current = self.store.get(&self.settings.place_id).await?;
        debug!(
            place_id = %self.settings.place_id,
            found = self.current.is_some(),
            "restored saved place"
        );
        Ok(self.current.as_ref())
    }

    /// Save the place at `center`, replacing any existing geofence.
    pub async fn save_at(
        &mut self,
        center: Coordinates,
        locale: Locale,
    ) -> Result<SessionNotice, SessionError> {
        if self.adder.in_progress() || self.remover.in_progress() {
            return Ok(SessionNotice::PreviousRequestPending);
        }
        let Some(existing_id) = self
            .current
            .as_ref()
            .map(|geofence| geofence.id().to_owned())
        else {
            return self.create(center, locale).await;
        };
        self.replacement = Some((center, locale));
        let notice = self.request_removal(vec![existing_id], AddType::RemoveThenAdd);
        if !matches!(notice, SessionNotice::Submitted { .. }) {
            self.replacement = None;
        }
        Ok(notice)
    }

    /// Register the restored geofence again, for instance after a restart
    /// of the location service.
    pub fn register_current(&mut self) -> SessionNotice {
        let Some(geofence) = self.current.clone() else {
            return SessionNotice::NoSavedPlace;
        };
        self.request_add(vec![geofence])
    }

    /// Remove the place's geofence from the location service and the store.
    pub fn delete(&mut self) -> SessionNotice {
        let Some(existing_id) = self
            .current
            .as_ref()
            .map(|geofence| geofence.id().to_owned())
        else {
            return SessionNotice::NoSavedPlace;
        };
        if self.remover.in_progress() {
            return SessionNotice::PreviousRequestPending;
        }
        self.request_removal(vec![existing_id], AddType::PlainRemove)
    }

    /// Wait for the next coordinator outcome and apply it.
    pub async fn process_next_outcome(&mut self) -> Result<SessionNotice, SessionError> {
        tokio::select! {
            Some(outcome) = self.added.recv() => Ok(self.on_add_outcome(outcome)),
            Some(outcome) = self.removed.recv() => self.on_remove_outcome(outcome).await,
            else => Err(SessionError::OutcomesClosed),
        }
    }

    /// Apply an add outcome.
    pub fn on_add_outcome(&mut self, outcome: AddOutcome) -> SessionNotice {
        let tracked = self
            .pending_add
            .as_ref()
            .map(|pending| &pending.correlation_id);
        if tracked != Some(outcome.correlation_id()) {
            debug!(correlation_id = %outcome.correlation_id(), "ignoring stale add outcome");
            return SessionNotice::Stale;
        }
        self.pending_add = None;
        match outcome {
            AddOutcome::Succeeded { geofence_ids, .. } => {
                info!(place_id = %self.settings.place_id, ?geofence_ids, "geofence added");
                SessionNotice::GeofenceAdded {
                    place_id: self.settings.place_id.clone(),
                }
            }
            AddOutcome::Failed { failure, .. } => {
                warn!(place_id = %self.settings.place_id, %failure, "adding geofence failed");
                SessionNotice::Failed {
                    message: failure.to_string(),
                }
            }
        }
    }

    /// Apply a remove outcome, adding the pending replacement when the
    /// removal was the first half of a save.
    pub async fn on_remove_outcome(
        &mut self,
        outcome: RemoveOutcome,
    ) -> Result<SessionNotice, SessionError> {
        let tracked = self
            .pending_removal
            .as_ref()
            .map(|pending| &pending.correlation_id);
        if tracked != Some(outcome.correlation_id()) {
            debug!(correlation_id = %outcome.correlation_id(), "ignoring stale remove outcome");
            return Ok(SessionNotice::Stale);
        }
        self.pending_removal = None;

        let (add_type, target) = match outcome {
            RemoveOutcome::Succeeded {
                add_type: echoed,
                target: removed,
                ..
            } => (echoed, removed),
            RemoveOutcome::Failed { failure, .. } => {
                warn!(place_id = %self.settings.place_id, %failure, "removing geofence failed");
                self.replacement = None;
                return Ok(SessionNotice::Failed {
                    message: failure.to_string(),
                });
            }
        };

        let ids = match target {
            RemovalTarget::Ids(removed_ids) => removed_ids,
            RemovalTarget::Token(_) => self
                .current
                .iter()
                .map(|geofence| geofence.id().to_owned())
                .collect(),
        };
        self.store.delete_many(&ids).await?;
        if self
            .current
            .as_ref()
            .is_some_and(|geofence| ids.iter().any(|id| id == geofence.id()))
        {
            self.current = None;
        }
        info!(place_id = %self.settings.place_id, ?ids, "geofence removed");

        match (add_type, self.replacement.take()) {
            (AddType::RemoveThenAdd, Some((center, locale))) => self.create(center, locale).await,
            _ => Ok(SessionNotice::GeofenceDeleted {
                place_id: self.settings.place_id.clone(),
            }),
        }
    }

    /// Continue after the external resolution flow finished for `request`.
    ///
    /// Only the request that raised the resolution is acted on: on success
    /// it is re-issued with identical arguments and correlation id, and on
    /// cancellation it is dropped. A request that is no longer tracked
    /// yields [`SessionNotice::Stale`] and leaves both coordinators alone.
    pub fn on_resolution(
        &mut self,
        request: &ResolutionRequest,
        result: ResolutionResult,
    ) -> SessionNotice {
        let tracked = match request.kind {
            OperationKind::Add => self
                .pending_add
                .as_ref()
                .map(|pending| &pending.correlation_id),
            OperationKind::Remove => self
                .pending_removal
                .as_ref()
                .map(|pending| &pending.correlation_id),
        };
        if tracked != Some(&request.correlation_id) {
            debug!(
                kind = ?request.kind,
                correlation_id = %request.correlation_id,
                "ignoring resolution for an untracked request"
            );
            return SessionNotice::Stale;
        }

        match (request.kind, result) {
            (OperationKind::Add, ResolutionResult::Resolved) => self.retry_add(),
            (OperationKind::Remove, ResolutionResult::Resolved) => self.retry_removal(),
            (OperationKind::Add, ResolutionResult::Cancelled) => {
                self.adder.release_guard();
                self.pending_add = None;
                self.unresolved()
            }
            (OperationKind::Remove, ResolutionResult::Cancelled) => {
                self.remover.release_guard();
                self.pending_removal = None;
                self.replacement = None;
                self.unresolved()
            }
        }
    }

    async fn create(
        &mut self,
        center: Coordinates,
        locale: Locale,
    ) -> Result<SessionNotice, SessionError> {
        if self.adder.in_progress() {
            return Ok(SessionNotice::PreviousRequestPending);
        }
        let geofence = GeofenceDefinition::try_new(NewGeofence {
            id: self.settings.place_id.clone(),
            center,
            radius_meters: self.settings.radius_meters,
            expiration: self.settings.expiration,
            transitions: self.settings.transitions,
            place_id: self.settings.place_id.clone(),
            locale,
        })?;
        self.store.put(&geofence).await?;
        self.current = Some(geofence.clone());
        Ok(self.request_add(vec![geofence]))
    }

    fn request_add(&mut self, geofences: Vec<GeofenceDefinition>) -> SessionNotice {
        let correlation_id = self.next_correlation_id();
        match self
            .adder
            .add_geofences(geofences.clone(), correlation_id.clone())
        {
            Ok(()) => {
                self.pending_add = Some(PendingAdd {
                    geofences,
                    correlation_id: correlation_id.clone(),
                });
                SessionNotice::Submitted { correlation_id }
            }
            Err(rejection) => self.rejected(rejection),
        }
    }

    fn request_removal(&mut self, ids: Vec<String>, add_type: AddType) -> SessionNotice {
        let correlation_id = self.next_correlation_id();
        match self
            .remover
            .remove_by_ids(ids.clone(), add_type, correlation_id.clone())
        {
            Ok(()) => {
                self.pending_removal = Some(PendingRemoval {
                    ids,
                    add_type,
                    correlation_id: correlation_id.clone(),
                });
                SessionNotice::Submitted { correlation_id }
            }
            Err(rejection) => self.rejected(rejection),
        }
    }

    fn retry_add(&mut self) -> SessionNotice {
        let Some(pending) = self.pending_add.clone() else {
            return SessionNotice::Stale;
        };
        self.adder.release_guard();
        match self
            .adder
            .add_geofences(pending.geofences, pending.correlation_id.clone())
        {
            Ok(()) => SessionNotice::Submitted {
                correlation_id: pending.correlation_id,
            },
            Err(rejection) => {
                self.pending_add = None;
                self.rejected(rejection)
            }
        }
    }

    fn retry_removal(&mut self) -> SessionNotice {
        let Some(pending) = self.pending_removal.clone() else {
            return SessionNotice::Stale;
        };
        self.remover.release_guard();
        match self.remover.remove_by_ids(
            pending.ids,
            pending.add_type,
            pending.correlation_id.clone(),
        ) {
            Ok(()) => SessionNotice::Submitted {
                correlation_id: pending.correlation_id,
            },
            Err(rejection) => {
                self.pending_removal = None;
                self.replacement = None;
                self.rejected(rejection)
            }
        }
    }

    fn unresolved(&self) -> SessionNotice {
        info!(place_id = %self.settings.place_id, "connection problem left unresolved");
        SessionNotice::Failed {
            message: "the location service connection problem was not resolved".to_owned(),
        }
    }

    fn rejected(&self, rejection: RequestRejection) -> SessionNotice {
        debug!(place_id = %self.settings.place_id, %rejection, "request rejected");
        match rejection {
            RequestRejection::OperationInProgress => SessionNotice::PreviousRequestPending,
            RequestRejection::InvalidArgument => SessionNotice::Failed {
                message: rejection.to_string(),
            },
        }
    }

    fn next_correlation_id(&mut self) -> CorrelationId {
        self.sequence += 1;
        CorrelationId::new(format!("{}:{}", self.settings.place_id, self.sequence))
    }
}

#[cfg(test)]
#[path = "place_session_tests.rs"]
mod tests;
