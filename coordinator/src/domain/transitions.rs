//! Handling of geofence transition events raised by the location service.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::TransitionMask;
use super::ports::{
    GeofenceStore, GeofenceStoreError, LocationOperationError, LocationReminder, Notifier,
};

/// Title used for every location reminder.
pub const REMINDER_TITLE: &str = "Location reminder";
const FALLBACK_BODY: &str = "You are near a saved place";

/// Event delivered by the location service when a monitored geofence fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionEvent {
    /// The service could not evaluate geofences; `code` is its status code.
    Error {
        /// Status code reported by the service.
        code: i32,
    },
    /// The device crossed a geofence boundary.
    Transition {
        /// Raw transition bit (`1` enter, `2` exit, `4` dwell).
        transition: i32,
        /// Place the receiver was registered for.
        place_id: String,
        /// Geofences that triggered the event.
        geofence_ids: Vec<String>,
    },
}

/// What [`TransitionReceiver::handle`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionDisposition {
    /// A reminder was shown for the place.
    Notified {
        /// The place the reminder concerns.
        place_id: String,
    },
    /// The event did not concern an enter into the saved place.
    Ignored,
    /// The transition value was not a single known transition.
    InvalidTransition {
        /// The rejected raw value.
        code: i32,
    },
    /// The service reported an error instead of a transition.
    ServiceError(LocationOperationError),
}

/// Turns enter transitions for a saved place into user reminders.
pub struct TransitionReceiver {
    store: Arc<dyn GeofenceStore>,
    notifier: Arc<dyn Notifier>,
}

impl TransitionReceiver {
    /// Create a receiver reading places from `store` and reminding through
    /// `notifier`.
    #[must_use]
    pub const fn new(store: Arc<dyn GeofenceStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Handle one transition event.
    ///
    /// Only enter transitions whose triggering geofences include the place
    /// id produce a reminder; the reminder body is the stored address.
    pub async fn handle(
        &self,
        event: TransitionEvent,
    ) -> Result<TransitionDisposition, GeofenceStoreError> {
        let (transition, place_id, geofence_ids) = match event {
            TransitionEvent::Error { code } => {
                let service_error = LocationOperationError::from_status_code(code);
                error!(code, error = %service_error, "geofence transition error");
                return Ok(TransitionDisposition::ServiceError(service_error));
            }
            TransitionEvent::Transition {
                transition,
                place_id,
                geofence_ids,
            } => (transition, place_id, geofence_ids),
        };

        let Some(mask) = TransitionMask::from_bits(transition).filter(|decoded| {
            [
                TransitionMask::ENTER,
                TransitionMask::EXIT,
                TransitionMask::DWELL,
            ]
            .contains(decoded)
        }) else {
            warn!(transition, "invalid geofence transition type");
            return Ok(TransitionDisposition::InvalidTransition { code: transition });
        };
        if mask != TransitionMask::ENTER {
            debug!(?mask, %place_id, "ignoring non-enter transition");
            return Ok(TransitionDisposition::Ignored);
        }
        if !geofence_ids.iter().any(|id| *id == place_id) {
            debug!(%place_id, ?geofence_ids, "transition does not concern the saved place");
            return Ok(TransitionDisposition::Ignored);
        }

        let Some(geofence) = self.store.get(&place_id).await? else {
            warn!(%place_id, "transition for a place that is no longer stored");
            return Ok(TransitionDisposition::Ignored);
        };
        let address = &geofence.locale().address;
        let body = if address.is_empty() {
            FALLBACK_BODY.to_owned()
        } else {
            address.clone()
        };
        self.notifier.notify(&LocationReminder {
            notification_id: place_id.clone(),
            title: REMINDER_TITLE.to_owned(),
            body,
        });
        info!(%place_id, "entered saved place");
        Ok(TransitionDisposition::Notified { place_id })
    }
}
