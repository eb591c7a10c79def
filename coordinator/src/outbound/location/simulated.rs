//! In-process location service used by the demo binary.
//!
//! Every command is answered from a spawned task after a fixed latency, the
//! way a platform service answers over IPC. Registered geofences live in a
//! shared registry, so [`SimulatedLocationService::evaluate`] can report
//! which of them contain a position.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::debug;

use crate::domain::ports::{
    ConnectionEvent, ConnectionEvents, ConnectionFailure, LocationConnection,
    LocationOperationError, LocationServiceClient,
};
use crate::domain::{
    Coordinates, GeofenceDefinition, RequestToken, TransitionEvent, TransitionMask,
};

const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Tuning for [`SimulatedLocationService`].
#[derive(Debug, Clone)]
pub struct SimulatedServiceConfig {
    /// Delay before each answer is delivered.
    pub latency: Duration,
    /// Maximum number of geofences registered at once.
    pub max_geofences: usize,
}

impl Default for SimulatedServiceConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(25),
            max_geofences: 100,
        }
    }
}

#[derive(Default)]
struct Registry {
    geofences: BTreeMap<String, (GeofenceDefinition, String)>,
    connect_failures: VecDeque<ConnectionFailure>,
}

/// Location service simulated inside the process.
#[derive(Clone)]
pub struct SimulatedLocationService {
    config: SimulatedServiceConfig,
    runtime: Handle,
    registry: Arc<Mutex<Registry>>,
}

impl SimulatedLocationService {
    /// Create a service whose answers are scheduled on `runtime`.
    #[must_use]
    pub fn new(config: SimulatedServiceConfig, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Make the next connection attempt fail with `failure`.
    pub fn fail_next_connect(&self, failure: ConnectionFailure) {
        lock(&self.registry).connect_failures.push_back(failure);
    }

    /// Ids of every registered geofence, in sorted order.
    #[must_use]
    pub fn registered_ids(&self) -> Vec<String> {
        lock(&self.registry).geofences.keys().cloned().collect()
    }

    /// Report an enter transition for each registered geofence containing
    /// `position` that monitors entries.
    #[must_use]
    pub fn evaluate(&self, position: Coordinates) -> Vec<TransitionEvent> {
        let registry = lock(&self.registry);
        let mut by_place: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (geofence, _) in registry.geofences.values() {
            if geofence.transitions().contains(TransitionMask::ENTER)
                && distance_meters(geofence.center(), position)
                    <= f64::from(geofence.radius_meters())
            {
                by_place
                    .entry(geofence.place_id().to_owned())
                    .or_default()
                    .push(geofence.id().to_owned());
            }
        }
        by_place
            .into_iter()
            .map(|(place_id, geofence_ids)| TransitionEvent::Transition {
                transition: TransitionMask::ENTER.bits(),
                place_id,
                geofence_ids,
            })
            .collect()
    }
}

impl LocationServiceClient for SimulatedLocationService {
    fn open(&self, events: ConnectionEvents) -> Box<dyn LocationConnection> {
        Box::new(SimulatedConnection {
            service: self.clone(),
            events,
            connected: Arc::new(AtomicBool::new(false)),
        })
    }
}

struct SimulatedConnection {
    service: SimulatedLocationService,
    events: ConnectionEvents,
    connected: Arc<AtomicBool>,
}

impl SimulatedConnection {
    /// Deliver the event produced by `answer` after the configured latency.
    fn answer<F>(&self, answer: F)
    where
        F: FnOnce(&mut Registry) -> ConnectionEvent + Send + 'static,
    {
        let events = self.events.clone();
        let registry = Arc::clone(&self.service.registry);
        let latency = self.service.config.latency;
        self.service.runtime.spawn(async move {
            tokio::time::sleep(latency).await;
            let event = {
                let mut guard = lock(&registry);
                answer(&mut *guard)
            };
            debug!(
                cycle = events.cycle(),
                ?event,
                "simulated location service answer"
            );
            if !events.emit(event) {
                debug!(
                    cycle = events.cycle(),
                    "answer dropped; connection owner gone"
                );
            }
        });
    }

    fn require_connection(&self) -> Result<(), LocationOperationError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LocationOperationError::geofence_not_available())
        }
    }
}

impl LocationConnection for SimulatedConnection {
    fn connect(&self) {
        let connected = Arc::clone(&self.connected);
        self.answer(move |registry| {
            registry.connect_failures.pop_front().map_or_else(
                || {
                    connected.store(true, Ordering::SeqCst);
                    ConnectionEvent::Connected
                },
                ConnectionEvent::ConnectionFailed,
            )
        });
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.answer(|_| ConnectionEvent::Disconnected);
    }

    fn add_geofences(&self, geofences: &[GeofenceDefinition], token: &RequestToken) {
        let checked = self.require_connection();
        let batch = geofences.to_vec();
        let token_key = token.key().to_owned();
        let max_geofences = self.service.config.max_geofences;
        self.answer(move |registry| {
            let result = checked.and_then(|()| {
                let added = batch
                    .iter()
                    .filter(|geofence| !registry.geofences.contains_key(geofence.id()))
                    .count();
                if registry.geofences.len().saturating_add(added) > max_geofences {
                    return Err(LocationOperationError::too_many_geofences());
                }
                let ids: Vec<String> = batch.iter().map(|g| g.id().to_owned()).collect();
                for geofence in batch {
                    registry
                        .geofences
                        .insert(geofence.id().to_owned(), (geofence, token_key.clone()));
                }
                Ok(ids)
            });
            ConnectionEvent::GeofencesAdded(result)
        });
    }

    fn remove_geofences_by_token(&self, token: &RequestToken) {
        let checked = self.require_connection();
        let token_key = token.key().to_owned();
        self.answer(move |registry| {
            let result = checked.map(|()| {
                registry.geofences.retain(|_, (_, key)| *key != token_key);
            });
            ConnectionEvent::GeofencesRemovedByToken(result)
        });
    }

    fn remove_geofences_by_ids(&self, ids: &[String]) {
        let checked = self.require_connection();
        let owned_ids = ids.to_vec();
        self.answer(move |registry| {
            let result = checked.map(|()| {
                for id in &owned_ids {
                    registry.geofences.remove(id);
                }
                owned_ids
            });
            ConnectionEvent::GeofencesRemovedByIds(result)
        });
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Great-circle distance between two points.
#[expect(clippy::float_arithmetic, reason = "haversine distance")]
fn distance_meters(from: Coordinates, to: Coordinates) -> f64 {
    let (lat1, lat2) = (from.latitude().to_radians(), to.latitude().to_radians());
    let delta_lat = lat2 - lat1;
    let delta_lng = (to.longitude() - from.longitude()).to_radians();
    let haversine =
        (delta_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * haversine.sqrt().asin()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CycleEvent;
    use crate::test_support::sample_geofence;
    use rstest::rstest;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    fn service() -> SimulatedLocationService {
        SimulatedLocationService::new(
            SimulatedServiceConfig {
                latency: Duration::from_millis(1),
                max_geofences: 2,
            },
            Handle::current(),
        )
    }

    async fn next(receiver: &mut mpsc::UnboundedReceiver<CycleEvent>) -> ConnectionEvent {
        timeout(WAIT, receiver.recv())
            .await
            .expect("answer in time")
            .expect("channel open")
            .event
    }

    #[rstest]
    #[tokio::test]
    async fn connected_sessions_register_and_remove_geofences() {
        let service = service();
        let (events, mut receiver) = ConnectionEvents::channel(1);
        let connection = service.open(events);
        let token = RequestToken::new("demo");

        connection.connect();
        assert_eq!(next(&mut receiver).await, ConnectionEvent::Connected);

        connection.add_geofences(&[sample_geofence("1", 40.0, -3.0)], &token);
        assert_eq!(
            next(&mut receiver).await,
            ConnectionEvent::GeofencesAdded(Ok(vec!["1".to_owned()]))
        );
        assert_eq!(service.registered_ids(), vec!["1".to_owned()]);

        connection.remove_geofences_by_token(&token);
        assert_eq!(
            next(&mut receiver).await,
            ConnectionEvent::GeofencesRemovedByToken(Ok(()))
        );
        assert!(service.registered_ids().is_empty());

        connection.disconnect();
        assert_eq!(next(&mut receiver).await, ConnectionEvent::Disconnected);
    }

    #[rstest]
    #[tokio::test]
    async fn scripted_connect_failures_are_reported() {
        let service = service();
        service.fail_next_connect(ConnectionFailure::resolution_required("consent"));
        let (events, mut receiver) = ConnectionEvents::channel(1);
        let connection = service.open(events);

        connection.connect();
        assert_eq!(
            next(&mut receiver).await,
            ConnectionEvent::ConnectionFailed(ConnectionFailure::resolution_required("consent"))
        );
        let token = RequestToken::new("demo");
        connection.add_geofences(&[sample_geofence("1", 40.0, -3.0)], &token);
        assert_eq!(
            next(&mut receiver).await,
            ConnectionEvent::GeofencesAdded(Err(LocationOperationError::GeofenceNotAvailable))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn registry_limit_is_enforced() {
        let service = service();
        let (events, mut receiver) = ConnectionEvents::channel(1);
        let connection = service.open(events);
        connection.connect();
        next(&mut receiver).await;

        let geofences = [
            sample_geofence("1", 40.0, -3.0),
            sample_geofence("2", 41.0, -3.0),
            sample_geofence("3", 42.0, -3.0),
        ];
        connection.add_geofences(&geofences, &RequestToken::new("demo"));
        assert_eq!(
            next(&mut receiver).await,
            ConnectionEvent::GeofencesAdded(Err(LocationOperationError::TooManyGeofences))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn evaluate_reports_entries_inside_the_radius() {
        let service = service();
        let (events, mut receiver) = ConnectionEvents::channel(1);
        let connection = service.open(events);
        connection.connect();
        next(&mut receiver).await;
        let token = RequestToken::new("demo");
        connection.add_geofences(&[sample_geofence("1", 40.0, -3.0)], &token);
        next(&mut receiver).await;

        let inside = Coordinates::new(40.0002, -3.0).expect("valid");
        let outside = Coordinates::new(40.01, -3.0).expect("valid");
        assert_eq!(
            service.evaluate(inside),
            vec![TransitionEvent::Transition {
                transition: 1,
                place_id: "1".to_owned(),
                geofence_ids: vec!["1".to_owned()],
            }]
        );
        assert!(service.evaluate(outside).is_empty());
    }
}
