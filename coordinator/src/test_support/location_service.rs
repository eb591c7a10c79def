//! Scripted location service for coordinator tests.
//!
//! Connections answer commands on their own by default: `connect` reports
//! `Connected`, operations succeed and `disconnect` reports `Disconnected`.
//! Tests override that per call through the `script_*` methods, hold
//! operation results back to observe in-progress behaviour, or inject
//! arbitrary events on any connection opened so far.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::domain::ports::{
    ConnectionEvent, ConnectionEvents, ConnectionFailure, LocationConnection,
    LocationOperationError, LocationServiceClient,
};
use crate::domain::{GeofenceDefinition, RequestToken};

/// How the next `connect` call answers.
#[derive(Debug, Clone)]
pub enum ConnectBehaviour {
    /// Report `Connected`.
    Succeed,
    /// Report `ConnectionFailed` with the given failure.
    Fail(ConnectionFailure),
    /// Never answer.
    Silent,
}

/// A command received by a scripted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    /// `connect` on the connection opened for `cycle`.
    Connect {
        /// Cycle the connection belongs to.
        cycle: u64,
    },
    /// `disconnect` on the connection opened for `cycle`.
    Disconnect {
        /// Cycle the connection belongs to.
        cycle: u64,
    },
    /// `add_geofences`.
    Add {
        /// Cycle the connection belongs to.
        cycle: u64,
        /// Ids of the geofences sent.
        ids: Vec<String>,
        /// Key of the request token they were registered under.
        token_key: String,
    },
    /// `remove_geofences_by_token`.
    RemoveByToken {
        /// Cycle the connection belongs to.
        cycle: u64,
        /// Key of the token whose geofences are removed.
        token_key: String,
    },
    /// `remove_geofences_by_ids`.
    RemoveByIds {
        /// Cycle the connection belongs to.
        cycle: u64,
        /// Ids of the geofences removed.
        ids: Vec<String>,
    },
}

#[derive(Default)]
struct ScriptState {
    connects: Mutex<VecDeque<ConnectBehaviour>>,
    add_results: Mutex<VecDeque<Result<(), LocationOperationError>>>,
    remove_results: Mutex<VecDeque<Result<(), LocationOperationError>>>,
    hold_results: AtomicBool,
    silent_disconnect: AtomicBool,
    held: Mutex<Vec<(ConnectionEvents, ConnectionEvent)>>,
    calls: Mutex<Vec<ServiceCall>>,
    sinks: Mutex<Vec<ConnectionEvents>>,
    live: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|_| panic!("scripted location service mutex poisoned"))
}

/// [`LocationServiceClient`] double driven by a script.
#[derive(Clone, Default)]
pub struct ScriptedLocationService {
    state: Arc<ScriptState>,
}

impl ScriptedLocationService {
    /// Create a service that answers every command successfully.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer for the next `connect`.
    pub fn script_connect(&self, behaviour: ConnectBehaviour) {
        lock(&self.state.connects).push_back(behaviour);
    }

    /// Queue the status of the next `add_geofences`.
    pub fn script_add_result(&self, result: Result<(), LocationOperationError>) {
        lock(&self.state.add_results).push_back(result);
    }

    /// Queue the status of the next removal, by ids or by token.
    pub fn script_remove_result(&self, result: Result<(), LocationOperationError>) {
        lock(&self.state.remove_results).push_back(result);
    }

    /// While set, operation results are held until [`Self::release_held`].
    pub fn hold_results(&self, hold: bool) {
        self.state.hold_results.store(hold, Ordering::SeqCst);
    }

    /// While set, `disconnect` never reports `Disconnected`.
    pub fn silent_disconnect(&self, silent: bool) {
        self.state.silent_disconnect.store(silent, Ordering::SeqCst);
    }

    /// Deliver every held operation result, returning how many reached a
    /// live owner.
    ///
    /// # Panics
    ///
    /// Panics if the script state mutex is poisoned.
    pub fn release_held(&self) -> usize {
        let held: Vec<_> = lock(&self.state.held).drain(..).collect();
        held.into_iter()
            .filter(|(events, event)| events.emit(event.clone()))
            .count()
    }

    /// Emit `event` on the `index`-th connection opened (zero based).
    pub fn inject(&self, index: usize, event: ConnectionEvent) -> bool {
        let sink = lock(&self.state.sinks).get(index).cloned();
        sink.is_some_and(|events| events.emit(event))
    }

    /// Every command received so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the script state mutex is poisoned.
    #[must_use]
    pub fn calls(&self) -> Vec<ServiceCall> {
        lock(&self.state.calls).clone()
    }

    /// Number of connections opened so far.
    ///
    /// # Panics
    ///
    /// Panics if the script state mutex is poisoned.
    #[must_use]
    pub fn opened(&self) -> usize {
        lock(&self.state.sinks).len()
    }

    /// Number of connections not yet dropped by their owner.
    #[must_use]
    pub fn live_connections(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }
}

impl LocationServiceClient for ScriptedLocationService {
    fn open(&self, events: ConnectionEvents) -> Box<dyn LocationConnection> {
        lock(&self.state.sinks).push(events.clone());
        self.state.live.fetch_add(1, Ordering::SeqCst);
        Box::new(ScriptedConnection {
            events,
            state: Arc::clone(&self.state),
        })
    }
}

struct ScriptedConnection {
    events: ConnectionEvents,
    state: Arc<ScriptState>,
}

impl ScriptedConnection {
    fn record(&self, call: ServiceCall) {
        lock(&self.state.calls).push(call);
    }

    fn respond(&self, event: ConnectionEvent) {
        if self.state.hold_results.load(Ordering::SeqCst) {
            lock(&self.state.held).push((self.events.clone(), event));
        } else {
            self.deliver(event);
        }
    }

    fn deliver(&self, event: ConnectionEvent) {
        if !self.events.emit(event) {
            debug!(
                cycle = self.events.cycle(),
                "scripted event dropped; owner gone"
            );
        }
    }

    fn next_remove_result(&self) -> Result<(), LocationOperationError> {
        lock(&self.state.remove_results)
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

impl LocationConnection for ScriptedConnection {
    fn connect(&self) {
        self.record(ServiceCall::Connect {
            cycle: self.events.cycle(),
        });
        let behaviour = lock(&self.state.connects)
            .pop_front()
            .unwrap_or(ConnectBehaviour::Succeed);
        match behaviour {
            ConnectBehaviour::Succeed => self.deliver(ConnectionEvent::Connected),
            ConnectBehaviour::Fail(failure) => {
                self.deliver(ConnectionEvent::ConnectionFailed(failure));
            }
            ConnectBehaviour::Silent => {}
        }
    }

    fn disconnect(&self) {
        self.record(ServiceCall::Disconnect {
            cycle: self.events.cycle(),
        });
        if !self.state.silent_disconnect.load(Ordering::SeqCst) {
            self.deliver(ConnectionEvent::Disconnected);
        }
    }

    fn add_geofences(&self, geofences: &[GeofenceDefinition], token: &RequestToken) {
        let ids: Vec<String> = geofences
            .iter()
            .map(|geofence| geofence.id().to_owned())
            .collect();
        self.record(ServiceCall::Add {
            cycle: self.events.cycle(),
            ids: ids.clone(),
            token_key: token.key().to_owned(),
        });
        let result = lock(&self.state.add_results).pop_front().unwrap_or(Ok(()));
        self.respond(ConnectionEvent::GeofencesAdded(result.map(|()| ids)));
    }

    fn remove_geofences_by_token(&self, token: &RequestToken) {
        self.record(ServiceCall::RemoveByToken {
            cycle: self.events.cycle(),
            token_key: token.key().to_owned(),
        });
        let result = self.next_remove_result();
        self.respond(ConnectionEvent::GeofencesRemovedByToken(result));
    }

    fn remove_geofences_by_ids(&self, ids: &[String]) {
        self.record(ServiceCall::RemoveByIds {
            cycle: self.events.cycle(),
            ids: ids.to_vec(),
        });
        let result = self.next_remove_result();
        self.respond(ConnectionEvent::GeofencesRemovedByIds(
            result.map(|()| ids.to_vec()),
        ));
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}
