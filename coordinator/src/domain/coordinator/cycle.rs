//! The connect, operate, disconnect cycle shared by both coordinators.
//!
//! A [`CycleDriver`] owns at most one live connection. Events from the
//! location service arrive on an unbounded channel and are applied by a
//! single task, so state transitions never race each other. Each cycle is
//! numbered and events tagged with an older number are dropped.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::ports::{
    ConnectionEvent, ConnectionEvents, ConnectionFailure, CycleEvent, LocationConnection,
    LocationServiceClient, OperationKind, ResolutionFlow, ResolutionRequest,
};
use crate::domain::{CorrelationId, CycleFailure, RequestRejection};

/// Where a coordinator is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    /// No request is being handled.
    Idle,
    /// A connection was opened and the connect answer is pending.
    Connecting,
    /// The operation was issued and its result is pending.
    Operating,
    /// The outcome was reported and the disconnect answer is pending.
    Disconnecting,
    /// A recoverable connection failure was handed to the resolution flow.
    AwaitingResolution,
}

impl CyclePhase {
    /// Whether a request currently holds the in-progress guard.
    #[must_use]
    pub const fn is_in_progress(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Operating | Self::Disconnecting
        )
    }
}

/// Ports shared by the add and remove coordinators.
#[derive(Clone)]
pub struct CoordinatorPorts {
    /// Opens connections to the location service.
    pub client: Arc<dyn LocationServiceClient>,
    /// Receives recoverable connection failures.
    pub resolution: Arc<dyn ResolutionFlow>,
}

impl CoordinatorPorts {
    /// Bundle the location service client and the resolution flow.
    #[must_use]
    pub const fn new(
        client: Arc<dyn LocationServiceClient>,
        resolution: Arc<dyn ResolutionFlow>,
    ) -> Self {
        Self { client, resolution }
    }
}

/// The operation-specific half of a cycle.
pub(super) trait CycleOperation: Send + Sync + 'static {
    type Request: Send + 'static;
    type Outcome: Send + 'static;

    const KIND: OperationKind;

    fn correlation_id(request: &Self::Request) -> &CorrelationId;

    /// Send the operation once the connection is up.
    fn issue(&self, connection: &dyn LocationConnection, request: &Self::Request);

    /// Interpret an event received while operating. `None` means the event
    /// is not this operation's result.
    fn complete(&self, request: &Self::Request, event: &ConnectionEvent) -> Option<Self::Outcome>;

    fn fail(&self, request: &Self::Request, failure: CycleFailure) -> Self::Outcome;

    /// Runs once the connection used for `request` has gone away.
    fn finish(&self, _request: &Self::Request) {}
}

struct CycleState<R> {
    phase: CyclePhase,
    cycle: u64,
    request: Option<R>,
    connection: Option<Box<dyn LocationConnection>>,
}

pub(super) struct CycleDriver<O: CycleOperation> {
    operation: O,
    ports: CoordinatorPorts,
    state: Mutex<CycleState<O::Request>>,
    events: mpsc::UnboundedSender<CycleEvent>,
    outcomes: mpsc::UnboundedSender<O::Outcome>,
    phase: watch::Sender<CyclePhase>,
}

/// Everything [`CycleDriver::spawn`] hands back to a coordinator.
pub(super) struct SpawnedCycle<O: CycleOperation> {
    pub driver: Arc<CycleDriver<O>>,
    pub task: JoinHandle<()>,
    pub outcomes: mpsc::UnboundedReceiver<O::Outcome>,
}

impl<O: CycleOperation> CycleDriver<O> {
    /// Create a driver and spawn its event task on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub(super) fn spawn(operation: O, ports: CoordinatorPorts) -> SpawnedCycle<O> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let (phase_tx, _) = watch::channel(CyclePhase::Idle);
        let driver = Arc::new(Self {
            operation,
            ports,
            state: Mutex::new(CycleState {
                phase: CyclePhase::Idle,
                cycle: 0,
                request: None,
                connection: None,
            }),
            events: events_tx,
            outcomes: outcomes_tx,
            phase: phase_tx,
        });
        let task = tokio::spawn(Self::run(Arc::downgrade(&driver), events_rx));
        SpawnedCycle {
            driver,
            task,
            outcomes: outcomes_rx,
        }
    }

    async fn run(driver: Weak<Self>, mut events: mpsc::UnboundedReceiver<CycleEvent>) {
        while let Some(event) = events.recv().await {
            let Some(live) = driver.upgrade() else {
                break;
            };
            live.handle(event);
        }
    }

    pub(super) const fn operation(&self) -> &O {
        &self.operation
    }

    pub(super) fn phase(&self) -> CyclePhase {
        self.lock_state().phase
    }

    pub(super) fn subscribe(&self) -> watch::Receiver<CyclePhase> {
        self.phase.subscribe()
    }

    /// Start a new cycle for `request`.
    pub(super) fn submit(&self, request: O::Request) -> Result<(), RequestRejection> {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        if state.phase.is_in_progress() {
            debug!(
                kind = ?O::KIND,
                phase = ?state.phase,
                correlation_id = %O::correlation_id(&request),
                "request rejected while a cycle is in progress"
            );
            return Err(RequestRejection::OperationInProgress);
        }

        state.cycle = state.cycle.wrapping_add(1);
        debug!(
            kind = ?O::KIND,
            cycle = state.cycle,
            correlation_id = %O::correlation_id(&request),
            "connecting to location service"
        );
        let connection = self
            .ports
            .client
            .open(ConnectionEvents::new(state.cycle, self.events.clone()));
        state.phase = CyclePhase::Connecting;
        state.request = Some(request);
        connection.connect();
        state.connection = Some(connection);
        self.publish(state.phase);
        Ok(())
    }

    /// Drop the current cycle without reporting an outcome.
    ///
    /// A live connection is asked to disconnect, and the dropped request is
    /// finished as if its connection had gone.
    pub(super) fn release_guard(&self) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let live = state
            .connection
            .take()
            .filter(|_| matches!(state.phase, CyclePhase::Connecting | CyclePhase::Operating));
        if let Some(connection) = live {
            connection.disconnect();
        }
        if let Some(request) = state.request.take() {
            self.operation.finish(&request);
        }
        if state.phase != CyclePhase::Idle {
            debug!(kind = ?O::KIND, phase = ?state.phase, "releasing in-progress guard");
        }
        state.phase = CyclePhase::Idle;
        self.publish(state.phase);
    }

    fn handle(&self, CycleEvent { cycle, event }: CycleEvent) {
        let handoff = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            if cycle != state.cycle || state.connection.is_none() {
                debug!(
                    kind = ?O::KIND,
                    cycle,
                    current = state.cycle,
                    ?event,
                    "ignoring event from a stale connection"
                );
                return;
            }

            let raised = match (state.phase, event) {
                (CyclePhase::Connecting, ConnectionEvent::Connected) => {
                    self.on_connected(state);
                    None
                }
                (CyclePhase::Connecting, ConnectionEvent::ConnectionFailed(failure)) => {
                    self.on_connect_failed(state, failure)
                }
                (
                    CyclePhase::Connecting | CyclePhase::Operating,
                    lost @ (ConnectionEvent::Disconnected | ConnectionEvent::ConnectionFailed(_)),
                ) => {
                    warn!(kind = ?O::KIND, cycle, event = ?lost, "connection lost mid-cycle");
                    self.abandon(state);
                    None
                }
                (CyclePhase::Operating, result) => {
                    self.on_result(state, &result);
                    None
                }
                (
                    CyclePhase::Disconnecting,
                    ConnectionEvent::Disconnected | ConnectionEvent::ConnectionFailed(_),
                ) => {
                    self.on_disconnected(state);
                    None
                }
                (phase, ignored) => {
                    debug!(kind = ?O::KIND, ?phase, event = ?ignored, "ignoring unexpected event");
                    None
                }
            };
            self.publish(state.phase);
            raised
        };

        if let Some(request) = handoff {
            self.ports.resolution.resolution_required(request);
        }
    }

    fn on_connected(&self, state: &mut CycleState<O::Request>) {
        let (Some(connection), Some(request)) =
            (state.connection.as_deref(), state.request.as_ref())
        else {
            warn!(kind = ?O::KIND, "connected without a pending request");
            return;
        };
        debug!(
            kind = ?O::KIND,
            correlation_id = %O::correlation_id(request),
            "connected; issuing operation"
        );
        self.operation.issue(connection, request);
        state.phase = CyclePhase::Operating;
    }

    fn on_connect_failed(
        &self,
        state: &mut CycleState<O::Request>,
        failure: ConnectionFailure,
    ) -> Option<ResolutionRequest> {
        state.connection = None;
        state.phase = CyclePhase::Idle;
        let request = state.request.take()?;
        let correlation_id = O::correlation_id(&request).clone();
        if failure.is_recoverable() {
            warn!(kind = ?O::KIND, %correlation_id, %failure, "connection needs resolution");
            state.phase = CyclePhase::AwaitingResolution;
            return Some(ResolutionRequest {
                kind: O::KIND,
                correlation_id,
                failure,
            });
        }

        warn!(kind = ?O::KIND, %correlation_id, %failure, "connection failed");
        self.emit(
            self.operation
                .fail(&request, CycleFailure::ConnectionFailedTerminal(failure)),
        );
        None
    }

    fn on_result(&self, state: &mut CycleState<O::Request>, event: &ConnectionEvent) {
        let Some(request) = state.request.as_ref() else {
            return;
        };
        let Some(outcome) = self.operation.complete(request, event) else {
            debug!(kind = ?O::KIND, ?event, "ignoring event that is not this operation's result");
            return;
        };
        self.emit(outcome);
        state.phase = CyclePhase::Disconnecting;
        if let Some(connection) = state.connection.as_deref() {
            connection.disconnect();
        }
    }

    fn on_disconnected(&self, state: &mut CycleState<O::Request>) {
        state.connection = None;
        if let Some(request) = state.request.take() {
            self.operation.finish(&request);
        }
        debug!(kind = ?O::KIND, cycle = state.cycle, "cycle complete");
        state.phase = CyclePhase::Idle;
    }

    fn abandon(&self, state: &mut CycleState<O::Request>) {
        state.connection = None;
        if let Some(request) = state.request.take() {
            self.emit(self.operation.fail(&request, CycleFailure::ConnectionLost));
            self.operation.finish(&request);
        }
        state.phase = CyclePhase::Idle;
    }

    fn emit(&self, outcome: O::Outcome) {
        if self.outcomes.send(outcome).is_err() {
            debug!(kind = ?O::KIND, "outcome dropped; receiver closed");
        }
    }

    fn publish(&self, phase: CyclePhase) {
        self.phase.send_if_modified(|current| {
            if *current == phase {
                return false;
            }
            *current = phase;
            true
        });
    }

    fn lock_state(&self) -> MutexGuard<'_, CycleState<O::Request>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!(kind = ?O::KIND, "cycle state lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}
