//! Behaviour tests for the add and remove coordinators.
//!
//! Each scenario drives real coordinators against the scripted location
//! service on a dedicated multi-threaded runtime.

#![expect(
    clippy::expect_used,
    reason = "test code uses expect for clear failure messages"
)]

use std::sync::Arc;
use std::time::Duration;

use geofence_coordinator::domain::ports::{
    ChannelResolutionFlow, ConnectionFailure, LocationOperationError, ResolutionRequest,
};
use geofence_coordinator::domain::{
    AddCoordinator, AddOutcome, AddType, CoordinatorPorts, CyclePhase, RemoveCoordinator,
    RemoveOutcome, RequestRejection,
};
use geofence_coordinator::test_support::{
    ConnectBehaviour, ScriptedLocationService, sample_geofence,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

struct World {
    service: ScriptedLocationService,
    resolutions: mpsc::UnboundedReceiver<ResolutionRequest>,
    adder: AddCoordinator,
    added: mpsc::UnboundedReceiver<AddOutcome>,
    remover: RemoveCoordinator,
    removed: mpsc::UnboundedReceiver<RemoveOutcome>,
    last_request: Option<Result<(), RequestRejection>>,
    runtime: Runtime,
}

impl World {
    fn wait_for(&self, mut phases: watch::Receiver<CyclePhase>, wanted: CyclePhase) {
        self.runtime.block_on(async {
            timeout(WAIT, phases.wait_for(|phase| *phase == wanted))
                .await
                .expect("phase should be reached in time")
                .expect("phase channel open");
        });
    }
}

fn recv<T>(runtime: &Runtime, receiver: &mut mpsc::UnboundedReceiver<T>) -> T {
    runtime.block_on(async {
        timeout(WAIT, receiver.recv())
            .await
            .expect("message should arrive in time")
            .expect("channel open")
    })
}

fn parse_add_type(raw: &str) -> AddType {
    match raw {
        "PlainRemove" => AddType::PlainRemove,
        "RemoveThenAdd" => AddType::RemoveThenAdd,
        other => panic!("unknown add type {other}"),
    }
}

#[fixture]
fn world() -> World {
    let runtime = Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime");
    let service = ScriptedLocationService::new();
    let (flow, resolutions) = ChannelResolutionFlow::channel();
    let ports = CoordinatorPorts::new(Arc::new(service.clone()), Arc::new(flow));
    let ((adder, added), (remover, removed)) = {
        let _entered = runtime.enter();
        (
            AddCoordinator::new(ports.clone()),
            RemoveCoordinator::new(ports),
        )
    };
    World {
        service,
        resolutions,
        adder,
        added,
        remover,
        removed,
        last_request: None,
        runtime,
    }
}

#[given("a location service that answers every command")]
fn a_location_service_that_answers_every_command(world: &mut World) {
    assert!(world.service.calls().is_empty());
}

#[given("a location service that holds operation results")]
fn a_location_service_that_holds_operation_results(world: &mut World) {
    world.service.hold_results(true);
}

#[given("a location service that needs a resolution on the next connect")]
fn a_location_service_that_needs_a_resolution(world: &mut World) {
    world.service.script_connect(ConnectBehaviour::Fail(
        ConnectionFailure::resolution_required("location consent missing"),
    ));
}

#[given("a location service that rejects the next add with status {code}")]
fn a_location_service_that_rejects_the_next_add(world: &mut World, code: i32) {
    world
        .service
        .script_add_result(Err(LocationOperationError::from_status_code(code)));
}

#[when("geofence {id} is added with correlation id {correlation_id}")]
fn geofence_is_added(world: &mut World, id: String, correlation_id: String) {
    let result = world
        .adder
        .add_geofences(vec![sample_geofence(&id, 40.0, -3.0)], correlation_id);
    world.last_request = Some(result);
}

#[when("an empty add is requested with correlation id {correlation_id}")]
fn an_empty_add_is_requested(world: &mut World, correlation_id: String) {
    let result = world.adder.add_geofences(Vec::new(), correlation_id);
    world.last_request = Some(result);
}

#[when("geofence {id} is removed as {add_type} with correlation id {correlation_id}")]
fn geofence_is_removed(world: &mut World, id: String, add_type: String, correlation_id: String) {
    let result = world
        .remover
        .remove_by_ids(vec![id], parse_add_type(&add_type), correlation_id);
    world.last_request = Some(result);
}

#[when("the held results are delivered")]
fn the_held_results_are_delivered(world: &mut World) {
    world.wait_for(world.adder.subscribe_phase(), CyclePhase::Operating);
    assert_eq!(world.service.release_held(), 1);
}

#[then("the last request is rejected as already in progress")]
fn the_last_request_is_rejected_as_in_progress(world: &mut World) {
    assert_eq!(
        world.last_request,
        Some(Err(RequestRejection::OperationInProgress))
    );
}

#[then("the last request is rejected as invalid")]
fn the_last_request_is_rejected_as_invalid(world: &mut World) {
    assert_eq!(
        world.last_request,
        Some(Err(RequestRejection::InvalidArgument))
    );
}

#[then("the last request is accepted")]
fn the_last_request_is_accepted(world: &mut World) {
    assert_eq!(world.last_request, Some(Ok(())));
}

#[then("the add coordinator reports success for {correlation_id}")]
fn the_add_coordinator_reports_success(world: &mut World, correlation_id: String) {
    match recv(&world.runtime, &mut world.added) {
        AddOutcome::Succeeded {
            correlation_id: reported,
            ..
        } => assert_eq!(reported.as_str(), correlation_id),
        other => panic!("expected add success, got {other:?}"),
    }
}

#[then("the add coordinator reports failure for {correlation_id}")]
fn the_add_coordinator_reports_failure(world: &mut World, correlation_id: String) {
    match recv(&world.runtime, &mut world.added) {
        AddOutcome::Failed {
            correlation_id: reported,
            ..
        } => assert_eq!(reported.as_str(), correlation_id),
        other => panic!("expected add failure, got {other:?}"),
    }
}

#[then("the remove coordinator reports success for {correlation_id} as {add_type}")]
fn the_remove_coordinator_reports_success(
    world: &mut World,
    correlation_id: String,
    add_type: String,
) {
    match recv(&world.runtime, &mut world.removed) {
        RemoveOutcome::Succeeded {
            correlation_id: reported,
            add_type: reported_type,
            ..
        } => {
            assert_eq!(reported.as_str(), correlation_id);
            assert_eq!(reported_type, parse_add_type(&add_type));
        }
        other => panic!("expected removal success, got {other:?}"),
    }
}

#[then("a resolution is requested for {correlation_id}")]
fn a_resolution_is_requested(world: &mut World, correlation_id: String) {
    let request = recv(&world.runtime, &mut world.resolutions);
    assert_eq!(request.correlation_id.as_str(), correlation_id);
    world.wait_for(
        world.adder.subscribe_phase(),
        CyclePhase::AwaitingResolution,
    );
}

#[then("the add coordinator is idle")]
fn the_add_coordinator_is_idle(world: &mut World) {
    world.wait_for(world.adder.subscribe_phase(), CyclePhase::Idle);
    assert!(!world.adder.in_progress());
}

#[then("the add coordinator is not in progress")]
fn the_add_coordinator_is_not_in_progress(world: &mut World) {
    assert!(!world.adder.in_progress());
}

#[then("the remove coordinator is idle")]
fn the_remove_coordinator_is_idle(world: &mut World) {
    world.wait_for(world.remover.subscribe_phase(), CyclePhase::Idle);
    assert!(!world.remover.in_progress());
}

#[then("no further add outcome is reported")]
fn no_further_add_outcome_is_reported(world: &mut World) {
    assert!(world.added.try_recv().is_err());
}

#[then("every connection has been released")]
fn every_connection_has_been_released(world: &mut World) {
    assert_eq!(world.service.live_connections(), 0);
}

#[then("the location service received no calls")]
fn the_location_service_received_no_calls(world: &mut World) {
    assert!(world.service.calls().is_empty());
    assert_eq!(world.service.opened(), 0);
}

#[scenario(
    path = "tests/features/coordinator_cycles.feature",
    name = "Adding a geofence reports a single success"
)]
fn adding_a_geofence_reports_a_single_success(world: World) {
    drop(world);
}

#[scenario(
    path = "tests/features/coordinator_cycles.feature",
    name = "Overlapping add requests are rejected until the cycle ends"
)]
fn overlapping_add_requests_are_rejected(world: World) {
    drop(world);
}

#[scenario(
    path = "tests/features/coordinator_cycles.feature",
    name = "Recoverable connection failures hand over to the resolution flow"
)]
fn recoverable_failures_hand_over_to_resolution(world: World) {
    drop(world);
}

#[scenario(
    path = "tests/features/coordinator_cycles.feature",
    name = "Removal outcomes echo the add type"
)]
fn removal_outcomes_echo_the_add_type(world: World) {
    drop(world);
}

#[scenario(
    path = "tests/features/coordinator_cycles.feature",
    name = "A failed add still disconnects"
)]
fn a_failed_add_still_disconnects(world: World) {
    drop(world);
}

#[scenario(
    path = "tests/features/coordinator_cycles.feature",
    name = "Empty requests are rejected as invalid"
)]
fn empty_requests_are_rejected_as_invalid(world: World) {
    drop(world);
}
