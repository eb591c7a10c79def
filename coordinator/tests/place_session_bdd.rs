//! Behaviour tests for the saved place session over a JSON file store.

#![expect(
    clippy::expect_used,
    reason = "test code uses expect for clear failure messages"
)]

use std::sync::Arc;
use std::time::Duration;

use geofence_coordinator::domain::ports::{ChannelResolutionFlow, GeofenceStore};
use geofence_coordinator::domain::{
    Coordinates, CoordinatorPorts, CyclePhase, Locale, PlaceSession, PlaceSettings, SessionNotice,
};
use geofence_coordinator::outbound::{FlattenedGeofenceStore, JsonFileKeyValueBackend};
use geofence_coordinator::test_support::{ScriptedLocationService, ServiceCall, temp_json_store};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;
use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);
const STORE_FILE: &str = "geofences.json";

type JsonStore = FlattenedGeofenceStore<JsonFileKeyValueBackend>;

struct World {
    service: ScriptedLocationService,
    ports: CoordinatorPorts,
    store: Arc<JsonStore>,
    session: PlaceSession,
    notices: Vec<SessionNotice>,
    dir: TempDir,
    runtime: Runtime,
}

impl World {
    fn next_notice(&mut self) -> SessionNotice {
        let session = &mut self.session;
        self.runtime.block_on(async {
            timeout(WAIT, session.process_next_outcome())
                .await
                .expect("outcome should arrive in time")
                .expect("outcome applied")
        })
    }

    fn save(&mut self, latitude: f64, longitude: f64, city: &str) -> SessionNotice {
        let center = Coordinates::new(latitude, longitude).expect("valid coordinates");
        let locale = Locale {
            country: "Spain".to_owned(),
            city: city.to_owned(),
            address: format!("Plaza Mayor, {city}"),
        };
        let session = &mut self.session;
        self.runtime
            .block_on(session.save_at(center, locale))
            .expect("save")
    }

    fn wait_until_idle(&self) {
        let mut adder = self.session.adder().subscribe_phase();
        let mut remover = self.session.remover().subscribe_phase();
        self.runtime.block_on(async {
            timeout(WAIT, async {
                adder
                    .wait_for(|phase| *phase == CyclePhase::Idle)
                    .await
                    .expect("adder phase channel open");
                remover
                    .wait_for(|phase| *phase == CyclePhase::Idle)
                    .await
                    .expect("remover phase channel open");
            })
            .await
            .expect("coordinators should go idle");
        });
    }

    fn stored_city(&self) -> Option<String> {
        self.runtime
            .block_on(self.store.get("1"))
            .expect("store readable")
            .map(|geofence| geofence.locale().city.clone())
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
    let (flow, _resolutions) = ChannelResolutionFlow::channel();
    let ports = CoordinatorPorts::new(Arc::new(service.clone()), Arc::new(flow));
    let (dir, store) = temp_json_store();
    let store = Arc::new(store);
    let session = {
        let _entered = runtime.enter();
        PlaceSession::new(PlaceSettings::default(), store.clone(), &ports)
    };
    World {
        service,
        ports,
        store,
        session,
        notices: Vec::new(),
        dir,
        runtime,
    }
}

#[given("an empty place store on disk")]
fn an_empty_place_store_on_disk(world: &mut World) {
    assert!(world.store.backend().is_empty());
}

#[given("a place saved at {latitude}, {longitude} in {city}")]
fn a_place_saved_at(world: &mut World, latitude: f64, longitude: f64, city: String) {
    world.save(latitude, longitude, &city);
    assert_eq!(
        world.next_notice(),
        SessionNotice::GeofenceAdded {
            place_id: "1".to_owned()
        }
    );
    world.wait_until_idle();
}

#[when("the place is saved at {latitude}, {longitude} in {city}")]
fn the_place_is_saved_at(world: &mut World, latitude: f64, longitude: f64, city: String) {
    let notice = world.save(latitude, longitude, &city);
    assert!(matches!(notice, SessionNotice::Submitted { .. }));
}

#[when("the place is deleted")]
fn the_place_is_deleted(world: &mut World) {
    let notice = world.session.delete();
    assert!(matches!(notice, SessionNotice::Submitted { .. }));
}

#[then("the session reports the replacement as submitted")]
fn the_session_reports_the_replacement_as_submitted(world: &mut World) {
    let notice = world.next_notice();
    assert!(
        matches!(notice, SessionNotice::Submitted { .. }),
        "got {notice:?}"
    );
    world.notices.push(notice);
}

#[then("the session reports the geofence as added")]
fn the_session_reports_the_geofence_as_added(world: &mut World) {
    let notice = world.next_notice();
    assert_eq!(
        notice,
        SessionNotice::GeofenceAdded {
            place_id: "1".to_owned()
        }
    );
    assert!(world.session.is_settled());
    world.notices.push(notice);
}

#[then("the session reports the geofence as deleted")]
fn the_session_reports_the_geofence_as_deleted(world: &mut World) {
    let notice = world.next_notice();
    assert_eq!(
        notice,
        SessionNotice::GeofenceDeleted {
            place_id: "1".to_owned()
        }
    );
    assert!(world.session.current().is_none());
}

#[then("the stored place is in {city}")]
fn the_stored_place_is_in(world: &mut World, city: String) {
    assert_eq!(world.stored_city(), Some(city));
}

#[then("the place store is empty")]
fn the_place_store_is_empty(world: &mut World) {
    assert_eq!(world.stored_city(), None);
    let reopened =
        JsonFileKeyValueBackend::open(&world.dir.path().join(STORE_FILE)).expect("reopen store");
    assert!(reopened.is_empty());
}

#[then("a session restored from the same store finds the place")]
fn a_session_restored_from_the_same_store_finds_the_place(world: &mut World) {
    let backend =
        JsonFileKeyValueBackend::open(&world.dir.path().join(STORE_FILE)).expect("reopen store");
    let store = Arc::new(FlattenedGeofenceStore::new(backend));
    let mut restored = {
        let _entered = world.runtime.enter();
        PlaceSession::new(PlaceSettings::default(), store, &world.ports)
    };
    let place_id = world
        .runtime
        .block_on(restored.restore())
        .expect("restore")
        .map(|geofence| geofence.place_id().to_owned());
    assert_eq!(place_id, Some("1".to_owned()));
}

#[then("the old geofence was removed before the new one was added")]
fn the_old_geofence_was_removed_first(world: &mut World) {
    let calls = world.service.calls();
    let removal = calls
        .iter()
        .position(|call| matches!(call, ServiceCall::RemoveByIds { .. }))
        .expect("old geofence removed");
    let last_add = calls
        .iter()
        .rposition(|call| matches!(call, ServiceCall::Add { .. }))
        .expect("replacement added");
    assert!(removal < last_add);
}

#[scenario(
    path = "tests/features/place_session.feature",
    name = "Saving a place persists and registers its geofence"
)]
fn saving_a_place_persists_and_registers_it(world: World) {
    drop(world);
}

#[scenario(
    path = "tests/features/place_session.feature",
    name = "Saving again replaces the previous geofence"
)]
fn saving_again_replaces_the_previous_geofence(world: World) {
    drop(world);
}

#[scenario(
    path = "tests/features/place_session.feature",
    name = "Deleting a place clears the store"
)]
fn deleting_a_place_clears_the_store(world: World) {
    drop(world);
}
