//! Drive a saved place against the in-process simulated location service.
//!
//! Settings come from `GEOFENCE_*` environment variables (see
//! `GeofenceSettings`); the subcommand picks the operation. Progress is
//! reported through JSON logs, filtered by `RUST_LOG` (default `info`).

use std::ffi::OsString;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result, eyre};
use geofence_coordinator::config::GeofenceSettings;
use geofence_coordinator::domain::ports::{
    ChannelResolutionFlow, ConnectionFailure, ResolutionRequest, ResolutionResult,
};
use geofence_coordinator::domain::{
    Coordinates, CoordinatorPorts, Locale, PlaceSession, SessionNotice, TransitionReceiver,
};
use geofence_coordinator::outbound::{
    FlattenedGeofenceStore, JsonFileKeyValueBackend, SimulatedLocationService,
    SimulatedServiceConfig, TracingNotifier,
};
use ortho_config::OrthoConfig;
use tokio::runtime::{Builder, Handle};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// `geofence-demo` command arguments.
#[derive(Debug, Parser)]
#[command(
    name = "geofence-demo",
    about = "Save, register and trigger a place geofence against a simulated location service",
    version
)]
struct Cli {
    /// Make the first connection attempt need a user resolution.
    #[arg(long)]
    require_resolution: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Save the place at a position, replacing any previous geofence.
    Save {
        #[arg(long, allow_negative_numbers = true)]
        latitude: f64,
        #[arg(long, allow_negative_numbers = true)]
        longitude: f64,
        #[arg(long, default_value = "")]
        country: String,
        #[arg(long, default_value = "")]
        city: String,
        #[arg(long, default_value = "")]
        address: String,
    },
    /// Remove the saved place and its geofence.
    Delete,
    /// Log the saved place.
    Show,
    /// Register the saved place, then report a device position.
    Enter {
        #[arg(long, allow_negative_numbers = true)]
        latitude: f64,
        #[arg(long, allow_negative_numbers = true)]
        longitude: f64,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let settings = GeofenceSettings::load_from_iter([OsString::from("geofence-demo")])
        .map_err(|error| eyre!("failed to load geofence settings: {error}"))?;
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("failed to build Tokio runtime")?;
    runtime.block_on(run(cli, settings))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(e) = fmt().with_env_filter(filter).json().try_init() {
        warn!(error = %e, "tracing init failed");
    }
}

async fn run(cli: Cli, settings: GeofenceSettings) -> Result<()> {
    let place = settings.place_settings()?;
    let store_path = settings.store_path();
    let backend = JsonFileKeyValueBackend::open(&store_path)
        .wrap_err_with(|| format!("failed to open geofence store at {}", store_path.display()))?;
    let store = Arc::new(FlattenedGeofenceStore::new(backend));

    let service =
        SimulatedLocationService::new(SimulatedServiceConfig::default(), Handle::current());
    if cli.require_resolution {
        service.fail_next_connect(ConnectionFailure::resolution_required(
            "location permission has not been granted",
        ));
    }
    let (flow, mut resolutions) = ChannelResolutionFlow::channel();
    let ports = CoordinatorPorts::new(Arc::new(service.clone()), Arc::new(flow));
    let mut session = PlaceSession::new(place, store.clone(), &ports);
    session.restore().await?;

    match cli.command {
        Command::Save {
            latitude,
            longitude,
            country,
            city,
            address,
        } => {
            let center = Coordinates::new(latitude, longitude)?;
            let locale = Locale {
                country,
                city,
                address,
            };
            let notice = session.save_at(center, locale).await?;
            settle(&mut session, &mut resolutions, notice).await?;
        }
        Command::Delete => {
            let notice = session.delete();
            settle(&mut session, &mut resolutions, notice).await?;
        }
        Command::Show => session.current().map_or_else(
            || info!("no place has been saved"),
            |geofence| {
                info!(
                    place_id = geofence.place_id(),
                    latitude = geofence.center().latitude(),
                    longitude = geofence.center().longitude(),
                    radius_meters = geofence.radius_meters(),
                    address = %geofence.locale().address,
                    "saved place"
                );
            },
        ),
        Command::Enter {
            latitude,
            longitude,
        } => {
            let position = Coordinates::new(latitude, longitude)?;
            let notice = session.register_current();
            settle(&mut session, &mut resolutions, notice).await?;

            let receiver = TransitionReceiver::new(store, Arc::new(TracingNotifier));
            let events = service.evaluate(position);
            if events.is_empty() {
                info!(
                    latitude,
                    longitude, "position is outside every registered geofence"
                );
            }
            for event in events {
                let disposition = receiver.handle(event).await?;
                info!(?disposition, "transition handled");
            }
        }
    }
    Ok(())
}

/// Apply outcomes until the session has nothing outstanding, resolving
/// connection problems as they are raised.
async fn settle(
    session: &mut PlaceSession,
    resolutions: &mut mpsc::UnboundedReceiver<ResolutionRequest>,
    notice: SessionNotice,
) -> Result<()> {
    info!(%notice, "request handled");
    if !matches!(notice, SessionNotice::Submitted { .. }) {
        return Ok(());
    }
    while !session.is_settled() {
        tokio::select! {
            Some(request) = resolutions.recv() => {
                info!(
                    kind = ?request.kind,
                    correlation_id = %request.correlation_id,
                    failure = %request.failure,
                    "resolving connection problem"
                );
                let retried = session.on_resolution(&request, ResolutionResult::Resolved);
                info!(notice = %retried, "retried after resolution");
            }
            outcome = session.process_next_outcome() => {
                let applied = outcome?;
                info!(notice = %applied, "outcome applied");
            }
        }
    }
    Ok(())
}
