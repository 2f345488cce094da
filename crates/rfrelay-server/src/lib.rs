//! rfrelay server - live RF reading relay.
//!
//! This crate wires the reading store's change feed to connected WebSocket
//! clients and serves recent readings over HTTP:
//!
//! - [`normalize`] - change event to `newReading` payload
//! - [`registry`] - live subscriber set and fan-out
//! - [`relay`] - the change feed consumer loop
//! - [`snapshot`] - recent readings query
//! - [`store`] - store connection handle and change log pruning

pub mod config;
pub mod error;
pub mod normalize;
pub mod registry;
pub mod relay;
pub mod routes;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod ws;

pub use config::{Args, RelayConfig};
pub use error::{AppError, Error};
pub use registry::{BroadcastReport, SubscriberRegistry};
pub use relay::{Relay, RelayExit, RelayMonitor, RelayStatus};
pub use snapshot::{SnapshotError, SnapshotService};
pub use state::AppState;
pub use store::{ConnectionState, PruneTask, StoreHandle};

use axum::{routing::get, Router};
use rfrelay_core::{ChangeFeed, FeedOptions, StorageConfig};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the Axum router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::readings::routes())
        .merge(routes::ingest::routes())
        .route("/ws", get(ws::ws_readings))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Background tasks started once the store is connected.
#[derive(Default)]
pub struct Background {
    relay: Option<JoinHandle<RelayExit>>,
    prune: Option<PruneTask>,
}

impl Background {
    /// Wait for the background tasks after shutdown was signalled.
    pub async fn join(self) {
        if let Some(relay) = self.relay {
            match relay.await {
                Ok(exit) => tracing::info!(exit = ?exit, "relay finished"),
                Err(e) => tracing::warn!(error = %e, "relay task panicked"),
            }
        }
        if let Some(prune) = self.prune {
            prune.join().await;
        }
    }
}

/// Open the store, then start the relay and the prune task.
///
/// A store that fails to open is logged and leaves the server running
/// without a live relay; snapshot requests answer 503.
pub async fn start_background(state: AppState, shutdown: broadcast::Sender<()>) -> Background {
    // Subscribe before connecting so an early shutdown is not missed.
    let relay_shutdown = shutdown.subscribe();
    let prune_shutdown = shutdown.subscribe();
    let storage = StorageConfig::new(&state.config.data_path);

    let store = match state.store.connect(storage).await {
        Ok(store) => store,
        Err(_) => return Background::default(),
    };

    let options = FeedOptions::default().with_full_document(state.config.full_document);
    let feed = ChangeFeed::subscribe(&store, options).into_stream();
    let relay = Relay::with_monitor(feed, state.registry.clone(), state.relay.clone())
        .spawn(relay_shutdown);

    let prune = state.config.prune_interval.map(|interval| {
        PruneTask::start(
            store.clone(),
            interval,
            state.config.changelog_retention,
            prune_shutdown,
        )
    });

    Background {
        relay: Some(relay),
        prune,
    }
}
