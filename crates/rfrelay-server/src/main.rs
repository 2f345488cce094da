//! rfrelay - real-time RF reading relay.

use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rfrelay_server::{create_router, start_background, AppState, Args, RelayConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let log_filter = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "rfrelay_server={0},rfrelay_core={0},tower_http=info",
                    log_filter
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config: RelayConfig = args.into();
    let listen_addr = config.listen_addr();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_path = %config.data_path.display(),
        snapshot_limit = config.snapshot_limit,
        queue_capacity = config.queue_capacity,
        "starting rfrelay"
    );

    let state = AppState::new(config);

    // Set up graceful shutdown
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);

    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(());
    });

    // The store opens in the background; requests are served meanwhile.
    let background = tokio::spawn(start_background(state.clone(), shutdown_tx.clone()));

    let app = create_router(state.clone());
    let listener = TcpListener::bind(&listen_addr).await?;

    tracing::info!("listening on http://{}", listen_addr);
    tracing::info!("live readings at ws://{}/ws", listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    match background.await {
        Ok(tasks) => tasks.join().await,
        Err(e) => tracing::warn!(error = %e, "startup task panicked"),
    }

    if let Some(store) = state.store.store() {
        if let Err(e) = store.flush() {
            tracing::warn!(error = %e, "failed to flush reading store");
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}
