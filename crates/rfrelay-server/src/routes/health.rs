//! Liveness and health endpoints.

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::relay::RelayStatus;
use crate::store::ConnectionState;
use crate::AppState;

/// Health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(liveness))
        .route("/health", get(health_check))
}

/// Static liveness response.
async fn liveness() -> Json<Value> {
    Json(json!({ "message": "Realtime server running" }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let connection = state.store.state();
    let relay_status = state.relay.status();

    let store = match &connection {
        ConnectionState::Connected(store) => json!({
            "state": connection.as_str(),
            "readings": store.len(),
            "lsn": store.changelog().current_lsn(),
            "size_on_disk": store.size_on_disk().ok(),
        }),
        ConnectionState::Failed(reason) => json!({
            "state": connection.as_str(),
            "error": reason,
        }),
        ConnectionState::Connecting => json!({ "state": connection.as_str() }),
    };

    let mut relay = json!({
        "status": relay_status.as_str(),
        "stats": state.relay.stats(),
    });
    if let RelayStatus::Failed(reason) = &relay_status {
        relay["error"] = json!(reason);
    }

    let healthy = matches!(connection, ConnectionState::Connected(_))
        && relay_status == RelayStatus::Running;

    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "service": "rfrelay",
        "version": env!("CARGO_PKG_VERSION"),
        "store": store,
        "relay": relay,
        "subscribers": {
            "active": state.registry.len(),
            "queue_capacity": state.registry.queue_capacity(),
            "clients": state.registry.list(),
        }
    }))
}
