//! Recent readings endpoint.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::AppState;

/// Snapshot routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/getRF", get(get_recent))
}

#[derive(Debug, Deserialize)]
struct SnapshotParams {
    limit: Option<usize>,
}

/// Newest readings first, at most the configured limit.
async fn get_recent(
    State(state): State<AppState>,
    params: Result<Query<SnapshotParams>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(params) = params.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let data = state.snapshot.get_page(params.limit).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}
