//! Reading write endpoints.
//!
//! Writers reach the embedded store through these routes. Every successful
//! write lands in the change log and is picked up by the change feed.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{post, put},
    Json, Router,
};
use serde_json::{json, Value};

use rfrelay_core::ReadingStore;
use rfrelay_proto::{Document, RecordId};

use crate::error::AppError;
use crate::AppState;

/// Ingest routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/readings", post(insert_reading))
        .route(
            "/readings/:id",
            put(replace_reading)
                .patch(update_reading)
                .delete(delete_reading),
        )
}

/// Unwrap a JSON body that must be an object.
fn document(body: Result<Json<Value>, JsonRejection>) -> Result<Document, AppError> {
    let Json(value) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(AppError::BadRequest(format!(
            "reading must be a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

/// Run a store write on the blocking pool; sled commits synchronously.
async fn write<T, F>(store: Arc<ReadingStore>, op: F) -> Result<T, AppError>
where
    F: FnOnce(&ReadingStore) -> Result<T, rfrelay_core::Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| AppError::Internal(format!("store write task failed: {}", e)))?
        .map_err(AppError::from)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

async fn insert_reading(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let store = state.connected_store()?;
    let doc = document(body)?;

    let id = write(store, move |store| store.insert(doc)).await?;
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "id": id }))))
}

async fn replace_reading(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let store = state.connected_store()?;
    let id: RecordId = id.parse()?;
    let doc = document(body)?;

    let data = write(store, move |store| store.replace(id, doc)).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

async fn update_reading(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let store = state.connected_store()?;
    let id: RecordId = id.parse()?;
    let changes = document(body)?;

    let data = write(store, move |store| store.update(id, changes)).await?;
    Ok(Json(json!({ "success": true, "data": data })))
}

async fn delete_reading(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let store = state.connected_store()?;
    let id: RecordId = id.parse()?;

    write(store, move |store| store.delete(id)).await?;
    Ok(Json(json!({ "success": true })))
}
