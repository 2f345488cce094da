//! Recent-readings query service.

use rfrelay_proto::Document;
use thiserror::Error;

use crate::store::StoreHandle;

/// Snapshot query failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The store has not been opened (or failed to open).
    #[error("data store not connected")]
    ServiceUnavailable,

    /// The query itself failed.
    #[error("{0}")]
    Query(String),
}

/// Serves the most recent readings straight from the store.
#[derive(Clone)]
pub struct SnapshotService {
    store: StoreHandle,
    limit: usize,
}

impl SnapshotService {
    /// Create a service that returns at most `limit` readings per call.
    pub fn new(store: StoreHandle, limit: usize) -> Self {
        Self { store, limit }
    }

    /// Configured maximum page size.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Up to `limit` readings, newest timestamp first.
    pub async fn get_recent(&self, limit: usize) -> Result<Vec<Document>, SnapshotError> {
        let store = self.store.store().ok_or(SnapshotError::ServiceUnavailable)?;

        tokio::task::spawn_blocking(move || store.recent(limit))
            .await
            .map_err(|e| SnapshotError::Query(e.to_string()))?
            .map_err(|e| SnapshotError::Query(e.to_string()))
    }

    /// A page of the configured size, or smaller when `requested` is.
    pub async fn get_page(&self, requested: Option<usize>) -> Result<Vec<Document>, SnapshotError> {
        let limit = requested.map_or(self.limit, |n| n.min(self.limit));
        self.get_recent(limit).await
    }
}
