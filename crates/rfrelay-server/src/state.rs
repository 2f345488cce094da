use std::sync::Arc;

use crate::config::RelayConfig;
use crate::error::AppError;
use crate::registry::SubscriberRegistry;
use crate::relay::RelayMonitor;
use crate::snapshot::{SnapshotError, SnapshotService};
use crate::store::StoreHandle;
use rfrelay_core::ReadingStore;

/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub config: RelayConfig,
    pub store: StoreHandle,
    pub snapshot: SnapshotService,
    pub registry: Arc<SubscriberRegistry>,
    pub relay: RelayMonitor,
}

impl AppState {
    /// State with a store that is still connecting.
    pub fn new(config: RelayConfig) -> Self {
        Self::with_store(config, StoreHandle::new())
    }

    pub fn with_store(config: RelayConfig, store: StoreHandle) -> Self {
        Self {
            snapshot: SnapshotService::new(store.clone(), config.snapshot_limit),
            registry: Arc::new(SubscriberRegistry::new(config.queue_capacity)),
            relay: RelayMonitor::new(),
            store,
            config,
        }
    }

    /// The connected store, or a 503.
    pub fn connected_store(&self) -> Result<Arc<ReadingStore>, AppError> {
        self.store
            .store()
            .ok_or_else(|| SnapshotError::ServiceUnavailable.into())
    }
}
