//! Reading store connection handle and change log pruning.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use rfrelay_core::{ReadingStore, StorageConfig};

use crate::error::Error;

/// Connection state of the reading store.
#[derive(Clone)]
pub enum ConnectionState {
    /// Startup has not finished opening the store.
    Connecting,
    /// The store is open.
    Connected(Arc<ReadingStore>),
    /// Opening the store failed; requires a restart.
    Failed(String),
}

impl ConnectionState {
    /// Short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected(_) => "connected",
            ConnectionState::Failed(_) => "failed",
        }
    }
}

/// Shared handle to the reading store.
///
/// Starts out `Connecting` and makes exactly one transition, to `Connected`
/// or `Failed`. Later transitions are ignored.
#[derive(Clone)]
pub struct StoreHandle {
    state: Arc<RwLock<ConnectionState>>,
}

impl StoreHandle {
    /// Create a handle that is not connected yet.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Connecting)),
        }
    }

    /// Create a handle around an already open store.
    pub fn connected(store: Arc<ReadingStore>) -> Self {
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Connected(store))),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }

    /// The store, if connected.
    pub fn store(&self) -> Option<Arc<ReadingStore>> {
        match &*self.state.read() {
            ConnectionState::Connected(store) => Some(store.clone()),
            _ => None,
        }
    }

    /// Check whether the store is connected.
    pub fn is_connected(&self) -> bool {
        matches!(*self.state.read(), ConnectionState::Connected(_))
    }

    /// Leave `Connecting`. Returns `false` if the handle had already settled.
    fn settle(&self, next: ConnectionState) -> bool {
        let mut state = self.state.write();
        if !matches!(*state, ConnectionState::Connecting) {
            warn!(
                current = state.as_str(),
                ignored = next.as_str(),
                "store connection already settled"
            );
            return false;
        }
        *state = next;
        true
    }

    /// Mark the store as open.
    pub fn mark_connected(&self, store: Arc<ReadingStore>) -> bool {
        self.settle(ConnectionState::Connected(store))
    }

    /// Mark the connection attempt as failed.
    pub fn mark_failed(&self, reason: impl Into<String>) -> bool {
        self.settle(ConnectionState::Failed(reason.into()))
    }

    /// Open the store described by `config` and settle the handle.
    ///
    /// sled opens synchronously, so this runs on the blocking pool.
    pub async fn connect(&self, config: StorageConfig) -> Result<Arc<ReadingStore>, Error> {
        let path = config.path.display().to_string();
        info!(path = %path, "opening reading store");

        let opened = tokio::task::spawn_blocking(move || ReadingStore::open(config))
            .await
            .map_err(|e| Error::Connection(format!("store open task failed: {}", e)))
            .and_then(|result| result.map_err(Error::from));

        match opened {
            Ok(store) => {
                let store = Arc::new(store);
                self.mark_connected(store.clone());
                info!(path = %path, readings = store.len(), lsn = store.changelog().current_lsn(), "reading store connected");
                Ok(store)
            }
            Err(e) => {
                error!(path = %path, error = %e, "ConnectionError: reading store unavailable");
                self.mark_failed(e.to_string());
                Err(e)
            }
        }
    }
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for a background change log pruning task.
pub struct PruneTask {
    handle: JoinHandle<()>,
}

impl PruneTask {
    /// Start pruning the change log down to `keep` entries every `interval`.
    pub fn start(
        store: Arc<ReadingStore>,
        interval: Duration,
        keep: usize,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), keep, "change log prune task started");

            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        info!("change log prune task stopping");
                        break;
                    }
                    _ = ticker.tick() => {}
                }

                let store = store.clone();
                match tokio::task::spawn_blocking(move || store.changelog().retain_last(keep)).await {
                    Ok(Ok(0)) => {}
                    Ok(Ok(removed)) => info!(removed, keep, "change log pruned"),
                    Ok(Err(e)) => warn!(error = %e, "change log prune failed"),
                    Err(e) => warn!(error = %e, "change log prune task panicked"),
                }
            }
        });

        Self { handle }
    }

    /// Wait for the task to finish after shutdown was signalled.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!(error = %e, "prune task panicked");
        }
    }
}
