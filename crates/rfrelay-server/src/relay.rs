//! Broadcast relay.
//!
//! The relay is the single consumer of the change feed. For each change it
//! normalizes the event and fans it out through the [`SubscriberRegistry`],
//! one event at a time and in feed order.
//!
//! A feed error is terminal: it is logged, the relay status becomes
//! [`RelayStatus::Failed`] and the loop exits without resubscribing. The rest
//! of the server keeps running.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use rfrelay_proto::ChangeEvent;

use crate::normalize::normalize;
use crate::registry::SubscriberRegistry;

/// Lifecycle of the relay loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    /// Not started (or the store never connected).
    Idle,
    /// Consuming the change feed.
    Running,
    /// Exited on shutdown or because the feed ended.
    Stopped,
    /// Exited on a feed error.
    Failed(String),
}

impl RelayStatus {
    /// Short lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayStatus::Idle => "idle",
            RelayStatus::Running => "running",
            RelayStatus::Stopped => "stopped",
            RelayStatus::Failed(_) => "failed",
        }
    }
}

/// Why the relay loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayExit {
    /// The shutdown signal fired.
    Shutdown,
    /// The feed ended without an error.
    FeedEnded,
    /// The feed yielded an error.
    FeedError(String),
}

/// Relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Change events pulled from the feed.
    pub events_seen: u64,
    /// Events fanned out.
    pub broadcasts: u64,
    /// Events skipped because they carried no document.
    pub skipped: u64,
}

#[derive(Default)]
struct Counters {
    events_seen: AtomicU64,
    broadcasts: AtomicU64,
    skipped: AtomicU64,
}

/// Shared, read-mostly view of a relay's state.
#[derive(Clone)]
pub struct RelayMonitor {
    status: Arc<RwLock<RelayStatus>>,
    counters: Arc<Counters>,
}

impl RelayMonitor {
    pub fn new() -> Self {
        Self {
            status: Arc::new(RwLock::new(RelayStatus::Idle)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Current status.
    pub fn status(&self) -> RelayStatus {
        self.status.read().clone()
    }

    /// Current counters.
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            events_seen: self.counters.events_seen.load(Ordering::Relaxed),
            broadcasts: self.counters.broadcasts.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }

    fn set_status(&self, status: RelayStatus) {
        *self.status.write() = status;
    }
}

impl Default for RelayMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds a change feed to the subscriber registry.
pub struct Relay<S> {
    feed: S,
    registry: Arc<SubscriberRegistry>,
    monitor: RelayMonitor,
}

impl<S, E> Relay<S>
where
    S: Stream<Item = Result<ChangeEvent, E>> + Unpin,
    E: Display,
{
    /// Create a relay with its own monitor.
    pub fn new(feed: S, registry: Arc<SubscriberRegistry>) -> Self {
        Self::with_monitor(feed, registry, RelayMonitor::new())
    }

    /// Create a relay reporting into an existing monitor.
    pub fn with_monitor(feed: S, registry: Arc<SubscriberRegistry>, monitor: RelayMonitor) -> Self {
        Self {
            feed,
            registry,
            monitor,
        }
    }

    /// Monitor for this relay.
    pub fn monitor(&self) -> RelayMonitor {
        self.monitor.clone()
    }

    /// Run until the feed ends or fails.
    pub async fn run(self) -> RelayExit {
        self.drive(std::future::pending()).await
    }

    /// Run until the feed ends or fails, or `shutdown` fires.
    pub async fn run_until_shutdown(self, mut shutdown: broadcast::Receiver<()>) -> RelayExit {
        self.drive(async move {
            let _ = shutdown.recv().await;
        })
        .await
    }

    async fn drive<F: Future<Output = ()>>(mut self, shutdown: F) -> RelayExit {
        tokio::pin!(shutdown);

        self.monitor.set_status(RelayStatus::Running);
        info!(subscribers = self.registry.len(), "relay started");

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("relay stopping on shutdown");
                    self.monitor.set_status(RelayStatus::Stopped);
                    return RelayExit::Shutdown;
                }

                item = self.feed.next() => match item {
                    Some(Ok(event)) => self.process(&event),
                    Some(Err(e)) => {
                        let message = e.to_string();
                        error!(error = %message, "change feed failed, live relay stopped");
                        self.monitor.set_status(RelayStatus::Failed(message.clone()));
                        return RelayExit::FeedError(message);
                    }
                    None => {
                        warn!("change feed ended");
                        self.monitor.set_status(RelayStatus::Stopped);
                        return RelayExit::FeedEnded;
                    }
                },
            }
        }
    }

    /// Normalize one change and fan it out.
    fn process(&self, event: &ChangeEvent) {
        let counters = &self.monitor.counters;
        counters.events_seen.fetch_add(1, Ordering::Relaxed);

        let Some(payload) = normalize(event) else {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            trace!(lsn = event.lsn, record_id = %event.record_id, "change without document skipped");
            return;
        };

        let report = self.registry.broadcast(&payload);
        counters.broadcasts.fetch_add(1, Ordering::Relaxed);

        debug!(
            lsn = event.lsn,
            kind = event.kind.as_str(),
            delivered = report.delivered,
            dropped = report.dropped,
            closed = report.closed,
            "reading broadcast"
        );
    }
}

impl<S, E> Relay<S>
where
    S: Stream<Item = Result<ChangeEvent, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    /// Run the relay as a background task.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<RelayExit> {
        tokio::spawn(self.run_until_shutdown(shutdown))
    }
}
