//! Live subscriber registry and fan-out.
//!
//! Every connected client owns a bounded outbound queue. The registry keeps
//! the sending half of each queue and [`SubscriberRegistry::broadcast`] pushes
//! one pre-serialized frame into every queue without waiting. A full queue
//! loses that copy; a closed queue is removed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use rfrelay_proto::{BroadcastEvent, ServerMessage};

/// Identifier of a live subscriber (one per connection).
pub type SubscriberId = String;

/// A serialized message shared by every subscriber queue.
pub type Frame = Arc<str>;

/// One registered subscriber.
struct SubscriberEntry {
    sender: mpsc::Sender<Frame>,
    peer: Option<String>,
    connected_at: Instant,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time view of a subscriber, for health and debugging.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub peer: Option<String>,
    pub connected_secs: u64,
    pub delivered: u64,
    pub dropped: u64,
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that accepted the frame.
    pub delivered: usize,
    /// Subscribers whose queue was full.
    pub dropped: usize,
    /// Subscribers found closed and removed.
    pub closed: usize,
}

/// Set of currently connected subscribers.
pub struct SubscriberRegistry {
    subscribers: DashMap<SubscriberId, SubscriberEntry>,
    queue_capacity: usize,
}

impl SubscriberRegistry {
    /// Create a registry whose [`connect`](Self::connect) queues hold
    /// `queue_capacity` frames.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Admit a subscriber that reads from the other end of `sink`.
    pub fn register(&self, sink: mpsc::Sender<Frame>, peer: Option<String>) -> SubscriberId {
        let id = uuid::Uuid::new_v4().to_string();

        self.subscribers.insert(
            id.clone(),
            SubscriberEntry {
                sender: sink,
                peer: peer.clone(),
                connected_at: Instant::now(),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            },
        );

        tracing::info!(
            subscriber_id = %id,
            peer = peer.as_deref().unwrap_or("-"),
            total = self.subscribers.len(),
            "subscriber connected"
        );

        id
    }

    /// Create a bounded queue, register its sending half and return the
    /// receiving half.
    pub fn connect(&self, peer: Option<String>) -> (SubscriberId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        (self.register(tx, peer), rx)
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unregister(&self, id: &str) -> bool {
        match self.subscribers.remove(id) {
            Some((_, entry)) => {
                tracing::info!(
                    subscriber_id = %id,
                    delivered = entry.delivered.load(Ordering::Relaxed),
                    dropped = entry.dropped.load(Ordering::Relaxed),
                    total = self.subscribers.len(),
                    "subscriber disconnected"
                );
                true
            }
            None => false,
        }
    }

    /// Deliver `event` as a `newReading` message to every current subscriber.
    ///
    /// Never waits on a subscriber and never fails.
    pub fn broadcast(&self, event: &BroadcastEvent) -> BroadcastReport {
        let frame: Frame = match serde_json::to_string(&ServerMessage::new_reading(event.clone())) {
            Ok(text) => text.into(),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize broadcast");
                return BroadcastReport::default();
            }
        };

        self.broadcast_frame(frame)
    }

    /// Deliver a pre-serialized frame to every current subscriber.
    pub fn broadcast_frame(&self, frame: Frame) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.sender.try_send(frame.clone()) {
                Ok(()) => {
                    entry.delivered.fetch_add(1, Ordering::Relaxed);
                    report.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    entry.dropped.fetch_add(1, Ordering::Relaxed);
                    report.dropped += 1;
                    tracing::debug!(subscriber_id = %entry.key(), "subscriber queue full, frame dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(entry.key().clone()),
            }
        }

        // Removal happens after iteration; DashMap shards are locked while iterating.
        for id in closed {
            if self
                .subscribers
                .remove_if(&id, |_, entry| entry.sender.is_closed())
                .is_some()
            {
                report.closed += 1;
            }
        }

        if report.closed > 0 {
            tracing::info!(
                closed = report.closed,
                total = self.subscribers.len(),
                "removed closed subscribers"
            );
        }

        report
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if no subscriber is registered.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Queue capacity used by [`connect`](Self::connect).
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Snapshot of all registered subscribers.
    pub fn list(&self) -> Vec<SubscriberInfo> {
        self.subscribers
            .iter()
            .map(|entry| SubscriberInfo {
                id: entry.key().clone(),
                peer: entry.peer.clone(),
                connected_secs: entry.connected_at.elapsed().as_secs(),
                delivered: entry.delivered.load(Ordering::Relaxed),
                dropped: entry.dropped.load(Ordering::Relaxed),
            })
            .collect()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_QUEUE_CAPACITY)
    }
}
