//! Change feed over the store's change log.
//!
//! A [`ChangeFeed`] tails the change log through a sled watch subscription,
//! keeps only the configured change kinds, resolves the full document for each
//! change and yields [`ChangeEvent`]s in the order the log surfaces them.
//!
//! ```text
//! writer ──► ReadingStore ──► changelog tree ──watch──► ChangeFeed ──► stream
//!                 ▲                                          │
//!                 └────────── full-document lookup ──────────┘
//! ```
//!
//! The feed never retries. A change that cannot be decoded or looked up ends
//! the stream with a single `Err`, which callers must treat as fatal. A clean
//! end of stream only happens when the store itself is dropped.

use std::pin::Pin;

use futures::stream::{self, BoxStream, StreamExt};
use sled::Tree;
use tracing::trace;

use rfrelay_proto::{ChangeEvent, ChangeKind, ChangeLogEntry, RecordId};

use crate::error::Error;
use crate::replication::ChangeLog;
use crate::storage::record::decode_document;
use crate::storage::ReadingStore;

/// How the feed obtains the post-change document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FullDocument {
    /// Look the record up by id when the change is processed. A miss (the
    /// record is gone by then) yields an event without a document.
    #[default]
    UpdateLookup,
    /// Use the post-image recorded in the change log entry.
    Recorded,
}

/// Options for a change feed subscription.
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Change kinds to surface; everything else is skipped.
    pub operations: Vec<ChangeKind>,
    /// Full-document resolution policy.
    pub full_document: FullDocument,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            operations: ChangeKind::UPSERTS.to_vec(),
            full_document: FullDocument::UpdateLookup,
        }
    }
}

impl FeedOptions {
    /// Set the change kinds to surface.
    pub fn with_operations(mut self, operations: impl Into<Vec<ChangeKind>>) -> Self {
        self.operations = operations.into();
        self
    }

    /// Set the full-document resolution policy.
    pub fn with_full_document(mut self, full_document: FullDocument) -> Self {
        self.full_document = full_document;
        self
    }

    fn accepts(&self, kind: ChangeKind) -> bool {
        self.operations.contains(&kind)
    }
}

/// A live subscription to the store's changes.
pub struct ChangeFeed {
    subscriber: Pin<Box<sled::Subscriber>>,
    readings: Tree,
    options: FeedOptions,
}

impl ChangeFeed {
    /// Subscribe to changes made to `store` from now on.
    ///
    /// The watch is registered before this returns, so no write that starts
    /// afterwards can be missed.
    pub fn subscribe(store: &ReadingStore, options: FeedOptions) -> Self {
        let subscriber = store.changelog().tree().watch_prefix(Vec::new());

        Self {
            subscriber: Box::pin(subscriber),
            readings: store.readings_tree().clone(),
            options,
        }
    }

    /// Wait for the next matching change.
    ///
    /// Returns `None` once the store has shut down.
    pub async fn next_event(&mut self) -> Option<Result<ChangeEvent, Error>> {
        loop {
            let value = match self.subscriber.as_mut().await? {
                sled::Event::Insert { value, .. } => value,
                // Log pruning, not a record change.
                sled::Event::Remove { .. } => continue,
            };

            let entry = match ChangeLog::decode_entry(&value) {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };

            if !self.options.accepts(entry.kind) {
                trace!(lsn = entry.lsn, kind = entry.kind.as_str(), "change filtered out");
                continue;
            }

            return Some(self.resolve(entry));
        }
    }

    /// Turn a change log entry into a change event with its document.
    ///
    /// The lookup is a single point read on the readings tree and stays on
    /// the polling task. It only touches disk when the page is not cached;
    /// callers that cannot afford that use [`FullDocument::Recorded`].
    fn resolve(&self, entry: ChangeLogEntry) -> Result<ChangeEvent, Error> {
        let record_id = RecordId::from_bytes(entry.record_id);

        let document = match self.options.full_document {
            FullDocument::UpdateLookup => match self.readings.get(record_id.as_bytes())? {
                Some(bytes) => Some(decode_document(&bytes)?),
                None => None,
            },
            FullDocument::Recorded => entry
                .after_data
                .as_deref()
                .map(decode_document)
                .transpose()?,
        };

        Ok(ChangeEvent::new(entry.lsn, entry.kind, record_id, document))
    }

    /// Consume the feed as a stream.
    ///
    /// The stream ends right after yielding its first error.
    pub fn into_stream(self) -> BoxStream<'static, Result<ChangeEvent, Error>> {
        stream::unfold(Some(self), |state| async move {
            let mut feed = state?;
            match feed.next_event().await? {
                Ok(event) => Some((Ok(event), Some(feed))),
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use rfrelay_proto::Document;
    use serde_json::json;
    use std::time::Duration;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    async fn next(feed: &mut ChangeFeed) -> ChangeEvent {
        tokio::time::timeout(Duration::from_secs(5), feed.next_event())
            .await
            .expect("timed out waiting for change")
            .expect("feed ended")
            .expect("feed error")
    }

    #[tokio::test]
    async fn test_insert_yields_full_document() {
        let store = ReadingStore::open(StorageConfig::temporary()).unwrap();
        let mut feed = ChangeFeed::subscribe(&store, FeedOptions::default());

        let id = store
            .insert(doc(json!({"frequency": 101.1, "signalStrength": -42})))
            .unwrap();

        let event = next(&mut feed).await;
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(event.record_id, id);
        assert_eq!(event.document.unwrap()["frequency"], json!(101.1));
    }

    #[tokio::test]
    async fn test_deletes_are_filtered() {
        let store = ReadingStore::open(StorageConfig::temporary()).unwrap();
        let mut feed = ChangeFeed::subscribe(
            &store,
            FeedOptions::default().with_full_document(FullDocument::Recorded),
        );

        let id = store.insert(doc(json!({"frequency": 1}))).unwrap();
        store.delete(id).unwrap();
        let other = store.insert(doc(json!({"frequency": 2}))).unwrap();

        assert_eq!(next(&mut feed).await.record_id, id);
        let event = next(&mut feed).await;
        assert_eq!(event.record_id, other);
        assert_eq!(event.kind, ChangeKind::Insert);
    }

    #[tokio::test]
    async fn test_lookup_miss_yields_absent_document() {
        let store = ReadingStore::open(StorageConfig::temporary()).unwrap();
        let mut feed = ChangeFeed::subscribe(&store, FeedOptions::default());

        let id = store.insert(doc(json!({"frequency": 1}))).unwrap();
        store.delete(id).unwrap();

        let event = next(&mut feed).await;
        assert_eq!(event.record_id, id);
        assert!(event.document.is_none());
    }

    #[tokio::test]
    async fn test_recorded_keeps_post_image() {
        let store = ReadingStore::open(StorageConfig::temporary()).unwrap();
        let mut feed = ChangeFeed::subscribe(
            &store,
            FeedOptions::default().with_full_document(FullDocument::Recorded),
        );

        let id = store.insert(doc(json!({"frequency": 1}))).unwrap();
        store.update(id, doc(json!({"frequency": 2}))).unwrap();
        store.delete(id).unwrap();

        assert_eq!(next(&mut feed).await.document.unwrap()["frequency"], json!(1));
        let update = next(&mut feed).await;
        assert_eq!(update.kind, ChangeKind::Update);
        assert_eq!(update.document.unwrap()["frequency"], json!(2));
    }

    #[tokio::test]
    async fn test_operation_filter() {
        let store = ReadingStore::open(StorageConfig::temporary()).unwrap();
        let mut feed = ChangeFeed::subscribe(
            &store,
            FeedOptions::default().with_operations([ChangeKind::Update]),
        );

        let id = store.insert(doc(json!({"frequency": 1}))).unwrap();
        store.update(id, doc(json!({"frequency": 2}))).unwrap();

        let event = next(&mut feed).await;
        assert_eq!(event.kind, ChangeKind::Update);
    }

    #[tokio::test]
    async fn test_concurrent_writers_surface_in_lsn_order() {
        let store = std::sync::Arc::new(ReadingStore::open(StorageConfig::temporary()).unwrap());
        let mut feed = ChangeFeed::subscribe(
            &store,
            FeedOptions::default().with_full_document(FullDocument::Recorded),
        );

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.insert(doc(json!({"writer": w, "seq": i}))).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let mut lsns = Vec::with_capacity(200);
        for _ in 0..200 {
            lsns.push(next(&mut feed).await.lsn);
        }
        assert_eq!(lsns, (1..=200).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_pruning_is_not_a_change() {
        let store = ReadingStore::open(StorageConfig::temporary()).unwrap();
        store.insert(doc(json!({"frequency": 1}))).unwrap();

        let mut feed = ChangeFeed::subscribe(&store, FeedOptions::default());
        store.changelog().retain_last(0).unwrap();
        let id = store.insert(doc(json!({"frequency": 2}))).unwrap();

        assert_eq!(next(&mut feed).await.record_id, id);
    }

    #[tokio::test]
    async fn test_corrupt_entry_ends_stream_with_error() {
        let store = ReadingStore::open(StorageConfig::temporary()).unwrap();
        let mut stream = ChangeFeed::subscribe(&store, FeedOptions::default()).into_stream();

        store
            .changelog()
            .tree()
            .insert(ChangeLog::encode_key(u64::MAX), b"garbage".to_vec())
            .unwrap();
        store.insert(doc(json!({"frequency": 1}))).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(matches!(first, Some(Err(Error::Deserialization(_)))));

        let after = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(after.is_none());
    }
}
