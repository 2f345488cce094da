//! Integration tests for the reading store and change feed.

use std::time::Duration;

use futures::StreamExt;
use rfrelay_core::{ChangeFeed, FeedOptions, ReadingStore, StorageConfig};
use rfrelay_proto::{ChangeKind, Document};
use serde_json::json;

fn reading(frequency: f64, timestamp: &str) -> Document {
    json!({
        "frequency": frequency,
        "signalStrength": -50,
        "classification": "FM",
        "timestamp": timestamp,
        "sensor": "roof-1"
    })
    .as_object()
    .cloned()
    .unwrap()
}

#[test]
fn test_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let id = {
        let store = ReadingStore::open(StorageConfig::new(dir.path())).unwrap();
        let id = store.insert(reading(98.1, "2024-03-01T10:00:00Z")).unwrap();
        store.insert(reading(99.3, "2024-03-01T11:00:00Z")).unwrap();
        store.flush().unwrap();
        id
    };

    let store = ReadingStore::open(StorageConfig::new(dir.path())).unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.changelog().current_lsn(), 2);

    let recent = store.recent(50).unwrap();
    assert_eq!(recent[0]["frequency"], json!(99.3));
    assert_eq!(recent[1]["_id"], json!(id.to_string()));
}

#[tokio::test]
async fn test_feed_is_a_live_tap() {
    let store = ReadingStore::open(StorageConfig::temporary()).unwrap();

    // Written before subscribing: never replayed.
    store.insert(reading(88.0, "2024-03-01T09:00:00Z")).unwrap();

    let mut stream = ChangeFeed::subscribe(&store, FeedOptions::default()).into_stream();

    let first = store.insert(reading(101.1, "2024-03-01T10:00:00Z")).unwrap();
    let second = store.insert(reading(102.5, "2024-03-01T10:00:01Z")).unwrap();
    store
        .update(first, json!({"signalStrength": -40}).as_object().cloned().unwrap())
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        seen.push((event.record_id, event.kind));
    }

    assert_eq!(
        seen,
        vec![
            (first, ChangeKind::Insert),
            (second, ChangeKind::Insert),
            (first, ChangeKind::Update),
        ]
    );
}
