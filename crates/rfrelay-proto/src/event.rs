//! Change feed events and the broadcast wire shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{Document, RecordId};
use crate::replication::ChangeKind;

/// Name of the broadcast message carrying a new or changed reading.
pub const NEW_READING_EVENT: &str = "newReading";

/// A change surfaced by the change feed.
///
/// `document` is the full post-change record, or `None` when it could not be
/// resolved (for example the record was deleted before the lookup ran).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// LSN of the change log entry this event came from.
    pub lsn: u64,
    /// Kind of change.
    pub kind: ChangeKind,
    /// The changed record.
    pub record_id: RecordId,
    /// Full resulting document, if resolved.
    pub document: Option<Document>,
}

impl ChangeEvent {
    /// Create a change event.
    pub fn new(lsn: u64, kind: ChangeKind, record_id: RecordId, document: Option<Document>) -> Self {
        Self {
            lsn,
            kind,
            record_id,
            document,
        }
    }
}

/// Payload of a `newReading` broadcast.
///
/// Values are copied verbatim from the stored document; absent fields are
/// omitted from the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
}

/// Envelope for every message pushed to a live subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage<T> {
    /// Event name, e.g. [`NEW_READING_EVENT`].
    pub event: String,
    /// Event payload.
    pub data: T,
}

impl ServerMessage<BroadcastEvent> {
    /// Wrap a reading broadcast.
    pub fn new_reading(data: BroadcastEvent) -> Self {
        Self {
            event: NEW_READING_EVENT.to_string(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_event_field_order_and_omission() {
        let event = BroadcastEvent {
            frequency: Some(json!(101.1)),
            signal_strength: Some(json!(-42)),
            classification: None,
            timestamp: Some(json!("2024-05-01T12:00:00Z")),
        };

        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"frequency":101.1,"signalStrength":-42,"timestamp":"2024-05-01T12:00:00Z"}"#
        );
    }

    #[test]
    fn test_server_message_envelope() {
        let msg = ServerMessage::new_reading(BroadcastEvent {
            classification: Some(json!("FM")),
            ..Default::default()
        });

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"event": "newReading", "data": {"classification": "FM"}})
        );
    }
}
