//! Change log types.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Kind of mutation recorded in the change log.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// A new record was inserted.
    Insert,
    /// Some fields of an existing record were changed.
    Update,
    /// An existing record was replaced wholesale.
    Replace,
    /// A record was deleted.
    Delete,
}

impl ChangeKind {
    /// Kinds that describe a record which still exists afterwards.
    pub const UPSERTS: [ChangeKind; 3] = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Replace];

    /// Lowercase name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Replace => "replace",
            ChangeKind::Delete => "delete",
        }
    }
}

/// Persistent change log entry.
///
/// Every write to the store appends one entry with a monotonically
/// increasing LSN (Log Sequence Number).
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct ChangeLogEntry {
    /// Log Sequence Number, assigned on append.
    pub lsn: u64,
    /// Timestamp in microseconds since epoch.
    pub timestamp: u64,
    /// The record that was modified.
    pub record_id: [u8; 16],
    /// Type of change.
    pub kind: ChangeKind,
    /// Top-level fields touched by the change.
    pub changed_fields: Vec<String>,
    /// Post-change document as JSON bytes, None for deletes.
    pub after_data: Option<Vec<u8>>,
}

impl ChangeLogEntry {
    /// Create an entry for a write that leaves the record in place.
    pub fn upsert(
        kind: ChangeKind,
        record_id: [u8; 16],
        after_data: Vec<u8>,
        changed_fields: Vec<String>,
    ) -> Self {
        Self {
            lsn: 0,
            timestamp: Self::current_timestamp(),
            record_id,
            kind,
            changed_fields,
            after_data: Some(after_data),
        }
    }

    /// Create an entry for a delete.
    pub fn delete(record_id: [u8; 16]) -> Self {
        Self {
            lsn: 0,
            timestamp: Self::current_timestamp(),
            record_id,
            kind: ChangeKind::Delete,
            changed_fields: vec![],
            after_data: None,
        }
    }

    /// Get current timestamp in microseconds.
    fn current_timestamp() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}
