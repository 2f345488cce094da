//! Reading store implementation.

use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, Transactional};
use sled::{Db, Tree};
use tracing::debug;

use rfrelay_proto::{fields, ChangeKind, ChangeLogEntry, Document, RecordId};

use super::key::TimestampKey;
use super::record::{decode_document, encode_document};
use super::StorageConfig;
use crate::error::Error;
use crate::replication::ChangeLog;

/// Tree name for reading documents.
const READINGS_TREE: &str = "readings";

/// Tree name for the timestamp index.
const TIMESTAMP_INDEX_TREE: &str = "index:timestamp";

/// A write to apply to a single record.
#[derive(Debug, Clone)]
enum WriteOp {
    Insert(Document),
    Update(Document),
    Replace(Document),
    Delete,
}

impl WriteOp {
    /// Compute the change kind, the resulting document and the changed fields
    /// given the record's current state.
    fn resolve(
        &self,
        id: RecordId,
        previous: Option<&Document>,
    ) -> Result<(ChangeKind, Option<Document>, Vec<String>), Error> {
        match (self, previous) {
            (WriteOp::Insert(doc), _) => {
                let next = with_identity(doc.clone(), id);
                let changed = next.keys().cloned().collect();
                Ok((ChangeKind::Insert, Some(next), changed))
            }
            (WriteOp::Update(changes), Some(prev)) => {
                let mut next = prev.clone();
                let mut changed = Vec::with_capacity(changes.len());
                for (name, value) in changes {
                    if name == fields::ID {
                        continue;
                    }
                    next.insert(name.clone(), value.clone());
                    changed.push(name.clone());
                }
                Ok((ChangeKind::Update, Some(next), changed))
            }
            (WriteOp::Replace(doc), Some(_)) => {
                let next = with_identity(doc.clone(), id);
                let changed = next.keys().cloned().collect();
                Ok((ChangeKind::Replace, Some(next), changed))
            }
            (WriteOp::Delete, Some(_)) => Ok((ChangeKind::Delete, None, vec![])),
            (_, None) => Err(Error::NotFound),
        }
    }
}

/// Stamp the record identity into a document, overriding any caller value.
fn with_identity(mut document: Document, id: RecordId) -> Document {
    document.insert(fields::ID.to_string(), id.to_string().into());
    document
}

/// Embedded store of reading documents with a change log.
///
/// Every write updates the document tree, the timestamp index and the
/// change log in a single transaction.
pub struct ReadingStore {
    /// The underlying sled database.
    db: Db,

    /// Tree for reading documents (record_id -> JSON).
    readings: Tree,

    /// Tree for the timestamp index (timestamp key -> record_id).
    timestamp_index: Tree,

    /// Persistent change log.
    changelog: ChangeLog,
}

impl ReadingStore {
    /// Open or create a reading store with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let readings = db.open_tree(READINGS_TREE)?;
        let timestamp_index = db.open_tree(TIMESTAMP_INDEX_TREE)?;
        let changelog = ChangeLog::open(&db)?;

        Ok(Self {
            db,
            readings,
            timestamp_index,
            changelog,
        })
    }

    /// Insert a new reading and return its assigned identifier.
    pub fn insert(&self, document: Document) -> Result<RecordId, Error> {
        let id = RecordId::generate();
        self.apply(id, &WriteOp::Insert(document))?;
        Ok(id)
    }

    /// Merge `changes` into an existing reading and return the result.
    pub fn update(&self, id: RecordId, changes: Document) -> Result<Document, Error> {
        self.apply(id, &WriteOp::Update(changes))?
            .ok_or(Error::NotFound)
    }

    /// Replace an existing reading wholesale and return the result.
    pub fn replace(&self, id: RecordId, document: Document) -> Result<Document, Error> {
        self.apply(id, &WriteOp::Replace(document))?
            .ok_or(Error::NotFound)
    }

    /// Delete an existing reading.
    pub fn delete(&self, id: RecordId) -> Result<(), Error> {
        self.apply(id, &WriteOp::Delete)?;
        Ok(())
    }

    /// Apply a write to one record atomically across all trees.
    ///
    /// The change log writer lock is held until the transaction commits, so
    /// concurrent writers commit in LSN order.
    fn apply(&self, id: RecordId, op: &WriteOp) -> Result<Option<Document>, Error> {
        let _writer = self.changelog.lock_writer();
        let lsn = self.changelog.allocate_lsn();
        let record_key = id.as_bytes().to_vec();

        let result = (&self.readings, &self.timestamp_index, self.changelog.tree()).transaction(
            |(readings, index, log)| -> ConflictableTransactionResult<(ChangeKind, Option<Document>), Error> {
                let previous = match readings.get(&record_key)? {
                    Some(bytes) => Some(decode_document(&bytes).map_err(ConflictableTransactionError::Abort)?),
                    None => None,
                };

                let (kind, next, changed_fields) = op
                    .resolve(id, previous.as_ref())
                    .map_err(ConflictableTransactionError::Abort)?;

                if let Some(prev) = &previous {
                    let old_key = TimestampKey::for_document(*id.as_bytes(), prev).encode();
                    index.remove(old_key)?;
                }

                let mut entry = match &next {
                    Some(doc) => {
                        let bytes = encode_document(doc).map_err(ConflictableTransactionError::Abort)?;
                        readings.insert(record_key.clone(), bytes.clone())?;

                        let new_key = TimestampKey::for_document(*id.as_bytes(), doc).encode();
                        index.insert(new_key, record_key.clone())?;

                        ChangeLogEntry::upsert(kind, *id.as_bytes(), bytes, changed_fields)
                    }
                    None => {
                        readings.remove(record_key.clone())?;
                        ChangeLogEntry::delete(*id.as_bytes())
                    }
                };

                entry.lsn = lsn;
                let value = ChangeLog::encode_entry(&entry).map_err(ConflictableTransactionError::Abort)?;
                log.insert(ChangeLog::encode_key(lsn).to_vec(), value)?;

                Ok((kind, next))
            },
        )?;

        let (kind, document) = result;
        debug!(record_id = %id, lsn, kind = kind.as_str(), "reading written");

        Ok(document)
    }

    /// Get a reading by identifier.
    pub fn get(&self, id: RecordId) -> Result<Option<Document>, Error> {
        match self.readings.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode_document(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get up to `limit` readings, newest `timestamp` first.
    ///
    /// Readings with equal timestamps come in descending record-id order;
    /// readings without a usable timestamp come last.
    pub fn recent(&self, limit: usize) -> Result<Vec<Document>, Error> {
        let mut documents = Vec::with_capacity(limit.min(1024));

        for result in self.timestamp_index.iter().rev() {
            if documents.len() >= limit {
                break;
            }

            let (_, record_id) = result?;
            if let Some(bytes) = self.readings.get(&record_id)? {
                documents.push(decode_document(&bytes)?);
            }
        }

        Ok(documents)
    }

    /// Number of stored readings.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Check whether the store holds no readings.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Get a reference to the change log.
    pub fn changelog(&self) -> &ChangeLog {
        &self.changelog
    }

    /// Tree holding reading documents, used by the change feed for lookups.
    pub(crate) fn readings_tree(&self) -> &Tree {
        &self.readings
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Get database size in bytes.
    pub fn size_on_disk(&self) -> Result<u64, Error> {
        Ok(self.db.size_on_disk()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn open_store() -> ReadingStore {
        ReadingStore::open(StorageConfig::temporary()).unwrap()
    }

    #[test]
    fn test_insert_assigns_identity() {
        let store = open_store();

        let id = store
            .insert(doc(json!({"frequency": 101.1, "_id": "caller-chosen"})))
            .unwrap();

        let stored = store.get(id).unwrap().unwrap();
        assert_eq!(stored["_id"], json!(id.to_string()));
        assert_eq!(stored["frequency"], json!(101.1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_merges_fields() {
        let store = open_store();
        let id = store
            .insert(doc(json!({"frequency": 88.0, "classification": "FM"})))
            .unwrap();

        let updated = store
            .update(id, doc(json!({"classification": "AM", "_id": "ignored"})))
            .unwrap();

        assert_eq!(updated["frequency"], json!(88.0));
        assert_eq!(updated["classification"], json!("AM"));
        assert_eq!(updated["_id"], json!(id.to_string()));

        let entry = store.changelog().get(store.changelog().current_lsn()).unwrap().unwrap();
        assert_eq!(entry.kind, ChangeKind::Update);
        assert_eq!(entry.changed_fields, vec!["classification".to_string()]);
    }

    #[test]
    fn test_replace_drops_old_fields() {
        let store = open_store();
        let id = store
            .insert(doc(json!({"frequency": 88.0, "note": "old"})))
            .unwrap();

        let replaced = store.replace(id, doc(json!({"frequency": 90.0}))).unwrap();
        assert!(replaced.get("note").is_none());
        assert_eq!(store.get(id).unwrap().unwrap(), replaced);
    }

    #[test]
    fn test_missing_record_writes_fail() {
        let store = open_store();
        let id = RecordId::generate();

        assert!(matches!(store.update(id, Document::new()), Err(Error::NotFound)));
        assert!(matches!(store.replace(id, Document::new()), Err(Error::NotFound)));
        assert!(matches!(store.delete(id), Err(Error::NotFound)));
        assert!(store.changelog().is_empty());
    }

    #[test]
    fn test_delete_removes_from_recent() {
        let store = open_store();
        let id = store.insert(doc(json!({"timestamp": 10}))).unwrap();
        store.insert(doc(json!({"timestamp": 20}))).unwrap();

        store.delete(id).unwrap();

        assert!(store.get(id).unwrap().is_none());
        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0]["timestamp"], json!(20));
    }

    #[test]
    fn test_recent_limits_and_orders() {
        let store = open_store();

        for i in 0..120i64 {
            store
                .insert(doc(json!({"frequency": i, "timestamp": 1_700_000_000_000i64 + i * 1000})))
                .unwrap();
        }

        let recent = store.recent(50).unwrap();
        assert_eq!(recent.len(), 50);
        assert_eq!(recent[0]["frequency"], json!(119));

        let stamps: Vec<i64> = recent.iter().map(|d| d["timestamp"].as_i64().unwrap()).collect();
        assert!(stamps.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_recent_orders_fractional_and_naive_timestamps() {
        // Repeat so random record ids cannot produce the right order by luck.
        for _ in 0..20 {
            let store = open_store();
            store.insert(doc(json!({"timestamp": 1.2}))).unwrap();
            store.insert(doc(json!({"timestamp": 1.9}))).unwrap();
            let recent = store.recent(10).unwrap();
            assert_eq!(recent[0]["timestamp"], json!(1.9));
            assert_eq!(recent[1]["timestamp"], json!(1.2));

            let store = open_store();
            store.insert(doc(json!({"timestamp": "2024-01-01T00:00:00"}))).unwrap();
            store.insert(doc(json!({"timestamp": "2025-01-01T00:00:00"}))).unwrap();
            store.insert(doc(json!({"timestamp": "2024-06-01T00:00:00Z"}))).unwrap();
            let stamps: Vec<Value> = store
                .recent(10)
                .unwrap()
                .into_iter()
                .map(|d| d["timestamp"].clone())
                .collect();
            assert_eq!(
                stamps,
                vec![
                    json!("2025-01-01T00:00:00"),
                    json!("2024-06-01T00:00:00Z"),
                    json!("2024-01-01T00:00:00"),
                ]
            );
        }
    }

    #[test]
    fn test_recent_orders_undated_text_below_dates() {
        let store = open_store();
        store.insert(doc(json!({"timestamp": "batch-a"}))).unwrap();
        store.insert(doc(json!({"timestamp": "batch-b"}))).unwrap();
        store.insert(doc(json!({"timestamp": 5}))).unwrap();
        store.insert(doc(json!({"frequency": 1}))).unwrap();

        let stamps: Vec<Option<Value>> = store
            .recent(10)
            .unwrap()
            .into_iter()
            .map(|d| d.get("timestamp").cloned())
            .collect();
        assert_eq!(
            stamps,
            vec![Some(json!(5)), Some(json!("batch-b")), Some(json!("batch-a")), None]
        );
    }

    #[test]
    fn test_every_write_is_logged() {
        let store = open_store();
        let id = store.insert(doc(json!({"frequency": 1}))).unwrap();
        store.update(id, doc(json!({"frequency": 2}))).unwrap();
        store.replace(id, doc(json!({"frequency": 3}))).unwrap();
        store.delete(id).unwrap();

        let kinds: Vec<ChangeKind> = store
            .changelog()
            .scan_from(0)
            .map(|entry| entry.unwrap().kind)
            .collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Replace, ChangeKind::Delete]
        );
    }
}
