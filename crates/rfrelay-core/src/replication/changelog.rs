//! LSN-ordered change log stored in its own sled tree.
//!
//! Keys are big-endian LSNs, so tree order is log order. Values are
//! rkyv-encoded [`ChangeLogEntry`]s. The store appends inside its write
//! transactions; the change feed watches the tree.
//!
//! Writers hold `ChangeLog::lock_writer` from LSN allocation until their
//! entry is committed, so LSN order is commit order.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use rfrelay_proto::ChangeLogEntry;
use rkyv::util::AlignedVec;
use sled::{Db, Tree};

use crate::error::Error;

/// Tree name for changelog entries.
pub(crate) const CHANGELOG_TREE: &str = "changelog";

/// Persistent log of every write to the store.
pub struct ChangeLog {
    tree: Tree,
    /// Highest LSN handed out so far.
    last_lsn: AtomicU64,
    /// Serializes allocate-then-commit sequences.
    writer: Mutex<()>,
}

impl ChangeLog {
    /// Open the change log tree in `db`, resuming after its last entry.
    pub fn open(db: &Db) -> Result<Self, Error> {
        let tree = db.open_tree(CHANGELOG_TREE)?;
        let last_lsn = match tree.last()? {
            Some((key, _)) => Self::decode_key(&key)?,
            None => 0,
        };

        Ok(Self {
            tree,
            last_lsn: AtomicU64::new(last_lsn),
            writer: Mutex::new(()),
        })
    }

    /// Write `entry` under a fresh LSN, which is stored in the entry and returned.
    pub fn append(&self, mut entry: ChangeLogEntry) -> Result<u64, Error> {
        let _writer = self.lock_writer();
        entry.lsn = self.allocate_lsn();
        self.tree
            .insert(Self::encode_key(entry.lsn), Self::encode_entry(&entry)?)?;
        Ok(entry.lsn)
    }

    /// Exclusive right to allocate an LSN and commit its entry.
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }

    /// Hand out the next LSN. Writers that append inside their own
    /// transaction call this while holding [`lock_writer`](Self::lock_writer).
    pub(crate) fn allocate_lsn(&self) -> u64 {
        self.last_lsn.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest LSN handed out so far (0 for an empty log).
    pub fn current_lsn(&self) -> u64 {
        self.last_lsn.load(Ordering::SeqCst)
    }

    pub fn get(&self, lsn: u64) -> Result<Option<ChangeLogEntry>, Error> {
        self.tree
            .get(Self::encode_key(lsn))?
            .map(|bytes| Self::decode_entry(&bytes))
            .transpose()
    }

    /// Entries with LSN `>= from_lsn`, oldest first.
    pub fn scan_from(&self, from_lsn: u64) -> impl Iterator<Item = Result<ChangeLogEntry, Error>> + '_ {
        self.tree
            .range(Self::encode_key(from_lsn)..)
            .values()
            .map(|value| Self::decode_entry(&value?))
    }

    /// Drop the oldest entries until at most `keep` remain. Returns how many went.
    pub fn retain_last(&self, keep: usize) -> Result<u64, Error> {
        let excess = self.tree.len().saturating_sub(keep);
        let mut count = 0;
        for key in self.tree.iter().keys().take(excess) {
            self.tree.remove(key?)?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flush the log tree to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }

    /// The underlying tree, watched by the change feed.
    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    pub(crate) fn encode_key(lsn: u64) -> [u8; 8] {
        lsn.to_be_bytes()
    }

    fn decode_key(key: &[u8]) -> Result<u64, Error> {
        key.try_into()
            .map(u64::from_be_bytes)
            .map_err(|_| Error::InvalidKey)
    }

    pub(crate) fn encode_entry(entry: &ChangeLogEntry) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(entry)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode an entry read from the tree.
    ///
    /// sled gives no alignment guarantee, so the bytes are copied into an
    /// aligned buffer before validation.
    pub(crate) fn decode_entry(bytes: &[u8]) -> Result<ChangeLogEntry, Error> {
        let mut aligned = AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);

        rkyv::from_bytes::<ChangeLogEntry, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfrelay_proto::ChangeKind;

    fn temp_db() -> Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn insert_entry(tag: u8) -> ChangeLogEntry {
        ChangeLogEntry::upsert(
            ChangeKind::Insert,
            [tag; 16],
            br#"{"frequency":98.5}"#.to_vec(),
            vec!["frequency".to_string()],
        )
    }

    fn filled(count: u8) -> ChangeLog {
        let log = ChangeLog::open(&temp_db()).unwrap();
        for tag in 0..count {
            log.append(insert_entry(tag)).unwrap();
        }
        log
    }

    #[test]
    fn test_append_assigns_consecutive_lsns() {
        let log = ChangeLog::open(&temp_db()).unwrap();
        assert!(log.is_empty());

        assert_eq!(log.append(insert_entry(7)).unwrap(), 1);
        assert_eq!(log.append(ChangeLogEntry::delete([7; 16])).unwrap(), 2);
        assert_eq!(log.current_lsn(), 2);

        let first = log.get(1).unwrap().unwrap();
        assert_eq!((first.lsn, first.record_id), (1, [7; 16]));
        assert!(first.after_data.is_some());

        let second = log.get(2).unwrap().unwrap();
        assert_eq!(second.kind, ChangeKind::Delete);
        assert!(second.after_data.is_none());

        assert!(log.get(3).unwrap().is_none());
    }

    #[test]
    fn test_scan_from_is_inclusive_and_ordered() {
        let log = filled(6);

        let lsns: Vec<u64> = log.scan_from(4).map(|e| e.unwrap().lsn).collect();
        assert_eq!(lsns, vec![4, 5, 6]);
        assert_eq!(log.scan_from(0).count(), 6);
        assert_eq!(log.scan_from(7).count(), 0);
    }

    #[test]
    fn test_retain_last() {
        let log = filled(10);

        assert_eq!(log.retain_last(4).unwrap(), 6);
        let lsns: Vec<u64> = log.scan_from(0).map(|e| e.unwrap().lsn).collect();
        assert_eq!(lsns, vec![7, 8, 9, 10]);

        assert_eq!(log.retain_last(50).unwrap(), 0);
        assert_eq!(log.retain_last(0).unwrap(), 4);
        assert!(log.is_empty());

        // Pruning never rewinds the LSN counter.
        assert_eq!(log.append(insert_entry(1)).unwrap(), 11);
    }

    #[test]
    fn test_reopen_resumes_lsn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");

        {
            let log = ChangeLog::open(&sled::open(&path).unwrap()).unwrap();
            for tag in 0..3 {
                log.append(insert_entry(tag)).unwrap();
            }
            log.flush().unwrap();
        }

        let log = ChangeLog::open(&sled::open(&path).unwrap()).unwrap();
        assert_eq!(log.current_lsn(), 3);
        assert_eq!(log.append(insert_entry(9)).unwrap(), 4);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            ChangeLog::decode_entry(b"definitely not rkyv"),
            Err(Error::Deserialization(_))
        ));
    }
}
