//! rfrelay core - the embedded reading store and its change feed.
//!
//! This crate provides the data store the relay reads from:
//!
//! - [`ReadingStore`] - sled-backed document store with a timestamp index
//! - [`ChangeLog`] - persistent LSN-ordered log of every write
//! - [`ChangeFeed`] - live, filtered, full-document change stream

pub mod error;
pub mod feed;
pub mod replication;
pub mod storage;

pub use error::Error;
pub use feed::{ChangeFeed, FeedOptions, FullDocument};
pub use replication::ChangeLog;
pub use storage::{ReadingStore, StorageConfig};
