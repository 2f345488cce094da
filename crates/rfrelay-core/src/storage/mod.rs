//! Storage layer for rfrelay.
//!
//! This module provides the sled-based reading store with a timestamp index
//! and a transactional change log.

mod config;
mod engine;

pub mod key;
pub mod record;

pub use config::StorageConfig;
pub use engine::ReadingStore;
pub use key::{timestamp_millis, SortValue, TimestampKey};
