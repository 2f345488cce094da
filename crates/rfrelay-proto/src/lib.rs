//! rfrelay protocol types.
//!
//! This crate defines the record, change log and broadcast types shared by the
//! store and the relay server.
//!
//! # Modules
//!
//! - [`document`] - Stored documents and record identity
//! - [`replication`] - Persistent change log entries (rkyv encoded)
//! - [`event`] - Change feed events and the `newReading` wire shape
//! - [`error`] - Protocol error types

pub mod document;
pub mod error;
pub mod event;
pub mod replication;

pub use document::{fields, Document, RecordId};
pub use error::Error;
pub use event::{BroadcastEvent, ChangeEvent, ServerMessage, NEW_READING_EVENT};
pub use replication::{ChangeKind, ChangeLogEntry};
