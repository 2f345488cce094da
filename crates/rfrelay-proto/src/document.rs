//! Stored documents and record identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A stored reading as a schemaless JSON object.
///
/// The store does not enforce a schema; readings normally carry the fields
/// listed in [`fields`] plus the store-assigned [`fields::ID`].
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Well-known reading field names.
pub mod fields {
    /// Store-assigned record identity.
    pub const ID: &str = "_id";
    /// Carrier frequency.
    pub const FREQUENCY: &str = "frequency";
    /// Received signal strength.
    pub const SIGNAL_STRENGTH: &str = "signalStrength";
    /// Classification label (e.g. "FM").
    pub const CLASSIFICATION: &str = "classification";
    /// Observation instant; orders readings.
    pub const TIMESTAMP: &str = "timestamp";
}

/// Store-assigned identifier of a record (a UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RecordId([u8; 16]);

impl RecordId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Wrap raw identifier bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        uuid::Uuid::from_bytes(self.0).hyphenated().fmt(f)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(|id| Self(*id.as_bytes()))
            .map_err(|e| Error::InvalidRecordId(format!("{}: {}", s, e)))
    }
}

impl From<RecordId> for String {
    fn from(id: RecordId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for RecordId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
