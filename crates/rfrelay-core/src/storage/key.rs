//! Timestamp index key encoding.

use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use rfrelay_proto::{fields, Document};

/// Size of record ID in bytes (UUID).
pub const RECORD_ID_SIZE: usize = 16;

const TAG_MISSING: u8 = 0x00;
const TAG_TEXT: u8 = 0x01;
const TAG_TIME: u8 = 0x02;

/// Naive date-time layouts accepted when a string is not RFC 3339. Read as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Sortable interpretation of a document's `timestamp` field.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    /// No timestamp, or one of a type that cannot be ordered.
    Missing,
    /// A string that is not a recognizable date; ordered byte-wise.
    Text(String),
    /// Milliseconds since Unix epoch, fractions kept.
    Time(f64),
}

impl SortValue {
    /// Interpret a document `timestamp` value.
    pub fn from_value(value: &Value) -> Self {
        match timestamp_millis(value) {
            Some(millis) => SortValue::Time(millis),
            None => match value {
                Value::String(s) => SortValue::Text(s.clone()),
                _ => SortValue::Missing,
            },
        }
    }
}

/// Secondary index key ordering records by their `timestamp` field.
///
/// Key format: `[tag (1 byte)][value (variable)][record_id (16 bytes)]`
///
/// Tags order the bands `Missing < Text < Time`, so a reverse scan yields
/// dated readings newest first, then undated strings, then readings without
/// a timestamp. Times are big-endian f64 bits with the sign flipped (all bits
/// flipped for negatives). Text is escaped (`0x00` becomes `0x00 0xFF`) and
/// terminated by `0x00 0x00`, so a shorter string sorts before its extensions
/// whatever record id follows.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampKey {
    pub value: SortValue,

    /// Record identifier (UUID bytes).
    pub record_id: [u8; RECORD_ID_SIZE],
}

impl TimestampKey {
    /// Create a new index key.
    pub fn new(value: SortValue, record_id: [u8; RECORD_ID_SIZE]) -> Self {
        Self { value, record_id }
    }

    /// Build the index key for a stored document.
    pub fn for_document(record_id: [u8; RECORD_ID_SIZE], document: &Document) -> Self {
        let value = document
            .get(fields::TIMESTAMP)
            .map(SortValue::from_value)
            .unwrap_or(SortValue::Missing);
        Self::new(value, record_id)
    }

    /// Encode the key to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(1 + 8 + RECORD_ID_SIZE);
        match &self.value {
            SortValue::Missing => buf.push(TAG_MISSING),
            SortValue::Text(text) => {
                buf.push(TAG_TEXT);
                for &byte in text.as_bytes() {
                    buf.push(byte);
                    if byte == 0x00 {
                        buf.push(0xFF);
                    }
                }
                buf.extend_from_slice(&[0x00, 0x00]);
            }
            SortValue::Time(millis) => {
                buf.push(TAG_TIME);
                buf.extend_from_slice(&ordered_f64(*millis).to_be_bytes());
            }
        }
        buf.extend_from_slice(&self.record_id);
        buf
    }
}

/// Map an f64 to a u64 whose unsigned order matches the float order.
fn ordered_f64(value: f64) -> u64 {
    // -0.0 and 0.0 must share a key.
    let bits = if value == 0.0 { 0 } else { value.to_bits() };
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits ^ (1 << 63)
    }
}

/// Interpret a document `timestamp` value as milliseconds since Unix epoch.
///
/// Accepts epoch-millisecond numbers (fractions kept), RFC 3339 strings,
/// naive ISO date-times and dates read as UTC, and extended-JSON
/// `{"$date": ...}` wrappers.
pub fn timestamp_millis(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => parse_date_string(s),
        Value::Object(map) => map.get("$date").and_then(timestamp_millis),
        _ => None,
    }
}

fn parse_date_string(s: &str) -> Option<f64> {
    let s = s.trim();
    let naive = chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| {
            NAIVE_DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;

    Some(naive.and_utc().timestamp_micros() as f64 / 1000.0)
}
