//! Document encoding for stored records.

use rfrelay_proto::Document;

use crate::error::Error;

/// Encode a document for storage.
pub fn encode_document(document: &Document) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(document).map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode a stored document.
pub fn decode_document(bytes: &[u8]) -> Result<Document, Error> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_preserves_values() {
        let doc = json!({"frequency": 101.1, "signalStrength": -42, "classification": "FM"});
        let doc = doc.as_object().unwrap().clone();

        let decoded = decode_document(&encode_document(&doc).unwrap()).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(
            decode_document(b"[1,2,3]"),
            Err(Error::Deserialization(_))
        ));
    }
}
