//! Helpers for constructing and hashing Qdrant payloads.

use crate::processing::{
    structured::to_text_snippet,
    types::{Chunk, StructuredRecord},
};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use time::OffsetDateTime;
use uuid::Uuid;

use super::filters::DOCUMENT_ID_FIELD;

/// Record payload key holding the embedded `Key: value` snippet.
pub const RECORD_TEXT_FIELD: &str = "_text";
/// Record payload key holding the indexing timestamp.
pub const RECORD_INDEXED_AT_FIELD: &str = "_indexed_at";

/// Keys a structured record may not define itself.
pub const RESERVED_RECORD_FIELDS: [&str; 3] =
    [DOCUMENT_ID_FIELD, RECORD_TEXT_FIELD, RECORD_INDEXED_AT_FIELD];

/// Build the payload stored alongside each indexed chunk.
pub fn chunk_payload(chunk: &Chunk, timestamp_rfc3339: &str) -> Value {
    let mut payload = Map::new();
    payload.insert(
        DOCUMENT_ID_FIELD.into(),
        Value::String(chunk.document_id.clone()),
    );
    payload.insert(
        "document_name".into(),
        Value::String(document_name(&chunk.document_id)),
    );
    payload.insert("chunk_index".into(), Value::from(chunk.chunk_index));
    payload.insert("text".into(), Value::String(chunk.text.clone()));
    payload.insert(
        "tokenized_text".into(),
        Value::String(chunk.tokenized_text.clone()),
    );
    payload.insert(
        "chunk_hash".into(),
        Value::String(compute_chunk_hash(&chunk.text)),
    );
    payload.insert(
        "indexed_at".into(),
        Value::String(timestamp_rfc3339.to_string()),
    );
    if let Some(page) = chunk.page_number {
        payload.insert("page_number".into(), Value::from(page));
    }
    Value::Object(payload)
}

/// Build the payload for a structured record: its flat fields plus underscore-prefixed
/// bookkeeping keys, so user fields such as `text` are stored untouched.
pub fn record_payload(record: &StructuredRecord, timestamp_rfc3339: &str) -> Value {
    let mut payload = record.fields.clone();
    payload.insert(
        DOCUMENT_ID_FIELD.into(),
        Value::String(record.document_id.clone()),
    );
    payload.insert(
        RECORD_TEXT_FIELD.into(),
        Value::String(to_text_snippet(&record.fields)),
    );
    payload.insert(
        RECORD_INDEXED_AT_FIELD.into(),
        Value::String(timestamp_rfc3339.to_string()),
    );
    Value::Object(payload)
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Current timestamp formatted for payload storage.
pub fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Construct a fresh point identifier.
pub(crate) fn generate_point_id() -> String {
    Uuid::new_v4().to_string()
}

fn document_name(document_id: &str) -> String {
    Path::new(document_id)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(document_id)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(page_number: Option<u32>) -> Chunk {
        Chunk {
            document_id: "ada@example.com/notes.txt".into(),
            chunk_index: 3,
            text: "Hello world".into(),
            tokenized_text: "Hello world".into(),
            page_number,
        }
    }

    #[test]
    fn chunk_hash_is_stable() {
        let h1 = compute_chunk_hash("Hello world");
        let h2 = compute_chunk_hash("Hello world");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }

    #[test]
    fn chunk_payload_carries_partition_key_and_position() {
        let now = "2025-01-01T00:00:00Z";
        let payload = chunk_payload(&chunk(Some(2)), now);
        assert_eq!(payload["document_id"], "ada@example.com/notes.txt");
        assert_eq!(payload["document_name"], "notes.txt");
        assert_eq!(payload["chunk_index"], 3);
        assert_eq!(payload["page_number"], 2);
        assert_eq!(payload["indexed_at"], now);
        assert_eq!(payload["chunk_hash"], compute_chunk_hash("Hello world"));
    }

    #[test]
    fn chunk_payload_omits_unknown_page() {
        let payload = chunk_payload(&chunk(None), "2025-01-01T00:00:00Z");
        assert!(payload.get("page_number").is_none());
    }

    #[test]
    fn record_payload_keeps_fields_and_adds_snippet() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Ada"));
        fields.insert("address.city".into(), json!("Lisbon"));
        let record = StructuredRecord {
            document_id: "ada@example.com/customers.json".into(),
            fields,
        };
        let payload = record_payload(&record, "2025-01-01T00:00:00Z");
        assert_eq!(payload["address.city"], "Lisbon");
        assert_eq!(payload["document_id"], "ada@example.com/customers.json");
        assert!(payload["_text"].as_str().unwrap().contains("Name: Ada"));
    }

    #[test]
    fn record_payload_preserves_user_text_and_indexed_at_fields() {
        let mut fields = Map::new();
        fields.insert("name".into(), json!("Ada"));
        fields.insert("text".into(), json!("prefers paperbacks"));
        fields.insert("indexed_at".into(), json!("2019-03-04"));
        let record = StructuredRecord {
            document_id: "ada@example.com/customers.json".into(),
            fields,
        };
        let payload = record_payload(&record, "2025-01-01T00:00:00Z");
        assert_eq!(payload["text"], "prefers paperbacks");
        assert_eq!(payload["indexed_at"], "2019-03-04");
        assert_eq!(payload["_indexed_at"], "2025-01-01T00:00:00Z");
        assert!(payload["_text"].as_str().unwrap().contains("Text: prefers paperbacks"));
    }

    #[test]
    fn point_ids_are_unique() {
        assert_ne!(generate_point_id(), generate_point_id());
    }
}
