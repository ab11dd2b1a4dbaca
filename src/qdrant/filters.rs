//! Filter builders for document-scoped Qdrant requests.

use serde_json::{Value, json};

/// Payload key holding the document identifier on every point.
pub const DOCUMENT_ID_FIELD: &str = "document_id";

/// Exact-match filter selecting every point of one document.
pub fn document_filter(document_id: &str) -> Value {
    json!({
        "must": [
            {
                "key": DOCUMENT_ID_FIELD,
                "match": { "value": document_id }
            }
        ]
    })
}
