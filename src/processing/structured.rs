//! Structured JSON records: flattening, schema validation, and text snippets.

use serde_json::{Map, Value};
use thiserror::Error;

use super::types::StructuredRecord;
use crate::qdrant::payload::RESERVED_RECORD_FIELDS;

/// A record failed schema validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was absent.
    #[error("record {index}: missing required field '{field}'")]
    MissingField {
        /// Position of the record within the upload.
        index: usize,
        /// Name of the missing field.
        field: String,
    },
    /// A required field had the wrong JSON type.
    #[error("record {index}: field '{field}' must be {expected}")]
    WrongType {
        /// Position of the record within the upload.
        index: usize,
        /// Name of the offending field.
        field: String,
        /// Human-readable expected type.
        expected: &'static str,
    },
    /// The record defines a key the index stores its own bookkeeping under.
    #[error("record {index}: field '{field}' is reserved")]
    ReservedField {
        /// Position of the record within the upload.
        index: usize,
        /// Name of the reserved field.
        field: String,
    },
}

/// Expected JSON type of a required field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Whole number.
    Integer,
    /// Integer or float.
    Number,
    /// UTF-8 string.
    String,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::String => value.is_string(),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Integer => "an integer",
            Self::Number => "a number",
            Self::String => "a string",
        }
    }
}

/// Required fields every structured record must carry.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    fields: Vec<(&'static str, FieldKind)>,
}

impl RecordSchema {
    /// Build a schema from `(field, kind)` pairs.
    pub fn new(fields: Vec<(&'static str, FieldKind)>) -> Self {
        Self { fields }
    }

    /// The customer-profile schema used for structured uploads.
    pub fn customer() -> Self {
        Self::new(vec![
            ("customer_id", FieldKind::Integer),
            ("name", FieldKind::String),
            ("age", FieldKind::Integer),
            ("membership", FieldKind::String),
            ("purchases_last_6_months", FieldKind::Integer),
            ("total_spent", FieldKind::Number),
            ("preferred_category", FieldKind::String),
            ("last_purchase_date", FieldKind::String),
            ("nearest_store", FieldKind::String),
        ])
    }

    /// Check one raw record; `index` is reported in errors.
    pub fn validate(&self, index: usize, record: &Map<String, Value>) -> Result<(), ValidationError> {
        if let Some(field) = RESERVED_RECORD_FIELDS
            .iter()
            .find(|field| record.contains_key(**field))
        {
            return Err(ValidationError::ReservedField {
                index,
                field: (*field).to_string(),
            });
        }
        for (field, kind) in &self.fields {
            let value = record.get(*field).ok_or_else(|| ValidationError::MissingField {
                index,
                field: (*field).to_string(),
            })?;
            if !kind.matches(value) {
                return Err(ValidationError::WrongType {
                    index,
                    field: (*field).to_string(),
                    expected: kind.describe(),
                });
            }
        }
        Ok(())
    }
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self::customer()
    }
}

/// Validate every record, then flatten them. A single failure rejects the whole batch.
pub fn prepare_records(
    document_id: &str,
    raw: Vec<Map<String, Value>>,
    schema: &RecordSchema,
) -> Result<Vec<StructuredRecord>, ValidationError> {
    for (index, record) in raw.iter().enumerate() {
        schema.validate(index, record)?;
    }
    Ok(raw
        .into_iter()
        .map(|record| StructuredRecord {
            document_id: document_id.to_string(),
            fields: flatten_json(&record),
        })
        .collect())
}

/// Flatten nested objects and arrays into dot-notation keys (`address.city`, `items.0`).
pub fn flatten_json(record: &Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    for (key, value) in record {
        flatten_into(key, value, &mut flat);
    }
    flat
}

fn flatten_into(prefix: &str, value: &Value, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, nested) in map {
                flatten_into(&format!("{prefix}.{key}"), nested, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (idx, nested) in items.iter().enumerate() {
                flatten_into(&format!("{prefix}.{idx}"), nested, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

/// Render a record as `"Key: value, Key: value"` with capitalised keys.
pub fn to_text_snippet(record: &Map<String, Value>) -> String {
    record
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            format!("{}: {rendered}", capitalize(key))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customer() -> Map<String, Value> {
        json!({
            "customer_id": 7,
            "name": "Ada",
            "age": 36,
            "membership": "gold",
            "purchases_last_6_months": 4,
            "total_spent": 120.5,
            "preferred_category": "books",
            "last_purchase_date": "2024-05-01",
            "nearest_store": "Downtown",
            "address": { "city": "Lisbon", "zip": "1000" },
            "tags": ["vip", "early"]
        })
        .as_object()
        .cloned()
        .expect("object")
    }

    #[test]
    fn flattens_nested_values_with_dot_keys() {
        let flat = flatten_json(&customer());
        assert_eq!(flat["address.city"], "Lisbon");
        assert_eq!(flat["tags.1"], "early");
        assert!(!flat.contains_key("address"));
    }

    #[test]
    fn accepts_integer_total_spent() {
        let mut record = customer();
        record.insert("total_spent".into(), json!(120));
        assert!(RecordSchema::customer().validate(0, &record).is_ok());
    }

    #[test]
    fn reports_missing_and_mistyped_fields() {
        let mut record = customer();
        record.remove("nearest_store");
        assert_eq!(
            RecordSchema::customer().validate(2, &record),
            Err(ValidationError::MissingField {
                index: 2,
                field: "nearest_store".into()
            })
        );

        let mut record = customer();
        record.insert("age".into(), json!("thirty"));
        let error = RecordSchema::customer().validate(0, &record).unwrap_err();
        assert!(error.to_string().contains("'age' must be an integer"));
    }

    #[test]
    fn one_invalid_record_rejects_the_batch() {
        let mut bad = customer();
        bad.remove("name");
        let result = prepare_records("doc.json", vec![customer(), bad], &RecordSchema::customer());
        assert!(matches!(
            result,
            Err(ValidationError::MissingField { index: 1, .. })
        ));
    }

    #[test]
    fn bookkeeping_keys_are_reserved() {
        let mut record = customer();
        record.insert("document_id".into(), json!("someone-else/other.json"));
        assert_eq!(
            RecordSchema::customer().validate(4, &record),
            Err(ValidationError::ReservedField {
                index: 4,
                field: "document_id".into()
            })
        );

        let mut record = customer();
        record.insert("text".into(), json!("free-form notes"));
        assert!(RecordSchema::customer().validate(0, &record).is_ok());
    }

    #[test]
    fn snippet_capitalizes_keys() {
        let mut record = Map::new();
        record.insert("name".into(), json!("Ada"));
        record.insert("age".into(), json!(36));
        let snippet = to_text_snippet(&record);
        assert!(snippet.contains("Name: Ada"));
        assert!(snippet.contains("Age: 36"));
    }
}
