//! Core data types and error definitions for the ingestion pipeline.

use crate::{
    embedding::EmbeddingClientError,
    processing::{parser::ParseError, store::StoreError, structured::ValidationError},
    storage::FetchError,
    tasks::TaskError,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors produced while turning raw text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Text was empty, whitespace-only, or contained no word tokens.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    /// Ingestion configured an impossible token budget or chunk cap.
    #[error("chunk size and chunk limit must be greater than zero")]
    InvalidChunkSize,
}

/// A contiguous run of document text sized to a token budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Storage key of the source document; partitions the vector index.
    pub document_id: String,
    /// Zero-based emission order within the document.
    pub chunk_index: usize,
    /// Raw paragraph text.
    pub text: String,
    /// Word tokens joined by single spaces.
    pub tokenized_text: String,
    /// Page the chunk starts on, when the extractor reported pages.
    pub page_number: Option<u32>,
}

impl Chunk {
    /// Number of budgeted tokens in the chunk.
    pub fn token_count(&self) -> usize {
        self.tokenized_text.split_whitespace().count()
    }
}

/// A chunk paired with its embedding vector.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    /// Source chunk.
    pub chunk: Chunk,
    /// Embedding produced for `chunk.text`.
    pub vector: Vec<f32>,
}

/// A validated, flattened JSON record tied to its source document.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredRecord {
    /// Storage key of the source document.
    pub document_id: String,
    /// Flat key/value fields; nested keys use dot notation.
    pub fields: Map<String, Value>,
}

/// A structured record paired with the embedding of its text snippet.
#[derive(Debug, Clone)]
pub struct EmbeddedRecord {
    /// Source record.
    pub record: StructuredRecord,
    /// Embedding produced for the record's text snippet.
    pub vector: Vec<f32>,
}

/// Per-run switches carried alongside a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Store JSON uploads as validated records instead of chunked text.
    #[serde(default)]
    pub structured_json: bool,
}

/// Summary of a completed run, persisted as the task's `additional_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    /// Document identifier the run indexed.
    pub document_id: String,
    /// Number of chunks inserted.
    pub chunk_count: usize,
    /// Number of structured records inserted.
    pub record_count: usize,
    /// Token budget used for chunking, if the document was chunked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<usize>,
    /// Whether text was recovered through OCR.
    pub ocr_used: bool,
    /// Whether prior data for the document was purged before insert.
    pub purged: bool,
}

/// Errors emitted by the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// File extension is not one of the supported formats.
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),
    /// Text extraction failed.
    #[error("Failed to parse document: {0}")]
    Parse(#[source] ParseError),
    /// Chunking rejected the extracted text.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed or returned the wrong number of vectors.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Vector store request failed.
    #[error("Vector store request failed: {0}")]
    Store(#[from] StoreError),
    /// A structured record did not match the schema.
    #[error("Record validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// Source file could not be retrieved.
    #[error("Failed to fetch document: {0}")]
    Fetch(#[from] FetchError),
    /// Task bookkeeping failed.
    #[error("Task update failed: {0}")]
    Task(#[from] TaskError),
}

impl From<ParseError> for PipelineError {
    fn from(error: ParseError) -> Self {
        match error {
            ParseError::UnsupportedFormat(extension) => Self::UnsupportedFormat(extension),
            other => Self::Parse(other),
        }
    }
}

impl PipelineError {
    /// Whether a redelivery of the same task could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Embedding(_) | Self::Store(_) | Self::Fetch(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_are_external_failures() {
        let embedding = PipelineError::from(EmbeddingClientError::GenerationFailed("down".into()));
        assert!(embedding.is_retryable());

        let chunking = PipelineError::from(ChunkingError::InvalidChunkSize);
        assert!(!chunking.is_retryable());

        let unsupported = PipelineError::from(ParseError::UnsupportedFormat("exe".into()));
        assert!(matches!(unsupported, PipelineError::UnsupportedFormat(_)));
        assert!(!unsupported.is_retryable());
    }

    #[test]
    fn outcome_serializes_for_task_diagnostics() {
        let outcome = IngestOutcome {
            document_id: "a@b.c/doc.txt".into(),
            chunk_count: 3,
            token_budget: Some(100),
            purged: true,
            ..IngestOutcome::default()
        };
        let json = serde_json::to_value(&outcome).expect("json");
        assert_eq!(json["chunk_count"], 3);
        assert_eq!(json["token_budget"], 100);
        assert_eq!(json["ocr_used"], false);
    }
}
