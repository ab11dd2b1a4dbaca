//! Document processing: extraction, chunking, record validation, and the ingestion pipeline.

pub mod chunking;
pub mod locks;
pub mod ocr;
pub mod parser;
pub mod pipeline;
mod service;
pub mod store;
pub mod structured;
pub mod types;

pub use pipeline::{IngestionPipeline, PipelineComponents};
pub use service::{IngestApi, IngestService, ServiceError, UploadReceipt};
pub use types::{
    Chunk, ChunkingError, IngestOutcome, PipelineError, ProcessingOptions, StructuredRecord,
};
