#![deny(missing_docs)]

//! Document ingestion pipeline: extraction, chunking, embedding and vector indexing with a
//! durable task lifecycle.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Inline and queued task execution.
pub mod dispatch;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Document processing pipeline.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
/// Upload storage backends.
pub mod storage;
/// Task records and their lifecycle.
pub mod tasks;
