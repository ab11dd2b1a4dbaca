//! The single ingestion entry point shared by inline and queued execution.

use crate::{
    config::{ChunkingPolicy, Config},
    embedding::{
        EmbeddingClient,
        batcher::{embed_chunks, embed_records},
        build_embedding_client,
    },
    metrics::{IngestMetrics, MetricsSnapshot},
    processing::{
        chunking::{chunk_text, select_token_budget},
        locks::DocumentLocks,
        ocr::PdfOcr,
        parser::{DocumentParser, Extracted, ParseError},
        store::{MemoryVectorStore, Partition, StoreError, VectorStore},
        structured::{RecordSchema, flatten_json, prepare_records, to_text_snippet},
        types::{IngestOutcome, PipelineError, ProcessingOptions},
    },
    qdrant::QdrantService,
    storage::{FileStore, build_file_store},
    tasks::{SqliteTaskStore, Task, TaskManager},
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::Instrument;

/// Collaborators the pipeline runs against.
pub struct PipelineComponents {
    /// Task lifecycle manager.
    pub tasks: TaskManager,
    /// Upload storage.
    pub files: Arc<dyn FileStore>,
    /// Format-aware extractor.
    pub parser: DocumentParser,
    /// Embedding provider.
    pub embedder: Arc<dyn EmbeddingClient>,
    /// Vector index.
    pub store: Arc<dyn VectorStore>,
    /// Chunk budgets.
    pub policy: ChunkingPolicy,
    /// Schema applied to structured uploads.
    pub schema: RecordSchema,
    /// Shared counters.
    pub metrics: Arc<IngestMetrics>,
}

/// Runs one task end to end: fetch, purge, parse, chunk, embed, insert, finish.
///
/// Every error is caught once in [`IngestionPipeline::run`], recorded on the task as
/// `failed`, and returned. There is no internal retry; queue redelivery re-runs the whole
/// sequence, which is safe because prior data is purged before insert.
pub struct IngestionPipeline {
    components: PipelineComponents,
    locks: DocumentLocks,
}

impl IngestionPipeline {
    /// Assemble a pipeline from explicit collaborators.
    pub fn new(components: PipelineComponents) -> Self {
        Self {
            components,
            locks: DocumentLocks::new(),
        }
    }

    /// Build every collaborator from configuration and prepare the vector store.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let store: Arc<dyn VectorStore> = if config.qdrant_url.is_some() {
            let qdrant = QdrantService::new(config).map_err(StoreError::from)?;
            Arc::new(qdrant)
        } else {
            tracing::warn!("QDRANT_URL not set; using in-memory vector store");
            Arc::new(MemoryVectorStore::new())
        };
        store.ensure_ready().await?;

        let ocr = PdfOcr::from_settings(&config.ocr).map_err(ParseError::from)?;
        let task_store = SqliteTaskStore::open(&config.database_path)?;

        Ok(Self::new(PipelineComponents {
            tasks: TaskManager::new(Arc::new(task_store)),
            files: build_file_store(config)?,
            parser: DocumentParser::new(ocr, config.ocr.min_chars),
            embedder: build_embedding_client(config)?,
            store,
            policy: config.chunking,
            schema: RecordSchema::customer(),
            metrics: Arc::new(IngestMetrics::new()),
        }))
    }

    /// Task manager shared with the upload surface.
    pub fn tasks(&self) -> &TaskManager {
        &self.components.tasks
    }

    /// Upload storage shared with the upload surface.
    pub fn files(&self) -> &Arc<dyn FileStore> {
        &self.components.files
    }

    /// Vector store, for health checks.
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.components.store
    }

    /// Current ingestion counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.components.metrics.snapshot()
    }

    /// Process `task_id` and record its terminal state.
    pub async fn run(
        &self,
        task_id: i64,
        options: ProcessingOptions,
    ) -> Result<IngestOutcome, PipelineError> {
        let task = self.components.tasks.begin_run(task_id).await?;
        let span = tracing::info_span!("ingest", task_id, document_id = %task.file_path);

        match self.execute(&task, options).instrument(span).await {
            Ok(outcome) => {
                let info = serde_json::to_value(&outcome).unwrap_or(Value::Null);
                self.components.tasks.complete(task_id, &info).await?;
                self.components.metrics.record_completed(
                    outcome.chunk_count as u64,
                    outcome.record_count as u64,
                    outcome.ocr_used,
                );
                tracing::info!(
                    task_id,
                    document_id = %outcome.document_id,
                    chunks = outcome.chunk_count,
                    records = outcome.record_count,
                    ocr_used = outcome.ocr_used,
                    "Document indexed"
                );
                Ok(outcome)
            }
            Err(error) => {
                self.components.metrics.record_failed();
                if let Err(task_error) =
                    self.components.tasks.fail(task_id, &error.to_string()).await
                {
                    tracing::error!(task_id, error = %task_error, "Failed to record task failure");
                }
                tracing::error!(
                    task_id,
                    error = %error,
                    retryable = error.is_retryable(),
                    "Ingestion failed"
                );
                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        task: &Task,
        options: ProcessingOptions,
    ) -> Result<IngestOutcome, PipelineError> {
        let document_id = task.file_path.as_str();
        let file = self.components.files.fetch(document_id).await?;

        let _guard = self.locks.acquire(document_id).await;

        let mut purged = false;
        for partition in Partition::ALL {
            purged |= self.components.store.purge(partition, document_id).await?;
        }

        let parsed = self.components.parser.extract(file.path()).await?;
        let mut outcome = IngestOutcome {
            document_id: document_id.to_string(),
            ocr_used: parsed.ocr_used,
            purged,
            ..IngestOutcome::default()
        };

        match parsed.content {
            Extracted::Records(raw) if options.structured_json => {
                let records = prepare_records(document_id, raw, &self.components.schema)?;
                let embedded = embed_records(self.components.embedder.as_ref(), records).await?;
                outcome.record_count = embedded.len();
                self.components.store.insert_many(embedded).await?;
            }
            Extracted::Records(raw) => {
                let text = records_as_text(&raw);
                self.index_text(document_id, &text, &mut outcome).await?;
            }
            Extracted::Text(text) => {
                self.index_text(document_id, &text, &mut outcome).await?;
            }
        }

        Ok(outcome)
    }

    async fn index_text(
        &self,
        document_id: &str,
        text: &str,
        outcome: &mut IngestOutcome,
    ) -> Result<(), PipelineError> {
        let policy = &self.components.policy;
        let budget = select_token_budget(text, policy);
        let chunks = chunk_text(document_id, text, budget, policy.max_chunks)?;
        tracing::debug!(chunks = chunks.len(), budget, "Chunked document");

        let embedded = embed_chunks(self.components.embedder.as_ref(), chunks).await?;
        outcome.token_budget = Some(budget);
        outcome.chunk_count = embedded.len();
        for chunk in embedded {
            self.components.store.insert(chunk).await?;
        }
        Ok(())
    }
}

/// Render JSON records uploaded as ordinary documents, one snippet per paragraph.
fn records_as_text(records: &[Map<String, Value>]) -> String {
    records
        .iter()
        .map(|record| to_text_snippet(&flatten_json(record)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_records_render_as_separate_paragraphs() {
        let records = vec![
            json!({ "name": "Ada", "address": { "city": "Lisbon" } })
                .as_object()
                .cloned()
                .unwrap(),
            json!({ "name": "Bob" }).as_object().cloned().unwrap(),
        ];
        let text = records_as_text(&records);
        assert_eq!(text, "Address.city: Lisbon, Name: Ada\n\nName: Bob");
    }
}
