//! Ingestion service shared by the HTTP surface and the CLI.

use crate::{
    config::{Config, DispatchMode},
    dispatch::{ChannelQueue, DispatchError, Dispatcher, Submission, Worker},
    metrics::MetricsSnapshot,
    processing::{
        pipeline::IngestionPipeline,
        store::StoreError,
        types::{PipelineError, ProcessingOptions},
    },
    storage::{FetchError, split_key},
    tasks::{Task, TaskError},
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced to callers of [`IngestApi`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The upload could not be stored.
    #[error(transparent)]
    Upload(#[from] FetchError),
    /// Task lookup or bookkeeping failed.
    #[error(transparent)]
    Task(#[from] TaskError),
    /// The task could not be handed to the queue.
    #[error(transparent)]
    Dispatch(DispatchError),
    /// Inline processing failed; the task is recorded as `failed`.
    #[error("Task {task_id} failed: {source}")]
    Ingestion {
        /// Task that failed.
        task_id: i64,
        /// Pipeline error.
        #[source]
        source: PipelineError,
    },
    /// Health check against the vector store failed.
    #[error("Vector store unavailable: {0}")]
    Unhealthy(#[from] StoreError),
}

/// Accepted upload and what happened to it.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    /// Task as registered (status `processing`).
    pub task: Task,
    /// Inline completion or queue acceptance.
    pub submission: Submission,
}

/// Abstraction over the ingestion service used by external surfaces.
#[async_trait]
pub trait IngestApi: Send + Sync {
    /// Store an upload, register its task, and run or enqueue it.
    async fn upload(
        &self,
        user_email: &str,
        file_name: &str,
        bytes: Vec<u8>,
        options: ProcessingOptions,
    ) -> Result<UploadReceipt, ServiceError>;

    /// Current state of one task.
    async fn task_status(&self, task_id: i64) -> Result<Task, ServiceError>;

    /// Every task of a user, newest first.
    async fn user_tasks(&self, user_email: &str) -> Result<Vec<Task>, ServiceError>;

    /// Ingestion counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;

    /// Check that the vector store is reachable.
    async fn health(&self) -> Result<(), ServiceError>;
}

/// Owns the pipeline and the dispatcher. Construct once near process start and share it
/// through an `Arc`.
pub struct IngestService {
    pipeline: Arc<IngestionPipeline>,
    dispatcher: Dispatcher,
}

impl IngestService {
    /// Service dispatching through `dispatcher`.
    pub fn new(pipeline: Arc<IngestionPipeline>, dispatcher: Dispatcher) -> Self {
        Self {
            pipeline,
            dispatcher,
        }
    }

    /// Build the pipeline from configuration. In queued mode a [`Worker`] consuming an
    /// in-process channel is spawned on the current runtime.
    pub async fn from_config(config: &Config) -> Result<Self, PipelineError> {
        let pipeline = Arc::new(IngestionPipeline::from_config(config).await?);
        let dispatcher = match config.dispatch_mode {
            DispatchMode::Inline => Dispatcher::Inline(Arc::clone(&pipeline)),
            DispatchMode::Queued => {
                let (queue, receiver) = ChannelQueue::new(config.queue_capacity);
                let mut worker = Worker::new(Arc::clone(&pipeline));
                if let Some(max_age) = config.task_stale_after {
                    worker = worker.with_stale_sweep(max_age);
                }
                tokio::spawn(worker.run(receiver));
                tracing::info!(capacity = config.queue_capacity, "Queued dispatch enabled");
                Dispatcher::Queued(Arc::new(queue))
            }
        };
        Ok(Self::new(pipeline, dispatcher))
    }

    /// Pipeline backing this service.
    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }
}

#[async_trait]
impl IngestApi for IngestService {
    async fn upload(
        &self,
        user_email: &str,
        file_name: &str,
        bytes: Vec<u8>,
        options: ProcessingOptions,
    ) -> Result<UploadReceipt, ServiceError> {
        let key = self.pipeline.files().put(user_email, file_name, bytes).await?;
        // Record the same normalised names the storage key was built from.
        let (user_email, file_name) = split_key(&key).unwrap_or((user_email, file_name));
        let task = self
            .pipeline
            .tasks()
            .register_upload(file_name, &key, user_email)
            .await?;

        let submission = match self.dispatcher.submit(task.task_id, options).await {
            Ok(submission) => submission,
            Err(DispatchError::Pipeline(source)) => {
                return Err(ServiceError::Ingestion {
                    task_id: task.task_id,
                    source,
                });
            }
            Err(error) => {
                // Nothing will ever pick the task up, so it must not stay `processing`.
                if let Err(fail_error) = self
                    .pipeline
                    .tasks()
                    .fail(task.task_id, &error.to_string())
                    .await
                {
                    tracing::error!(
                        task_id = task.task_id,
                        error = %fail_error,
                        "Failed to record dispatch failure"
                    );
                }
                return Err(ServiceError::Dispatch(error));
            }
        };
        Ok(UploadReceipt { task, submission })
    }

    async fn task_status(&self, task_id: i64) -> Result<Task, ServiceError> {
        Ok(self.pipeline.tasks().get(task_id).await?)
    }

    async fn user_tasks(&self, user_email: &str) -> Result<Vec<Task>, ServiceError> {
        Ok(self.pipeline.tasks().list_for_user(user_email.trim()).await?)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.pipeline.metrics_snapshot()
    }

    async fn health(&self) -> Result<(), ServiceError> {
        self.pipeline.store().ping().await?;
        Ok(())
    }
}
