//! Inline or queued execution of ingestion tasks.

pub mod worker;

use crate::processing::{
    pipeline::IngestionPipeline,
    types::{IngestOutcome, PipelineError, ProcessingOptions},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub use worker::{BatchFailure, BatchReport, Disposition, Worker};

/// Queue payload naming the task to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Task to run.
    pub task_id: i64,
    /// Store JSON uploads as records.
    #[serde(default)]
    pub structured_json: bool,
}

impl TaskMessage {
    /// Message for `task_id` carrying `options`.
    pub fn new(task_id: i64, options: ProcessingOptions) -> Self {
        Self {
            task_id,
            structured_json: options.structured_json,
        }
    }

    /// Processing switches encoded in the message.
    pub fn options(&self) -> ProcessingOptions {
        ProcessingOptions {
            structured_json: self.structured_json,
        }
    }
}

/// Errors raised while handing a task to its executor.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The consumer side of the queue has shut down.
    #[error("Task queue is closed")]
    QueueClosed,
    /// A queue message could not be decoded.
    #[error("Invalid task message: {0}")]
    InvalidMessage(String),
    /// Inline execution failed; the task is already marked `failed`.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Destination for queued task messages. Delivery is at-least-once.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Publish one message.
    async fn enqueue(&self, message: TaskMessage) -> Result<(), DispatchError>;
}

/// Bounded in-process queue feeding a [`Worker`].
#[derive(Clone)]
pub struct ChannelQueue {
    sender: mpsc::Sender<TaskMessage>,
}

impl ChannelQueue {
    /// Create a queue holding at most `capacity` pending messages.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TaskMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl TaskQueue for ChannelQueue {
    async fn enqueue(&self, message: TaskMessage) -> Result<(), DispatchError> {
        let task_id = message.task_id;
        self.sender
            .send(message)
            .await
            .map_err(|_| DispatchError::QueueClosed)?;
        tracing::debug!(task_id, "Task enqueued");
        Ok(())
    }
}

/// Result of handing a task to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Inline mode ran the pipeline to completion.
    Completed(IngestOutcome),
    /// Queued mode published the task; a worker will pick it up.
    Queued,
}

/// Routes tasks either straight into the pipeline or onto a queue.
#[derive(Clone)]
pub enum Dispatcher {
    /// Run the pipeline in the caller's task.
    Inline(Arc<IngestionPipeline>),
    /// Publish to a queue consumed by a [`Worker`].
    Queued(Arc<dyn TaskQueue>),
}

impl Dispatcher {
    /// Run or enqueue `task_id`.
    pub async fn submit(
        &self,
        task_id: i64,
        options: ProcessingOptions,
    ) -> Result<Submission, DispatchError> {
        match self {
            Self::Inline(pipeline) => {
                let outcome = pipeline.run(task_id, options).await?;
                Ok(Submission::Completed(outcome))
            }
            Self::Queued(queue) => {
                queue.enqueue(TaskMessage::new(task_id, options)).await?;
                Ok(Submission::Queued)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_defaults_structured_flag() {
        let message: TaskMessage = serde_json::from_str(r#"{"task_id": 7}"#).unwrap();
        assert_eq!(message.task_id, 7);
        assert!(!message.options().structured_json);

        let encoded = serde_json::to_value(TaskMessage::new(
            3,
            ProcessingOptions {
                structured_json: true,
            },
        ))
        .unwrap();
        assert_eq!(encoded["task_id"], 3);
        assert_eq!(encoded["structured_json"], true);
    }

    #[tokio::test]
    async fn queued_dispatch_publishes_message() {
        let (queue, mut receiver) = ChannelQueue::new(4);
        let dispatcher = Dispatcher::Queued(Arc::new(queue));

        let submission = dispatcher
            .submit(11, ProcessingOptions::default())
            .await
            .unwrap();

        assert_eq!(submission, Submission::Queued);
        let message = receiver.recv().await.expect("message");
        assert_eq!(message.task_id, 11);
    }

    #[tokio::test]
    async fn closed_queue_is_reported() {
        let (queue, receiver) = ChannelQueue::new(1);
        drop(receiver);
        let error = queue
            .enqueue(TaskMessage::new(1, ProcessingOptions::default()))
            .await
            .unwrap_err();
        assert!(matches!(error, DispatchError::QueueClosed));
    }
}
