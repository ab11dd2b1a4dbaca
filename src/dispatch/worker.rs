//! Queue consumer driving the ingestion pipeline.

use super::{DispatchError, TaskMessage};
use crate::processing::{
    pipeline::IngestionPipeline,
    types::{IngestOutcome, PipelineError},
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Consumes [`TaskMessage`]s and runs each through the shared pipeline.
pub struct Worker {
    pipeline: Arc<IngestionPipeline>,
    stale_after: Option<Duration>,
}

/// Outcome of [`Worker::handle_batch`].
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    /// Records processed successfully.
    pub processed: usize,
    /// Records that failed, in batch order.
    pub failures: Vec<BatchFailure>,
}

/// One failed batch record.
#[derive(Debug, Serialize)]
pub struct BatchFailure {
    /// Position in the `Records` array.
    pub index: usize,
    /// Broker message id, when the record carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Task named by the record, when it could be decoded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    /// Error description.
    pub error: String,
    /// Whether the broker should redeliver the record.
    pub retryable: bool,
}

/// How a delivered message ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The task completed.
    Completed,
    /// A transient failure; redelivering the message may succeed.
    Retryable,
    /// Redelivery would fail the same way.
    Permanent,
}

impl Disposition {
    /// Classify a pipeline result.
    pub fn of(result: &Result<IngestOutcome, PipelineError>) -> Self {
        match result {
            Ok(_) => Self::Completed,
            Err(error) if error.is_retryable() => Self::Retryable,
            Err(_) => Self::Permanent,
        }
    }
}

impl Worker {
    /// Worker running tasks through `pipeline`.
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self {
            pipeline,
            stale_after: None,
        }
    }

    /// Periodically fail tasks stuck in `processing` for longer than `max_age`.
    pub fn with_stale_sweep(mut self, max_age: Duration) -> Self {
        self.stale_after = Some(max_age);
        self
    }

    /// Handle one delivered message. Redelivery of the same message re-runs the pipeline.
    pub async fn on_message(&self, message: TaskMessage) -> Result<IngestOutcome, PipelineError> {
        tracing::info!(task_id = message.task_id, "Processing queued task");
        let result = self.pipeline.run(message.task_id, message.options()).await;
        if let Err(error) = &result {
            match Disposition::of(&result) {
                Disposition::Retryable => tracing::warn!(
                    task_id = message.task_id,
                    error = %error,
                    "Queued task failed; will be retried on redelivery"
                ),
                _ => tracing::error!(
                    task_id = message.task_id,
                    error = %error,
                    "Queued task failed permanently"
                ),
            }
        }
        result
    }

    /// Consume `receiver` until every sender is dropped.
    pub async fn run(self, mut receiver: mpsc::Receiver<TaskMessage>) {
        let Some(max_age) = self.stale_after else {
            while let Some(message) = receiver.recv().await {
                // Failures are recorded on the task and logged by `on_message`.
                self.on_message(message).await.ok();
            }
            tracing::info!("Task queue closed; worker exiting");
            return;
        };

        let mut sweep = tokio::time::interval(sweep_period(max_age));
        loop {
            tokio::select! {
                message = receiver.recv() => {
                    let Some(message) = message else { break };
                    self.on_message(message).await.ok();
                }
                _ = sweep.tick() => {
                    if let Err(error) = self.pipeline.tasks().sweep_stale(max_age).await {
                        tracing::error!(error = %error, "Stale task sweep failed");
                    }
                }
            }
        }
        tracing::info!("Task queue closed; worker exiting");
    }

    /// Process an SQS-style event `{"Records": [{"messageId": "...", "body": "<json>"}]}`.
    ///
    /// Records run in order; one failure does not stop the rest of the batch.
    pub async fn handle_batch(&self, event: &Value) -> BatchReport {
        let mut report = BatchReport::default();
        let records = event
            .get("Records")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for (index, record) in records.iter().enumerate() {
            let message_id = record
                .get("messageId")
                .and_then(Value::as_str)
                .map(str::to_string);
            let message = match decode_record(record) {
                Ok(message) => message,
                Err(error) => {
                    tracing::warn!(index, error = %error, "Skipping undecodable batch record");
                    report.failures.push(BatchFailure {
                        index,
                        message_id,
                        task_id: None,
                        error: error.to_string(),
                        retryable: false,
                    });
                    continue;
                }
            };
            match self.on_message(message).await {
                Ok(_) => report.processed += 1,
                Err(error) => report.failures.push(BatchFailure {
                    index,
                    message_id,
                    task_id: Some(message.task_id),
                    retryable: error.is_retryable(),
                    error: error.to_string(),
                }),
            }
        }

        tracing::info!(
            processed = report.processed,
            failed = report.failures.len(),
            "Batch handled"
        );
        report
    }
}

fn decode_record(record: &Value) -> Result<TaskMessage, DispatchError> {
    let body = record
        .get("body")
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::InvalidMessage("record has no string body".into()))?;
    let value: Value =
        serde_json::from_str(body).map_err(|err| DispatchError::InvalidMessage(err.to_string()))?;
    // Producers may send the id as a string.
    let task_id = match value.get("task_id") {
        Some(Value::Number(number)) => number.as_i64(),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| DispatchError::InvalidMessage("task_id missing or not an integer".into()))?;
    let structured_json = value
        .get("structured_json")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(TaskMessage {
        task_id,
        structured_json,
    })
}

fn sweep_period(max_age: Duration) -> Duration {
    (max_age / 2).clamp(Duration::from_secs(1), Duration::from_secs(300))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_numeric_and_string_task_ids() {
        let numeric = decode_record(&json!({ "body": r#"{"task_id": 5}"# })).unwrap();
        assert_eq!(numeric.task_id, 5);
        assert!(!numeric.structured_json);

        let text =
            decode_record(&json!({ "body": r#"{"task_id": "9", "structured_json": true}"# }))
                .unwrap();
        assert_eq!(text.task_id, 9);
        assert!(text.structured_json);
    }

    #[test]
    fn rejects_records_without_task_id() {
        assert!(decode_record(&json!({ "body": "{}" })).is_err());
        assert!(decode_record(&json!({ "body": "not json" })).is_err());
        assert!(decode_record(&json!({})).is_err());
    }

    #[test]
    fn dispositions_follow_retryability() {
        use crate::embedding::EmbeddingClientError;
        use crate::processing::parser::ParseError;

        let transient: Result<IngestOutcome, PipelineError> = Err(PipelineError::from(
            EmbeddingClientError::GenerationFailed("provider down".into()),
        ));
        assert_eq!(Disposition::of(&transient), Disposition::Retryable);

        let permanent: Result<IngestOutcome, PipelineError> = Err(PipelineError::from(
            ParseError::UnsupportedFormat("exe".into()),
        ));
        assert_eq!(Disposition::of(&permanent), Disposition::Permanent);
    }

    #[test]
    fn sweep_period_is_bounded() {
        assert_eq!(sweep_period(Duration::from_secs(1)), Duration::from_secs(1));
        assert_eq!(sweep_period(Duration::from_secs(120)), Duration::from_secs(60));
        assert_eq!(
            sweep_period(Duration::from_secs(86_400)),
            Duration::from_secs(300)
        );
    }
}
