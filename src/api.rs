//! HTTP surface for document ingestion.
//!
//! - `POST /upload-document` – Multipart upload (`file`, `user_email`, optional
//!   `structured_json`). Stores the file, registers a task, and runs or enqueues it. Queued
//!   uploads answer `202 Accepted`; inline uploads answer `200 OK` with the run outcome, or an
//!   error carrying the task id.
//! - `GET /task-status/:task_id` – One task.
//! - `GET /users/:user_email/tasks` – A user's tasks, newest first.
//! - `GET /metrics` – Ingestion counters.
//! - `GET /health` – Vector store reachability.

use crate::dispatch::Submission;
use crate::processing::{IngestApi, IngestOutcome, ProcessingOptions, ServiceError};
use crate::storage::FetchError;
use crate::tasks::{Task, TaskError};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Multipart framing allowance on top of the file size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the HTTP router. Request bodies are capped slightly above `upload_limit`.
pub fn create_router<S>(service: Arc<S>, upload_limit: usize) -> Router
where
    S: IngestApi + 'static,
{
    Router::new()
        .route("/upload-document", post(upload_document::<S>))
        .route("/task-status/:task_id", get(task_status::<S>))
        .route("/users/:user_email/tasks", get(user_tasks::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/health", get(health::<S>))
        .layer(DefaultBodyLimit::max(
            upload_limit.saturating_add(MULTIPART_OVERHEAD),
        ))
        .with_state(service)
}

/// Task as exposed over HTTP, timestamps in RFC 3339.
#[derive(Debug, Serialize)]
struct TaskView {
    task_id: i64,
    status: String,
    file_name: String,
    file_path: String,
    user_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    additional_info: Option<Value>,
    created_at: String,
    updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    started_at: Option<String>,
}

impl From<Task> for TaskView {
    fn from(task: Task) -> Self {
        let additional_info = task
            .additional_info
            .map(|raw| serde_json::from_str(&raw).unwrap_or(Value::String(raw)));
        Self {
            task_id: task.task_id,
            status: task.status.to_string(),
            file_name: task.file_name,
            file_path: task.file_path,
            user_email: task.user_email,
            error_message: task.error_message,
            additional_info,
            created_at: rfc3339(task.created_at),
            updated_at: rfc3339(task.updated_at),
            completed_at: task.completed_at.map(rfc3339),
            started_at: task.started_at.map(rfc3339),
        }
    }
}

fn rfc3339(value: OffsetDateTime) -> String {
    value
        .format(&Rfc3339)
        .unwrap_or_else(|_| value.to_string())
}

/// Success response for `POST /upload-document`.
#[derive(Serialize)]
struct UploadResponse {
    task_id: i64,
    status: &'static str,
    file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<IngestOutcome>,
}

#[derive(Default)]
struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    user_email: Option<String>,
    structured_json: bool,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("file part has no file name"))?;
                let bytes = field.bytes().await.map_err(multipart_error)?;
                form.file = Some((file_name, bytes.to_vec()));
            }
            Some("user_email") => {
                form.user_email = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("structured_json") => {
                let raw = field.text().await.map_err(multipart_error)?;
                form.structured_json = parse_flag(&raw)?;
            }
            _ => {}
        }
    }
    Ok(form)
}

fn parse_flag(raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" | "off" => Ok(false),
        "true" | "1" | "yes" | "on" => Ok(true),
        other => Err(AppError::bad_request(format!(
            "structured_json must be a boolean, got '{other}'"
        ))),
    }
}

/// Store an uploaded document and run or enqueue its ingestion.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    multipart: Multipart,
) -> Result<Response, AppError>
where
    S: IngestApi,
{
    let form = read_upload_form(multipart).await?;
    let (file_name, bytes) = form
        .file
        .ok_or_else(|| AppError::bad_request("missing 'file' part"))?;
    let user_email = form
        .user_email
        .map(|email| email.trim().to_string())
        .filter(|email| !email.is_empty())
        .ok_or_else(|| AppError::bad_request("missing 'user_email' field"))?;
    let options = ProcessingOptions {
        structured_json: form.structured_json,
    };

    let receipt = service
        .upload(&user_email, &file_name, bytes, options)
        .await?;
    tracing::info!(
        task_id = receipt.task.task_id,
        file_path = %receipt.task.file_path,
        user_email = %user_email,
        "Upload accepted"
    );

    let (code, status, outcome) = match receipt.submission {
        Submission::Completed(outcome) => (StatusCode::OK, "completed", Some(outcome)),
        Submission::Queued => (StatusCode::ACCEPTED, "processing", None),
    };
    let body = UploadResponse {
        task_id: receipt.task.task_id,
        status,
        file_path: receipt.task.file_path,
        outcome,
    };
    Ok((code, Json(body)).into_response())
}

/// Return a single task.
async fn task_status<S>(
    State(service): State<Arc<S>>,
    Path(task_id): Path<i64>,
) -> Result<Json<TaskView>, AppError>
where
    S: IngestApi,
{
    let task = service.task_status(task_id).await?;
    Ok(Json(task.into()))
}

#[derive(Serialize)]
struct TasksResponse {
    tasks: Vec<TaskView>,
}

/// Return every task of a user, newest first.
async fn user_tasks<S>(
    State(service): State<Arc<S>>,
    Path(user_email): Path<String>,
) -> Result<Json<TasksResponse>, AppError>
where
    S: IngestApi,
{
    let tasks = service.user_tasks(&user_email).await?;
    Ok(Json(TasksResponse {
        tasks: tasks.into_iter().map(TaskView::from).collect(),
    }))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<crate::metrics::MetricsSnapshot>
where
    S: IngestApi,
{
    Json(service.metrics_snapshot())
}

async fn health<S>(State(service): State<Arc<S>>) -> Result<Json<Value>, AppError>
where
    S: IngestApi,
{
    service.health().await?;
    Ok(Json(json!({ "status": "ok" })))
}

enum AppError {
    BadRequest { status: StatusCode, message: String },
    Service(ServiceError),
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

fn multipart_error(error: axum::extract::multipart::MultipartError) -> AppError {
    AppError::BadRequest {
        status: error.status(),
        message: error.body_text(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error = match self {
            Self::BadRequest { status, message } => {
                return (status, Json(json!({ "error": message }))).into_response();
            }
            Self::Service(error) => error,
        };

        let status = match &error {
            ServiceError::Upload(FetchError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ServiceError::Upload(FetchError::InvalidName(_)) => StatusCode::BAD_REQUEST,
            ServiceError::Task(TaskError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::Ingestion { source, .. } if source.is_retryable() => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::Ingestion { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Dispatch(_) | ServiceError::Unhealthy(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServiceError::Upload(_) | ServiceError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %error, "Request failed");
        }

        let body = match &error {
            ServiceError::Ingestion { task_id, .. } => json!({
                "error": error.to_string(),
                "task_id": task_id,
                "status": "failed",
            }),
            _ => json!({ "error": error.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self::Service(inner)
    }
}
