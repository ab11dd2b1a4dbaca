//! Embedding client abstraction and adapters.

pub mod batcher;
mod hashing;
mod ollama;
mod openai;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use thiserror::Error;

pub use hashing::HashingEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAIEmbedder;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// HTTP layer failed before receiving a response.
    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Provider responded with an unexpected status code.
    #[error("Unexpected embedding response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the provider.
        status: StatusCode,
        /// Body of the failing response.
        body: String,
    },
    /// Provider returned a different number of vectors than inputs.
    #[error("Embedding count mismatch: sent {expected} texts, received {actual} vectors")]
    CountMismatch {
        /// Number of texts submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Build the embedding client selected by `EMBEDDING_PROVIDER`.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    tracing::info!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Initializing embedding client"
    );
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Hashing => Arc::new(HashingEmbedder::new(config.embedding_dimension)),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbedder::new(
            config
                .ollama_url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".into()),
            config.embedding_model.clone(),
        )?),
        EmbeddingProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EmbeddingClientError::GenerationFailed("OPENAI_API_KEY is not set".into())
            })?;
            Arc::new(OpenAIEmbedder::new(
                config
                    .openai_base_url
                    .clone()
                    .unwrap_or_else(|| "https://api.openai.com".into()),
                api_key,
                config.embedding_model.clone(),
            )?)
        }
    };
    Ok(client)
}

async fn error_for_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, EmbeddingClientError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let error = EmbeddingClientError::UnexpectedStatus { status, body };
    tracing::error!(error = %error, "Embedding provider request failed");
    Err(error)
}

fn format_endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_config_builds_hashing_client() {
        let config = Config::local("db".into(), "uploads".into());
        let client = build_embedding_client(&config).expect("client");
        let vectors = client
            .generate_embeddings(vec!["hello".into()])
            .await
            .expect("vectors");
        assert_eq!(vectors[0].len(), config.embedding_dimension);
    }

    #[test]
    fn openai_without_key_is_rejected() {
        let mut config = Config::local("db".into(), "uploads".into());
        config.embedding_provider = EmbeddingProvider::OpenAI;
        assert!(build_embedding_client(&config).is_err());
    }
}
