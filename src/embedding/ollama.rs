use super::{EmbeddingClient, EmbeddingClientError, error_for_status, format_endpoint};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings from a local Ollama runtime via the batched `/api/embed` endpoint.
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    /// Construct a client for the Ollama instance at `base_url`.
    pub fn new(base_url: String, model: String) -> Result<Self, EmbeddingClientError> {
        let client = Client::builder().user_agent("ragingest/0.1").build()?;
        Ok(Self {
            client,
            base_url,
            model,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbedder {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        tracing::debug!(model = %self.model, texts = texts.len(), "Requesting Ollama embeddings");
        let response = self
            .client
            .post(format_endpoint(&self.base_url, "api/embed"))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;
        let payload: EmbedResponse = error_for_status(response).await?.json().await?;
        Ok(payload.embeddings)
    }
}
