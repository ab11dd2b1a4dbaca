use super::{FetchError, FileStore, LocalFile, check_size, storage_key, validate_key};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::path::Path;

/// Stores uploads in an HTTP object store addressed as `<base>/<key>` (GET/PUT).
pub struct HttpObjectStore {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) size_limit: usize,
}

impl HttpObjectStore {
    /// Store backed by the bucket at `base_url`.
    pub fn new(base_url: String, size_limit: usize) -> Result<Self, FetchError> {
        let client = Client::builder().user_agent("ragingest/0.1").build()?;
        Ok(Self {
            client,
            base_url,
            size_limit,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl FileStore for HttpObjectStore {
    async fn put(
        &self,
        user_email: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, FetchError> {
        check_size(bytes.len(), self.size_limit)?;
        let key = storage_key(user_email, file_name)?;
        let size = bytes.len();
        let response = self
            .client
            .put(self.object_url(&key))
            .body(bytes)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = FetchError::UnexpectedStatus { status, body };
            tracing::error!(key = %key, error = %error, "Object upload failed");
            return Err(error);
        }
        tracing::debug!(key = %key, bytes = size, "Stored upload in object store");
        Ok(key)
    }

    async fn fetch(&self, key: &str) -> Result<LocalFile, FetchError> {
        validate_key(key)?;
        let response = self.client.get(self.object_url(key)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound(key.to_string())),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(FetchError::UnexpectedStatus { status, body });
            }
            _ => {}
        }
        let bytes = response.bytes().await?;

        let scratch = tempfile::tempdir()?;
        let file_name = Path::new(key)
            .file_name()
            .ok_or_else(|| FetchError::InvalidName(key.to_string()))?;
        let path = scratch.path().join(file_name);
        tokio::fs::write(&path, &bytes).await?;
        Ok(LocalFile::in_scratch(path, scratch))
    }
}
