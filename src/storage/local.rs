use super::{FetchError, FileStore, LocalFile, check_size, storage_key, validate_key};
use async_trait::async_trait;
use std::path::PathBuf;

/// Stores uploads under `<root>/<user_email>/<file_name>`.
pub struct LocalFileStore {
    root: PathBuf,
    size_limit: usize,
}

impl LocalFileStore {
    /// Store rooted at `root`, rejecting uploads larger than `size_limit` bytes.
    pub fn new(root: PathBuf, size_limit: usize) -> Self {
        Self { root, size_limit }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn put(
        &self,
        user_email: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, FetchError> {
        check_size(bytes.len(), self.size_limit)?;
        let key = storage_key(user_email, file_name)?;
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        tracing::debug!(key = %key, bytes = bytes.len(), "Stored upload locally");
        Ok(key)
    }

    async fn fetch(&self, key: &str) -> Result<LocalFile, FetchError> {
        validate_key(key)?;
        let path = self.root.join(key);
        if !tokio::fs::try_exists(&path).await? {
            return Err(FetchError::NotFound(key.to_string()));
        }
        Ok(LocalFile::in_place(path))
    }
}
