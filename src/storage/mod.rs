//! Upload storage: persisting accepted files and fetching them back for processing.
//!
//! Files are addressed by a storage key of the form `<user_email>/<file_name>`. The key is also
//! the document identifier used to partition the vector store, so re-uploading the same file
//! name as the same user replaces the earlier document.

mod http;
mod local;

use crate::config::Config;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use thiserror::Error;

pub use http::HttpObjectStore;
pub use local::LocalFileStore;

/// Errors raised while storing or retrieving uploads.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No object exists under the key.
    #[error("no stored file for key '{0}'")]
    NotFound(String),
    /// Upload exceeds the configured size limit.
    #[error("file is {size} bytes; the limit is {limit} bytes")]
    TooLarge {
        /// Size of the rejected upload.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// File name or user identifier cannot form a safe key.
    #[error("invalid storage key component '{0}'")]
    InvalidName(String),
    /// Local filesystem failure.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// HTTP layer failed before receiving a response.
    #[error("object store request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Object store responded with an unexpected status code.
    #[error("unexpected object store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the store.
        status: StatusCode,
        /// Body of the failing response.
        body: String,
    },
}

/// A fetched file available on local disk for the duration of a run.
#[derive(Debug)]
pub struct LocalFile {
    path: PathBuf,
    _scratch: Option<TempDir>,
}

impl LocalFile {
    pub(crate) fn in_place(path: PathBuf) -> Self {
        Self {
            path,
            _scratch: None,
        }
    }

    pub(crate) fn in_scratch(path: PathBuf, scratch: TempDir) -> Self {
        Self {
            path,
            _scratch: Some(scratch),
        }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Durable storage for uploaded files.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store `bytes` and return the storage key.
    async fn put(&self, user_email: &str, file_name: &str, bytes: Vec<u8>)
    -> Result<String, FetchError>;

    /// Make the object under `key` available locally.
    async fn fetch(&self, key: &str) -> Result<LocalFile, FetchError>;
}

/// Build the file store selected by configuration.
pub fn build_file_store(config: &Config) -> Result<Arc<dyn FileStore>, FetchError> {
    let store: Arc<dyn FileStore> = match &config.object_store_url {
        Some(url) => Arc::new(HttpObjectStore::new(url.clone(), config.file_size_limit)?),
        None => Arc::new(LocalFileStore::new(
            config.upload_dir.clone(),
            config.file_size_limit,
        )),
    };
    Ok(store)
}

/// Compose `<user_email>/<file_name>`, rejecting components that could escape the root.
pub fn storage_key(user_email: &str, file_name: &str) -> Result<String, FetchError> {
    let user = user_email.trim();
    if user.is_empty() || user.contains(['/', '\\']) || user.starts_with('.') {
        return Err(FetchError::InvalidName(user_email.to_string()));
    }
    let name = Path::new(file_name.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.starts_with('.'))
        .ok_or_else(|| FetchError::InvalidName(file_name.to_string()))?;
    Ok(format!("{user}/{name}"))
}

/// Split a key built by [`storage_key`] back into its normalised user and file name.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}

pub(crate) fn check_size(size: usize, limit: usize) -> Result<(), FetchError> {
    if size > limit {
        return Err(FetchError::TooLarge { size, limit });
    }
    Ok(())
}

pub(crate) fn validate_key(key: &str) -> Result<(), FetchError> {
    let escapes = key
        .split(['/', '\\'])
        .any(|part| part.is_empty() || part == "." || part == "..");
    if escapes {
        return Err(FetchError::InvalidName(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_strips_directories_from_file_names() {
        assert_eq!(
            storage_key("ada@example.com", "reports/q1.pdf").unwrap(),
            "ada@example.com/q1.pdf"
        );
        assert_eq!(
            storage_key(" ada@example.com ", "notes.txt").unwrap(),
            "ada@example.com/notes.txt"
        );
    }

    #[test]
    fn split_key_recovers_normalised_parts() {
        let key = storage_key(" ada@example.com ", "reports/q1.pdf").unwrap();
        assert_eq!(split_key(&key), Some(("ada@example.com", "q1.pdf")));
        assert_eq!(split_key("no-separator"), None);
    }

    #[test]
    fn storage_key_rejects_unsafe_components() {
        assert!(storage_key("../etc", "passwd").is_err());
        assert!(storage_key("ada@example.com", "..").is_err());
        assert!(storage_key("", "a.txt").is_err());
        assert!(storage_key("ada@example.com", ".env").is_err());
    }

    #[test]
    fn keys_with_traversal_are_invalid() {
        assert!(validate_key("ada/../../secret").is_err());
        assert!(validate_key("ada/notes.txt").is_ok());
    }

    #[test]
    fn size_limit_is_inclusive() {
        assert!(check_size(10, 10).is_ok());
        assert!(matches!(
            check_size(11, 10),
            Err(FetchError::TooLarge { size: 11, limit: 10 })
        ));
    }
}
