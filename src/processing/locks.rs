//! Per-document async locks.
//!
//! Two runs for the same document identifier would otherwise interleave purge and insert and
//! leave a mix of both chunk sets behind. Runs for different documents proceed in parallel.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Keyed mutexes, one per document identifier currently in use.
#[derive(Clone, Default)]
pub struct DocumentLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Holds a document lock; releases it and prunes the entry on drop.
pub struct DocumentGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl DocumentLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `document_id`.
    pub async fn acquire(&self, document_id: &str) -> DocumentGuard {
        let mutex = self
            .inner
            .entry(document_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        DocumentGuard {
            key: document_id.to_string(),
            guard: Some(guard),
            locks: Arc::clone(&self.inner),
        }
    }

    /// Number of documents with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no document is currently locked or awaited.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl Drop for DocumentGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table still references the mutex: nobody holds or awaits it.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_document_is_serialised() {
        let locks = DocumentLocks::new();
        let first = locks.acquire("a.txt").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("a.txt").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(first);
        contender.await.expect("contender finishes");
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_documents_do_not_block() {
        let locks = DocumentLocks::new();
        let _a = locks.acquire("a.txt").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b.txt")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
