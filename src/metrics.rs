use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion activity.
#[derive(Default)]
pub struct IngestMetrics {
    documents_completed: AtomicU64,
    documents_failed: AtomicU64,
    chunks_indexed: AtomicU64,
    records_indexed: AtomicU64,
    ocr_fallbacks: AtomicU64,
}

impl IngestMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed document and what it produced.
    pub fn record_completed(&self, chunk_count: u64, record_count: u64, ocr_used: bool) {
        self.documents_completed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
        self.records_indexed
            .fetch_add(record_count, Ordering::Relaxed);
        if ocr_used {
            self.ocr_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a failed document.
    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_completed: self.documents_completed.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            records_indexed: self.records_indexed.load(Ordering::Relaxed),
            ocr_fallbacks: self.ocr_fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents indexed successfully since startup.
    pub documents_completed: u64,
    /// Documents whose run ended in failure.
    pub documents_failed: u64,
    /// Total chunks inserted.
    pub chunks_indexed: u64,
    /// Total structured records inserted.
    pub records_indexed: u64,
    /// Documents whose text came from OCR.
    pub ocr_fallbacks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_documents_and_outputs() {
        let metrics = IngestMetrics::new();
        metrics.record_completed(2, 0, false);
        metrics.record_completed(3, 0, true);
        metrics.record_completed(0, 4, false);
        metrics.record_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_completed, 3);
        assert_eq!(snapshot.documents_failed, 1);
        assert_eq!(snapshot.chunks_indexed, 5);
        assert_eq!(snapshot.records_indexed, 4);
        assert_eq!(snapshot.ocr_fallbacks, 1);
    }

    #[test]
    fn snapshot_starts_empty() {
        assert_eq!(IngestMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
