use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline and query activity.
#[derive(Default)]
pub struct PipelineMetrics {
    files_processed: AtomicU64,
    files_failed: AtomicU64,
    chunks_written: AtomicU64,
    queries_answered: AtomicU64,
    queries_failed: AtomicU64,
    syncs_started: AtomicU64,
    sync_errors: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed file and the number of knowledge objects written for it.
    pub fn record_file(&self, chunk_count: u64) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
        self.chunks_written
            .fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a file whose pipeline run failed.
    pub fn record_file_failure(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one answered or failed query.
    pub fn record_query(&self, succeeded: bool) {
        let counter = if succeeded {
            &self.queries_answered
        } else {
            &self.queries_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one index sync request.
    pub fn record_sync(&self, started: bool) {
        let counter = if started {
            &self.syncs_started
        } else {
            &self.sync_errors
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            syncs_started: self.syncs_started.load(Ordering::Relaxed),
            sync_errors: self.sync_errors.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Files that reached `done` since startup.
    pub files_processed: u64,
    /// Files that ended in `failed` since startup.
    pub files_failed: u64,
    /// Knowledge objects (chunks or passthrough copies) written since startup.
    pub chunks_written: u64,
    /// Queries answered successfully.
    pub queries_answered: u64,
    /// Queries that failed.
    pub queries_failed: u64,
    /// Index sync passes accepted by the provider.
    pub syncs_started: u64,
    /// Index sync requests rejected by the provider.
    pub sync_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_files_and_chunks() {
        let metrics = PipelineMetrics::new();
        metrics.record_file(2);
        metrics.record_file(3);
        metrics.record_file_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.files_processed, 2);
        assert_eq!(snapshot.chunks_written, 5);
        assert_eq!(snapshot.files_failed, 1);
    }

    #[test]
    fn query_and_sync_outcomes_use_separate_counters() {
        let metrics = PipelineMetrics::new();
        metrics.record_query(true);
        metrics.record_query(false);
        metrics.record_query(true);
        metrics.record_sync(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries_answered, 2);
        assert_eq!(snapshot.queries_failed, 1);
        assert_eq!(snapshot.syncs_started, 0);
        assert_eq!(snapshot.sync_errors, 1);
    }
}
