// src/recorder.rs
use metrics::counter;

use crate::model::{BatchSummary, ProcessingLogEntry};
use crate::store::Repository;

/// Best-effort telemetry writer. Failures are logged and counted, never
/// returned: a lost log row must not turn a processed feed into a failure.
#[derive(Clone)]
pub struct OutcomeRecorder {
    repo: Repository,
}

impl OutcomeRecorder {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn record_feed(&self, entry: &ProcessingLogEntry) {
        if let Err(e) = self.repo.insert_log(entry).await {
            counter!("telemetry_write_failures_total").increment(1);
            tracing::error!(
                target: "recorder",
                feed_id = %entry.feed_id,
                error = %e,
                "error logging feed processing"
            );
        }
    }

    pub async fn record_batch(&self, summary: &BatchSummary) {
        tracing::info!(
            target: "recorder",
            total = summary.total_feeds,
            successful = summary.successful,
            failed = summary.failed,
            elapsed_ms = summary.processing_time_ms,
            "batch processing stats"
        );
        if let Err(e) = self.repo.insert_batch_summary(summary).await {
            counter!("telemetry_write_failures_total").increment(1);
            tracing::error!(target: "recorder", error = %e, "error logging batch processing stats");
        }
    }
}
