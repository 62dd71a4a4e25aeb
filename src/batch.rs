// src/batch.rs
//! Bounded-concurrency batch processor.
//!
//! One task per active feed, all spawned up front, each admitted through a
//! shared semaphore sized to `max_concurrent_feeds`. A task holds its permit
//! from the parse call until its storage writes are done. Every task yields
//! a tagged `FeedOutcome`; the aggregator never sees an error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::error::{FeedError, StoreError};
use crate::extract::{normalize_items, ContentExtractor};
use crate::locator::{Service, ServiceLocator};
use crate::metrics::ensure_metrics_described;
use crate::model::{millis, BatchSummary, FailureKind, Feed, ProcessingLogEntry};
use crate::recorder::OutcomeRecorder;
use crate::store::Repository;

pub const DEFAULT_MAX_CONCURRENT_FEEDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FeedOutcome {
    Success { items: usize },
    Error { kind: FailureKind, message: String },
}

impl FeedOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FeedOutcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            FeedOutcome::Success { .. } => None,
            FeedOutcome::Error { kind, .. } => Some(*kind),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub outcomes: Vec<(String, FeedOutcome)>,
}

impl BatchReport {
    pub fn outcome(&self, feed_id: &str) -> Option<&FeedOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == feed_id)
            .map(|(_, o)| o)
    }
}

#[derive(Clone)]
pub struct BatchProcessor {
    repo: Repository,
    extractor: Arc<dyn ContentExtractor>,
    locator: Arc<ServiceLocator>,
    recorder: OutcomeRecorder,
    gate: Arc<Semaphore>,
    max_concurrent: usize,
}

impl BatchProcessor {
    pub fn new(
        repo: Repository,
        extractor: Arc<dyn ContentExtractor>,
        locator: Arc<ServiceLocator>,
        max_concurrent_feeds: usize,
    ) -> Self {
        let max_concurrent = max_concurrent_feeds.max(1);
        Self {
            recorder: OutcomeRecorder::new(repo.clone()),
            repo,
            extractor,
            locator,
            gate: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Processes every active feed once.
    ///
    /// `Err` only when the work set itself cannot be read; per-feed failures
    /// are reported inside the `BatchReport`.
    pub async fn run_batch(&self) -> Result<BatchReport, StoreError> {
        ensure_metrics_described();
        tracing::info!(target: "batch", "starting scheduled feed processing");
        let started = Instant::now();

        let feeds = self.repo.active_feeds().await?;
        if feeds.is_empty() {
            tracing::info!(target: "batch", "no active feeds to process");
            return Ok(BatchReport {
                elapsed: started.elapsed(),
                ..BatchReport::default()
            });
        }

        let total = feeds.len();
        tracing::info!(target: "batch", feeds = total, max_concurrent = self.max_concurrent, "processing active feeds");
        let endpoint = self.locator.current(Service::FeedParser);

        let mut handles = Vec::with_capacity(total);
        for feed in feeds {
            let this = self.clone();
            let endpoint = endpoint.clone();
            let id = feed.id.clone();
            let name = feed.name.clone();
            let handle = tokio::spawn(async move { this.admit_and_process(&feed, &endpoint).await });
            handles.push((id, name, handle));
        }

        let mut outcomes = Vec::with_capacity(total);
        for (feed_id, name, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join) => {
                    // The task died before it could record anything.
                    let message =
                        FailureKind::ProcessingError.describe(&name, &format!("task aborted: {join}"));
                    tracing::error!(target: "batch", feed_id = %feed_id, "{message}");
                    self.recorder
                        .record_feed(&ProcessingLogEntry::failure(&feed_id, message.clone(), Duration::ZERO))
                        .await;
                    count_outcome(Some(FailureKind::ProcessingError));
                    FeedOutcome::Error {
                        kind: FailureKind::ProcessingError,
                        message,
                    }
                }
            };
            outcomes.push((feed_id, outcome));
        }

        let successful = outcomes.iter().filter(|(_, o)| o.is_success()).count();
        let failed = total - successful;
        let elapsed = started.elapsed();

        tracing::info!(
            target: "batch",
            successful,
            failed,
            elapsed_ms = millis(elapsed),
            "feed processing completed"
        );
        counter!("batch_runs_total").increment(1);
        gauge!("batch_last_run_ts").set(Utc::now().timestamp() as f64);

        self.recorder
            .record_batch(&BatchSummary {
                total_feeds: total as u64,
                successful: successful as u64,
                failed: failed as u64,
                processing_time_ms: millis(elapsed),
                created_at: Utc::now(),
            })
            .await;

        Ok(BatchReport {
            total,
            successful,
            failed,
            elapsed,
            outcomes,
        })
    }

    /// Runs the per-feed pipeline for a single feed, outside of a batch.
    /// `Ok(None)` when no feed has that id.
    pub async fn process_one(&self, feed_id: &str) -> Result<Option<FeedOutcome>, StoreError> {
        ensure_metrics_described();
        let Some(feed) = self.repo.feed_by_id(feed_id).await? else {
            return Ok(None);
        };
        let endpoint = self.locator.current(Service::FeedParser);
        Ok(Some(self.admit_and_process(&feed, &endpoint).await))
    }

    async fn admit_and_process(&self, feed: &Feed, endpoint: &str) -> FeedOutcome {
        let _permit = match self.gate.acquire().await {
            Ok(p) => p,
            Err(_) => {
                return self
                    .finish(feed, Err(FeedError::Aborted("admission gate closed".into())), Instant::now())
                    .await
            }
        };

        let started = Instant::now();
        tracing::debug!(target: "batch", feed_id = %feed.id, url = %feed.url, "processing feed");
        let result = self.fetch_and_store(feed, endpoint).await;
        self.finish(feed, result, started).await
    }

    async fn fetch_and_store(&self, feed: &Feed, endpoint: &str) -> Result<usize, FeedError> {
        let parsed = self.extractor.parse(endpoint, &feed.url).await?;

        let now = Utc::now();
        let (items, dropped) = normalize_items(&feed.id, parsed.items, now);
        if dropped > 0 {
            tracing::debug!(target: "batch", feed_id = %feed.id, dropped, "dropped unusable or repeated items");
        }

        let stored = self.repo.upsert_items(&items).await?;

        // Items are already stored at this point; a failed timestamp write
        // only delays the next freshness signal.
        if let Err(e) = self.repo.touch_feed(&feed.id, now).await {
            tracing::error!(target: "batch", feed_id = %feed.id, error = %e, "error updating feed timestamp");
        }
        Ok(stored)
    }

    async fn finish(
        &self,
        feed: &Feed,
        result: Result<usize, FeedError>,
        started: Instant,
    ) -> FeedOutcome {
        let elapsed = started.elapsed();
        histogram!("feed_processing_ms").record(elapsed.as_secs_f64() * 1_000.0);

        match result {
            Ok(items) => {
                tracing::info!(
                    target: "batch",
                    feed_id = %feed.id,
                    items,
                    elapsed_ms = millis(elapsed),
                    "successfully processed feed '{}'",
                    feed.name
                );
                self.recorder
                    .record_feed(&ProcessingLogEntry::success(&feed.id, items, elapsed))
                    .await;
                count_outcome(None);
                FeedOutcome::Success { items }
            }
            Err(e) => {
                let kind = e.kind();
                let message = kind.describe(&feed.name, &e);
                tracing::error!(target: "batch", feed_id = %feed.id, kind = %kind, "{message}");
                self.recorder
                    .record_feed(&ProcessingLogEntry::failure(&feed.id, message.clone(), elapsed))
                    .await;
                count_outcome(Some(kind));
                FeedOutcome::Error { kind, message }
            }
        }
    }
}

fn count_outcome(kind: Option<FailureKind>) {
    match kind {
        None => counter!("feeds_processed_total", "status" => "success").increment(1),
        Some(kind) => {
            counter!("feeds_processed_total", "status" => "error").increment(1);
            counter!("feed_failures_total", "kind" => kind.as_str()).increment(1);
        }
    }
}
