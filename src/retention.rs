// src/retention.rs
//! Age-based pruning of stored items and processing telemetry.
//!
//! Collections are swept one after another with no transaction around them.
//! A failure in one does not stop the others; whatever is left behind is
//! picked up by the next sweep.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use serde::Serialize;

use crate::store::{Collection, Repository};

pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Longest accepted horizon: one hundred years.
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Swept in this order.
pub const SWEPT: [Collection; 3] = [
    Collection::FeedItems,
    Collection::ProcessingLogs,
    Collection::BatchLogs,
];

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub cutoff: DateTime<Utc>,
    pub deleted: Vec<(Collection, u64)>,
    pub failed: Vec<(Collection, String)>,
}

impl SweepReport {
    pub fn deleted_from(&self, collection: Collection) -> Option<u64> {
        self.deleted
            .iter()
            .find(|(c, _)| *c == collection)
            .map(|(_, n)| *n)
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct RetentionSweeper {
    repo: Repository,
}

impl RetentionSweeper {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn sweep(&self, retention_days: u32) -> SweepReport {
        self.sweep_at(Utc::now(), retention_days).await
    }

    /// Deletes rows with `created_at` strictly before `now - retention_days`.
    /// A horizon that reaches past the representable date range deletes
    /// nothing and reports every collection as failed.
    pub async fn sweep_at(&self, now: DateTime<Utc>, retention_days: u32) -> SweepReport {
        let Some(cutoff) = ChronoDuration::try_days(i64::from(retention_days))
            .and_then(|horizon| now.checked_sub_signed(horizon))
        else {
            let reason = format!("retention horizon of {retention_days} days is out of range");
            tracing::error!(target: "retention", retention_days, "error during cleanup: horizon out of range");
            return SweepReport {
                cutoff: now,
                deleted: Vec::new(),
                failed: SWEPT.iter().map(|c| (*c, reason.clone())).collect(),
            };
        };
        tracing::info!(target: "retention", %cutoff, retention_days, "starting cleanup of old items");

        let mut report = SweepReport {
            cutoff,
            deleted: Vec::with_capacity(SWEPT.len()),
            failed: Vec::new(),
        };
        for collection in SWEPT {
            match self.repo.delete_created_before(collection, cutoff).await {
                Ok(n) => {
                    counter!("retention_deleted_total", "collection" => collection.table())
                        .increment(n);
                    tracing::info!(target: "retention", %collection, deleted = n, "deleted old rows");
                    report.deleted.push((collection, n));
                }
                Err(e) => {
                    tracing::error!(target: "retention", %collection, error = %e, "error during cleanup");
                    report.failed.push((collection, e.to_string()));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn row(created_at: DateTime<Utc>) -> crate::store::Row {
        let serde_json::Value::Object(m) = json!({ "created_at": created_at.to_rfc3339() }) else {
            unreachable!()
        };
        m
    }

    #[tokio::test]
    async fn boundary_row_is_kept() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new());
        let exactly = now - ChronoDuration::days(90);
        store.seed(Collection::ProcessingLogs, [row(exactly)]);

        let sweeper = RetentionSweeper::new(Repository::new(store.clone()));
        let report = sweeper.sweep_at(now, 90).await;
        assert_eq!(report.cutoff, exactly);
        assert_eq!(report.deleted_from(Collection::ProcessingLogs), Some(0));
        assert_eq!(store.len(Collection::ProcessingLogs), 1);
    }

    #[tokio::test]
    async fn unrepresentable_horizon_fails_without_deleting() {
        let store = Arc::new(MemoryStore::new());
        store.seed(Collection::FeedItems, [row(Utc::now() - ChronoDuration::days(400))]);

        let sweeper = RetentionSweeper::new(Repository::new(store.clone()));
        let report = sweeper.sweep(200_000_000).await;
        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), SWEPT.len());
        assert!(report.failed[0].1.contains("out of range"));
        assert!(report.deleted.is_empty());
        assert_eq!(store.len(Collection::FeedItems), 1);

        let report = sweeper.sweep(MAX_RETENTION_DAYS).await;
        assert!(report.is_complete());
    }
}
