// tests/retention.rs
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;

use feed_scheduler::jobs::CleanupJob;
use feed_scheduler::retention::RetentionSweeper;
use feed_scheduler::scheduler::JobBody;
use feed_scheduler::store::{Collection, MemoryStore, Repository, Row};

fn aged(id: &str, days_old: i64) -> Row {
    let created = Utc::now() - Duration::days(days_old);
    json!({ "id": id, "feed_id": "f1", "link": format!("https://news.test/{id}"), "created_at": created.to_rfc3339() })
        .as_object()
        .cloned()
        .unwrap()
}

fn ids(store: &MemoryStore, c: Collection) -> Vec<String> {
    store
        .rows(c)
        .into_iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn sweep_deletes_only_rows_past_the_horizon() {
    let store = Arc::new(MemoryStore::new());
    store.seed(Collection::FeedItems, [aged("old", 91), aged("recent", 89)]);
    store.seed(
        Collection::ProcessingLogs,
        [aged("log-old", 120), aged("log-new", 1)],
    );
    store.seed(Collection::BatchLogs, [aged("batch-old", 95)]);

    let sweeper = RetentionSweeper::new(Repository::new(store.clone()));
    let report = sweeper.sweep(90).await;

    assert!(report.is_complete());
    assert_eq!(report.deleted_from(Collection::FeedItems), Some(1));
    assert_eq!(report.deleted_from(Collection::ProcessingLogs), Some(1));
    assert_eq!(report.deleted_from(Collection::BatchLogs), Some(1));
    assert_eq!(ids(&store, Collection::FeedItems), vec!["recent"]);
    assert_eq!(ids(&store, Collection::ProcessingLogs), vec!["log-new"]);
    assert!(store.is_empty(Collection::BatchLogs));
}

#[tokio::test]
async fn partial_failure_continues_and_next_sweep_finishes() {
    let store = Arc::new(MemoryStore::new());
    store.seed(Collection::FeedItems, [aged("old", 200)]);
    store.seed(Collection::ProcessingLogs, [aged("log-old", 200)]);
    store.fail_writes(Collection::FeedItems, true);

    let sweeper = RetentionSweeper::new(Repository::new(store.clone()));
    let first = sweeper.sweep(90).await;
    assert!(!first.is_complete());
    assert_eq!(first.failed.len(), 1);
    assert_eq!(first.failed[0].0, Collection::FeedItems);
    assert_eq!(first.deleted_from(Collection::ProcessingLogs), Some(1));
    assert_eq!(store.len(Collection::FeedItems), 1);

    store.fail_writes(Collection::FeedItems, false);
    let second = sweeper.sweep(90).await;
    assert!(second.is_complete());
    assert_eq!(second.deleted_from(Collection::FeedItems), Some(1));
    assert!(store.is_empty(Collection::FeedItems));
}

#[tokio::test]
async fn cleanup_job_reports_incomplete_sweep() {
    let store = Arc::new(MemoryStore::new());
    store.fail_writes(Collection::ProcessingLogs, true);
    let job = CleanupJob {
        sweeper: RetentionSweeper::new(Repository::new(store.clone())),
        retention_days: 30,
    };
    let err = job.run().await.unwrap_err();
    assert!(err.to_string().contains("feed_processing_logs"));

    store.fail_writes(Collection::ProcessingLogs, false);
    job.run().await.unwrap();
}
