// src/store/mod.rs
//! Table-like storage contract used by the orchestrator, plus a typed
//! repository on top of it.
//!
//! The orchestrator never sees the storage engine itself: it speaks in
//! collections, filters and JSON rows. `MemoryStore` backs tests and local
//! runs, `PostgrestStore` talks to a Supabase/PostgREST endpoint.

pub mod memory;
pub mod postgrest;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::StoreError;
use crate::model::{BatchSummary, Feed, FeedItem, ProcessingLogEntry};

pub use memory::MemoryStore;
pub use postgrest::PostgrestStore;

pub type Row = serde_json::Map<String, Value>;

/// Conflict key for item upserts.
pub const FEED_ITEM_KEY: &[&str] = &["feed_id", "link"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Collection {
    #[serde(rename = "feeds")]
    Feeds,
    #[serde(rename = "feed_items")]
    FeedItems,
    #[serde(rename = "feed_processing_logs")]
    ProcessingLogs,
    #[serde(rename = "batch_processing_logs")]
    BatchLogs,
}

impl Collection {
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Feeds => "feeds",
            Collection::FeedItems => "feed_items",
            Collection::ProcessingLogs => "feed_processing_logs",
            Collection::BatchLogs => "batch_processing_logs",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    Lt(String, Value),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Lt(field.to_string(), value.into())
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, v) => row.get(field) == Some(v),
            Filter::Lt(field, v) => row.get(field).is_some_and(|have| value_lt(have, v)),
        }
    }
}

/// Ordering used by `Filter::Lt`: numbers numerically, RFC 3339 timestamps
/// chronologically, other strings lexicographically.
pub(crate) fn value_lt(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x < y,
            _ => false,
        },
        (Value::String(x), Value::String(y)) => {
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(x), Ok(y)) => x < y,
                _ => x < y,
            }
        }
        _ => false,
    }
}

/// Minimal contract the orchestrator needs from persistence.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn select(
        &self,
        collection: Collection,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, StoreError>;

    /// Insert-or-replace keyed by `conflict_key`. Returns rows written.
    async fn upsert(
        &self,
        collection: Collection,
        rows: Vec<Row>,
        conflict_key: &[&str],
    ) -> Result<usize, StoreError>;

    async fn update(
        &self,
        collection: Collection,
        filter: &Filter,
        patch: Row,
    ) -> Result<u64, StoreError>;

    async fn delete(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError>;

    async fn insert(&self, collection: Collection, row: Row) -> Result<(), StoreError>;
}

/// Typed access to the collections the orchestrator touches.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn TableStore>,
}

impl Repository {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self { store }
    }

    /// Active feeds only. Rows that fail to decode are skipped with a warning
    /// so one bad row cannot hide the rest of the catalog.
    pub async fn active_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        let rows = self
            .store
            .select(Collection::Feeds, &Filter::eq("active", true), None)
            .await?;
        let mut feeds = Vec::with_capacity(rows.len());
        for row in rows {
            match from_row::<Feed>(Collection::Feeds, row) {
                Ok(feed) if feed.active => feeds.push(feed),
                Ok(_) => {}
                Err(e) => tracing::warn!(target: "store", error = %e, "skipping feed row"),
            }
        }
        Ok(feeds)
    }

    pub async fn feed_by_id(&self, feed_id: &str) -> Result<Option<Feed>, StoreError> {
        let rows = self
            .store
            .select(Collection::Feeds, &Filter::eq("id", feed_id), Some(1))
            .await?;
        rows.into_iter()
            .next()
            .map(|row| from_row(Collection::Feeds, row))
            .transpose()
    }

    pub async fn upsert_items(&self, items: &[FeedItem]) -> Result<usize, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }
        let rows = items
            .iter()
            .map(|it| to_row(Collection::FeedItems, it))
            .collect::<Result<Vec<_>, _>>()?;
        self.store
            .upsert(Collection::FeedItems, rows, FEED_ITEM_KEY)
            .await
    }

    pub async fn touch_feed(&self, feed_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut patch = Row::new();
        patch.insert("last_updated".into(), Value::String(at.to_rfc3339()));
        self.store
            .update(Collection::Feeds, &Filter::eq("id", feed_id), patch)
            .await?;
        Ok(())
    }

    pub async fn insert_log(&self, entry: &ProcessingLogEntry) -> Result<(), StoreError> {
        let row = to_row(Collection::ProcessingLogs, entry)?;
        self.store.insert(Collection::ProcessingLogs, row).await
    }

    pub async fn insert_batch_summary(&self, summary: &BatchSummary) -> Result<(), StoreError> {
        let row = to_row(Collection::BatchLogs, summary)?;
        self.store.insert(Collection::BatchLogs, row).await
    }

    /// Deletes rows whose `created_at` is strictly before `cutoff`.
    pub async fn delete_created_before(
        &self,
        collection: Collection,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        self.store
            .delete(collection, &Filter::lt("created_at", cutoff.to_rfc3339()))
            .await
    }

    /// Trivial read used by the health probe.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store
            .select(Collection::Feeds, &Filter::All, Some(1))
            .await
            .map(|_| ())
    }
}

fn to_row<T: Serialize>(collection: Collection, value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Encode {
            collection: collection.table(),
            reason: format!("expected an object, got {other}"),
        }),
        Err(e) => Err(StoreError::Encode {
            collection: collection.table(),
            reason: e.to_string(),
        }),
    }
}

fn from_row<T: DeserializeOwned>(collection: Collection, row: Row) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| StoreError::Decode {
        collection: collection.table(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn lt_compares_timestamps_chronologically() {
        // Same instant written with different offsets must not compare as strings.
        let earlier = json!("2025-01-01T23:00:00-05:00");
        let later = json!("2025-01-02T03:00:00+00:00");
        assert!(value_lt(&earlier, &later));
        assert!(!value_lt(&later, &earlier));
    }

    #[test]
    fn filters_match_rows() {
        let r = row(json!({"id": "a", "active": true, "n": 3}));
        assert!(Filter::All.matches(&r));
        assert!(Filter::eq("active", true).matches(&r));
        assert!(!Filter::eq("active", false).matches(&r));
        assert!(Filter::lt("n", 4).matches(&r));
        assert!(!Filter::lt("n", 3).matches(&r));
        assert!(!Filter::lt("missing", 10).matches(&r));
    }

    #[test]
    fn table_names_match_schema() {
        assert_eq!(Collection::FeedItems.table(), "feed_items");
        assert_eq!(Collection::ProcessingLogs.table(), "feed_processing_logs");
    }
}
