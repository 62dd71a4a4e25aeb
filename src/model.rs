// src/model.rs
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_active() -> bool {
    true
}

/// A subscribed feed. Rows are owned by the web API; the orchestrator only
/// reads active feeds and writes `last_updated`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Feed {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// One entry extracted from a feed. Unique per `(feed_id, link)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedItem {
    pub feed_id: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub images: Vec<String>,
    pub media_urls: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Success,
    Error,
}

/// Classification of a failed feed run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Timeout,
    RequestError,
    ProcessingError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RequestError => "request-error",
            FailureKind::ProcessingError => "processing-error",
        }
    }

    /// Human-readable message stored in `ProcessingLogEntry::error_message`.
    pub fn describe(&self, feed_name: &str, detail: &dyn fmt::Display) -> String {
        match self {
            FailureKind::Timeout => format!("Timeout processing feed '{feed_name}'"),
            FailureKind::RequestError => {
                format!("Request error processing feed '{feed_name}': {detail}")
            }
            FailureKind::ProcessingError => {
                format!("Error processing feed '{feed_name}': {detail}")
            }
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record, one per feed per batch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessingLogEntry {
    pub feed_id: String,
    pub status: ProcessingStatus,
    pub items_processed: u64,
    pub error_message: Option<String>,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl ProcessingLogEntry {
    pub fn success(feed_id: &str, items_processed: usize, elapsed: Duration) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            status: ProcessingStatus::Success,
            items_processed: items_processed as u64,
            error_message: None,
            processing_time_ms: millis(elapsed),
            created_at: Utc::now(),
        }
    }

    pub fn failure(feed_id: &str, message: String, elapsed: Duration) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            status: ProcessingStatus::Error,
            items_processed: 0,
            error_message: Some(message),
            processing_time_ms: millis(elapsed),
            created_at: Utc::now(),
        }
    }
}

/// Batch-level statistics, written once per non-empty batch run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub total_feeds: u64,
    pub successful: u64,
    pub failed: u64,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// A healthy service instance reported by the registry. Kept in memory only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub service_name: String,
    pub address: String,
    pub port: u16,
}

impl ServiceEndpoint {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_kinds_serialize_as_kebab_case() {
        let s = serde_json::to_string(&FailureKind::RequestError).unwrap();
        assert_eq!(s, "\"request-error\"");
        assert_eq!(FailureKind::ProcessingError.as_str(), "processing-error");
    }

    #[test]
    fn failure_entries_never_count_items() {
        let e = ProcessingLogEntry::failure("f1", "boom".into(), Duration::from_millis(1500));
        assert_eq!(e.status, ProcessingStatus::Error);
        assert_eq!(e.items_processed, 0);
        assert_eq!(e.processing_time_ms, 1500);
        assert_eq!(e.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn feed_rows_tolerate_missing_optional_columns() {
        let f: Feed =
            serde_json::from_str(r#"{"id":"a","url":"https://example.com/rss"}"#).unwrap();
        assert!(f.active);
        assert!(f.name.is_empty());
        assert!(f.last_updated.is_none());
    }

    #[test]
    fn endpoint_url_uses_plain_http() {
        let ep = ServiceEndpoint {
            service_name: "feed-parser".into(),
            address: "10.0.0.7".into(),
            port: 8001,
        };
        assert_eq!(ep.url(), "http://10.0.0.7:8001");
    }
}
