// src/health.rs
//! Periodic liveness probe of the feed parser and the store.
//!
//! Probe failures are warnings, not job failures: the health job always
//! completes so the scheduler keeps treating it as healthy.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;

use crate::extract::ContentExtractor;
use crate::locator::{Service, ServiceLocator};
use crate::store::Repository;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ProbeState {
    Up,
    Down { reason: String },
}

impl ProbeState {
    pub fn is_up(&self) -> bool {
        matches!(self, ProbeState::Up)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub feed_parser: ProbeState,
    pub feed_parser_url: String,
    pub store: ProbeState,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn all_up(&self) -> bool {
        self.feed_parser.is_up() && self.store.is_up()
    }
}

#[derive(Clone)]
pub struct HealthProbe {
    extractor: Arc<dyn ContentExtractor>,
    locator: Arc<ServiceLocator>,
    repo: Repository,
    probe_timeout: Duration,
}

impl HealthProbe {
    pub fn new(
        extractor: Arc<dyn ContentExtractor>,
        locator: Arc<ServiceLocator>,
        repo: Repository,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            extractor,
            locator,
            repo,
            probe_timeout,
        }
    }

    /// Budget for the store read.
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Probes both dependencies concurrently and logs any that are down.
    pub async fn check(&self) -> HealthReport {
        let url = self.locator.current(Service::FeedParser);

        let parser = async {
            match self.extractor.health(&url).await {
                Ok(()) => ProbeState::Up,
                Err(e) => ProbeState::Down {
                    reason: e.to_string(),
                },
            }
        };
        let store = async {
            match tokio::time::timeout(self.probe_timeout, self.repo.ping()).await {
                Ok(Ok(())) => ProbeState::Up,
                Ok(Err(e)) => ProbeState::Down {
                    reason: e.to_string(),
                },
                Err(_) => ProbeState::Down {
                    reason: "timed out".into(),
                },
            }
        };
        let (feed_parser, store) = tokio::join!(parser, store);

        if let ProbeState::Down { reason } = &feed_parser {
            counter!("health_probe_failures_total", "target" => "feed-parser").increment(1);
            tracing::warn!(target: "health", url = %url, %reason, "feed parser service health check failed");
        }
        if let ProbeState::Down { reason } = &store {
            counter!("health_probe_failures_total", "target" => "store").increment(1);
            tracing::warn!(target: "health", %reason, "database health check failed");
        }
        if feed_parser.is_up() && store.is_up() {
            tracing::debug!(target: "health", "health check passed");
        }

        HealthReport {
            feed_parser,
            feed_parser_url: url,
            store,
            checked_at: Utc::now(),
        }
    }
}
