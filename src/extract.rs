// src/extract.rs
//! Client for the content-extraction (feed parser) service.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::ExtractError;
use crate::model::FeedItem;

/// Body of `POST /parse`.
#[derive(Debug, Serialize)]
struct ParseRequest<'a> {
    url: &'a str,
}

/// Response of `POST /parse`. Only `items` is required.
#[derive(Debug, Clone, Deserialize)]
pub struct ParseResponse {
    pub items: Vec<ParsedItem>,
    #[serde(default)]
    pub feed_title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub media_urls: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ParsedItem {
    pub fn with_link(link: &str) -> Self {
        Self {
            title: link.to_string(),
            link: link.to_string(),
            ..Self::default()
        }
    }
}

/// Accepts RFC 3339, naive ISO timestamps (read as UTC) and RFC 2822.
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|n| n.and_utc())
        })
        .or_else(|| {
            DateTime::parse_from_rfc2822(raw)
                .map(|d| d.with_timezone(&Utc))
                .ok()
        })
}

/// Turns parser output into storable items for `feed_id`.
///
/// Items without a link are dropped, a link repeated within one response
/// keeps its first position but the last payload, and tags are de-duplicated
/// in first-seen order. Returns the items and the number dropped.
pub fn normalize_items(
    feed_id: &str,
    parsed: Vec<ParsedItem>,
    now: DateTime<Utc>,
) -> (Vec<FeedItem>, usize) {
    let mut out: Vec<FeedItem> = Vec::with_capacity(parsed.len());
    let mut by_link: HashMap<String, usize> = HashMap::new();
    let mut dropped = 0usize;

    for it in parsed {
        let link = it.link.trim().to_string();
        if link.is_empty() {
            dropped += 1;
            continue;
        }

        let mut seen = HashSet::new();
        let tags = it
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();

        let item = FeedItem {
            feed_id: feed_id.to_string(),
            title: it.title,
            description: it.description,
            link: link.clone(),
            published: it.published.as_deref().and_then(parse_published),
            author: it.author,
            content: it.content,
            images: it.images,
            media_urls: it.media_urls,
            tags,
            created_at: now,
        };

        match by_link.get(&link) {
            Some(&idx) => {
                out[idx] = item;
                dropped += 1;
            }
            None => {
                by_link.insert(link, out.len());
                out.push(item);
            }
        }
    }

    (out, dropped)
}

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// `POST {endpoint}/parse` for one feed URL.
    async fn parse(&self, endpoint: &str, feed_url: &str) -> Result<ParseResponse, ExtractError>;

    /// `GET {endpoint}/health`; `Ok` only on 200.
    async fn health(&self, endpoint: &str) -> Result<(), ExtractError>;
}

pub struct HttpExtractor {
    client: Client,
    parse_timeout: Duration,
    probe_timeout: Duration,
}

impl HttpExtractor {
    pub fn new(parse_timeout: Duration, probe_timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("feed-scheduler/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(probe_timeout)
            .build()
            .context("building feed parser http client")?;
        Ok(Self {
            client,
            parse_timeout,
            probe_timeout,
        })
    }
}

fn join(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}

#[async_trait]
impl ContentExtractor for HttpExtractor {
    async fn parse(&self, endpoint: &str, feed_url: &str) -> Result<ParseResponse, ExtractError> {
        let resp = self
            .client
            .post(join(endpoint, "/parse"))
            .timeout(self.parse_timeout)
            .json(&ParseRequest { url: feed_url })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractError::Status(status.as_u16()));
        }

        let body = resp.bytes().await?;
        serde_json::from_slice::<ParseResponse>(&body).map_err(|e| ExtractError::Decode(e.to_string()))
    }

    async fn health(&self, endpoint: &str) -> Result<(), ExtractError> {
        let resp = self
            .client
            .get(join(endpoint, "/health"))
            .timeout(self.probe_timeout)
            .send()
            .await?;
        match resp.status().as_u16() {
            200 => Ok(()),
            code => Err(ExtractError::Status(code)),
        }
    }
}

// --- Test helper ---

#[derive(Debug, Clone)]
pub enum Script {
    Items(Vec<ParsedItem>),
    Fail(ExtractError),
    /// Panics inside `parse`.
    #[cfg(any(test, feature = "test-util"))]
    Panic,
}

/// Extractor with a scripted answer per feed URL, an optional artificial
/// latency, and in-flight tracking for concurrency assertions.
#[derive(Default)]
pub struct ScriptedExtractor {
    scripts: RwLock<HashMap<String, Script>>,
    latency: RwLock<Duration>,
    healthy: RwLock<bool>,
    endpoints_seen: RwLock<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        let s = Self::default();
        *s.healthy.write() = true;
        s
    }

    pub fn script(&self, feed_url: &str, script: Script) {
        self.scripts.write().insert(feed_url.to_string(), script);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.write() = latency;
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.write() = healthy;
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn endpoints_seen(&self) -> Vec<String> {
        self.endpoints_seen.read().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentExtractor for ScriptedExtractor {
    async fn parse(&self, endpoint: &str, feed_url: &str) -> Result<ParseResponse, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.endpoints_seen.write().push(endpoint.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let script = self.scripts.read().get(feed_url).cloned();
        match script {
            Some(Script::Items(items)) => Ok(ParseResponse {
                items,
                feed_title: None,
            }),
            Some(Script::Fail(e)) => Err(e),
            #[cfg(any(test, feature = "test-util"))]
            Some(Script::Panic) => panic!("scripted extractor panic for {feed_url}"),
            None => Ok(ParseResponse {
                items: Vec::new(),
                feed_title: None,
            }),
        }
    }

    async fn health(&self, endpoint: &str) -> Result<(), ExtractError> {
        self.endpoints_seen.write().push(endpoint.to_string());
        if *self.healthy.read() {
            Ok(())
        } else {
            Err(ExtractError::Status(503))
        }
    }
}
