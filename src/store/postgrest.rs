// src/store/postgrest.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use super::{Collection, Filter, Row, TableStore};
use crate::error::StoreError;

/// `TableStore` over the PostgREST API exposed by Supabase (`/rest/v1/<table>`).
pub struct PostgrestStore {
    base: String,
    client: Client,
}

impl PostgrestStore {
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(service_key)
            .map_err(|e| StoreError::Request(format!("invalid service key: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {service_key}"))
            .map_err(|e| StoreError::Request(format!("invalid service key: {e}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .user_agent(concat!("feed-scheduler/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .map_err(StoreError::from)?;

        Ok(Self {
            base: format!("{}/rest/v1", base_url.trim_end_matches('/')),
            client,
        })
    }

    fn url(&self, collection: Collection) -> String {
        format!("{}/{}", self.base, collection.table())
    }

    fn with_filter(req: RequestBuilder, filter: &Filter) -> RequestBuilder {
        match filter {
            Filter::All => req,
            Filter::Eq(field, v) => req.query(&[(field.as_str(), format!("eq.{}", literal(v)))]),
            Filter::Lt(field, v) => req.query(&[(field.as_str(), format!("lt.{}", literal(v)))]),
        }
    }
}

fn literal(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

async fn check(resp: Response) -> Result<Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Status {
        status: status.as_u16(),
        body,
    })
}

/// PostgREST reports affected rows as `Content-Range: */<n>` when
/// `Prefer: count=exact` is set.
pub(crate) fn affected_rows(headers: &HeaderMap) -> u64 {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.rsplit('/').next())
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl TableStore for PostgrestStore {
    async fn select(
        &self,
        collection: Collection,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, StoreError> {
        let mut req = self
            .client
            .get(self.url(collection))
            .query(&[("select", "*")]);
        req = Self::with_filter(req, filter);
        if let Some(n) = limit {
            req = req.query(&[("limit", n.to_string())]);
        }
        let resp = check(req.send().await?).await?;
        resp.json::<Vec<Row>>().await.map_err(|e| StoreError::Decode {
            collection: collection.table(),
            reason: e.to_string(),
        })
    }

    async fn upsert(
        &self,
        collection: Collection,
        rows: Vec<Row>,
        conflict_key: &[&str],
    ) -> Result<usize, StoreError> {
        let written = rows.len();
        let resp = self
            .client
            .post(self.url(collection))
            .query(&[("on_conflict", conflict_key.join(","))])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows)
            .send()
            .await?;
        check(resp).await?;
        Ok(written)
    }

    async fn update(
        &self,
        collection: Collection,
        filter: &Filter,
        patch: Row,
    ) -> Result<u64, StoreError> {
        let req = self
            .client
            .patch(self.url(collection))
            .header("Prefer", "return=minimal,count=exact")
            .json(&patch);
        let resp = check(Self::with_filter(req, filter).send().await?).await?;
        Ok(affected_rows(resp.headers()))
    }

    async fn delete(&self, collection: Collection, filter: &Filter) -> Result<u64, StoreError> {
        let req = self
            .client
            .delete(self.url(collection))
            .header("Prefer", "return=minimal,count=exact");
        let resp = check(Self::with_filter(req, filter).send().await?).await?;
        Ok(affected_rows(resp.headers()))
    }

    async fn insert(&self, collection: Collection, row: Row) -> Result<(), StoreError> {
        let resp = self
            .client
            .post(self.url(collection))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }
}
