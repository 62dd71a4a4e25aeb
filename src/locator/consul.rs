// src/locator/consul.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::ServiceRegistry;
use crate::error::RegistryError;
use crate::model::ServiceEndpoint;

/// Consul health API: `GET /v1/health/service/<name>?passing=true`.
pub struct ConsulRegistry {
    base: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Node")]
    node: Option<NodeInfo>,
    #[serde(rename = "Service")]
    service: ServiceInfo,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(rename = "Address", default)]
    address: String,
}

#[derive(Debug, Deserialize)]
struct ServiceInfo {
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

impl ConsulRegistry {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base: format!("http://{host}:{port}"),
            client,
        })
    }

    /// Point at an explicit base URL (e.g. `http://127.0.0.1:8500`).
    pub fn with_base_url(base: &str, timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn healthy_instances(&self, service: &str) -> Result<Vec<ServiceEndpoint>, RegistryError> {
        let url = format!("{}/v1/health/service/{}", self.base, service);
        let resp = self
            .client
            .get(&url)
            .query(&[("passing", "true")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RegistryError::Unavailable(format!(
                "consul returned HTTP {status}"
            )));
        }

        let entries: Vec<HealthEntry> = resp.json().await?;
        Ok(entries
            .into_iter()
            .map(|e| {
                // Consul leaves Service.Address empty when the service
                // shares the node's address.
                let address = if e.service.address.is_empty() {
                    e.node.map(|n| n.address).unwrap_or_default()
                } else {
                    e.service.address
                };
                ServiceEndpoint {
                    service_name: service.to_string(),
                    address,
                    port: e.service.port,
                }
            })
            .filter(|ep| !ep.address.is_empty())
            .collect())
    }
}
