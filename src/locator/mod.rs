// src/locator/mod.rs
//! Service location with graceful degradation.
//!
//! `ServiceLocator::resolve` asks the registry for healthy instances, takes
//! the first one in registry order, and falls back to a static URL when the
//! registry has nothing or cannot be reached. The last answer is cached so
//! the batch processor can read it without touching the network.

pub mod consul;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::RegistryError;
use crate::model::ServiceEndpoint;

pub use consul::ConsulRegistry;

/// Downstream services the orchestrator locates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Service {
    FeedParser,
    WebApi,
}

impl Service {
    pub const ALL: [Service; 2] = [Service::FeedParser, Service::WebApi];

    pub fn registry_name(&self) -> &'static str {
        match self {
            Service::FeedParser => "feed-parser",
            Service::WebApi => "web-api",
        }
    }

    pub fn default_fallback(&self) -> &'static str {
        match self {
            Service::FeedParser => "http://localhost:8001",
            Service::WebApi => "http://localhost:8002",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.registry_name())
    }
}

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Healthy instances of `service`, in registry order.
    async fn healthy_instances(&self, service: &str) -> Result<Vec<ServiceEndpoint>, RegistryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointSource {
    Registry,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedEndpoint {
    pub url: String,
    pub source: EndpointSource,
    pub resolved_at: DateTime<Utc>,
}

pub struct ServiceLocator {
    registry: Arc<dyn ServiceRegistry>,
    fallbacks: HashMap<Service, String>,
    cache: RwLock<HashMap<Service, ResolvedEndpoint>>,
    query_timeout: Duration,
}

impl ServiceLocator {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        fallbacks: impl IntoIterator<Item = (Service, String)>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            fallbacks: fallbacks.into_iter().collect(),
            cache: RwLock::new(HashMap::new()),
            query_timeout,
        }
    }

    pub fn fallback(&self, service: Service) -> String {
        self.fallbacks
            .get(&service)
            .cloned()
            .unwrap_or_else(|| service.default_fallback().to_string())
    }

    /// Resolves `service` against the registry and overwrites the cache.
    /// Never fails: registry trouble degrades to the static fallback.
    pub async fn resolve(&self, service: Service) -> String {
        let name = service.registry_name();
        let outcome =
            tokio::time::timeout(self.query_timeout, self.registry.healthy_instances(name)).await;

        let resolved = match outcome {
            Ok(Ok(instances)) => match instances.into_iter().next() {
                Some(ep) => {
                    let url = ep.url();
                    tracing::info!(target: "locator", service = name, %url, "discovered service");
                    ResolvedEndpoint {
                        url,
                        source: EndpointSource::Registry,
                        resolved_at: Utc::now(),
                    }
                }
                None => {
                    let ep = self.fallback_endpoint(service);
                    tracing::warn!(
                        target: "locator",
                        service = name,
                        url = %ep.url,
                        "service not found in registry, using fallback"
                    );
                    ep
                }
            },
            Ok(Err(e)) => {
                let ep = self.fallback_endpoint(service);
                tracing::warn!(
                    target: "locator",
                    service = name,
                    error = %e,
                    url = %ep.url,
                    "service discovery failed, using fallback"
                );
                ep
            }
            Err(_) => {
                let ep = self.fallback_endpoint(service);
                tracing::warn!(
                    target: "locator",
                    service = name,
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    url = %ep.url,
                    "service discovery timed out, using fallback"
                );
                ep
            }
        };

        let url = resolved.url.clone();
        self.cache.write().insert(service, resolved);
        url
    }

    /// Re-resolves every known service.
    pub async fn refresh_all(&self) -> Vec<(Service, String)> {
        let mut out = Vec::with_capacity(Service::ALL.len());
        for service in Service::ALL {
            out.push((service, self.resolve(service).await));
        }
        out
    }

    /// Cached URL for `service`, or its fallback when never resolved.
    pub fn current(&self, service: Service) -> String {
        self.cache
            .read()
            .get(&service)
            .map(|ep| ep.url.clone())
            .unwrap_or_else(|| self.fallback(service))
    }

    pub fn snapshot(&self) -> Vec<(Service, ResolvedEndpoint)> {
        let cache = self.cache.read();
        Service::ALL
            .iter()
            .filter_map(|s| cache.get(s).map(|ep| (*s, ep.clone())))
            .collect()
    }

    fn fallback_endpoint(&self, service: Service) -> ResolvedEndpoint {
        counter!("locator_fallbacks_total", "service" => service.registry_name()).increment(1);
        ResolvedEndpoint {
            url: self.fallback(service),
            source: EndpointSource::Fallback,
            resolved_at: Utc::now(),
        }
    }
}

// --- Test helper ---

/// Registry with scripted answers per service name. Unscripted services
/// report zero healthy instances.
#[derive(Default)]
pub struct StaticRegistry {
    answers: RwLock<HashMap<String, Result<Vec<ServiceEndpoint>, String>>>,
    delay: RwLock<Option<Duration>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_instances(&self, service: &str, instances: Vec<(&str, u16)>) {
        let eps = instances
            .into_iter()
            .map(|(address, port)| ServiceEndpoint {
                service_name: service.to_string(),
                address: address.to_string(),
                port,
            })
            .collect();
        self.answers.write().insert(service.to_string(), Ok(eps));
    }

    pub fn set_unavailable(&self, service: &str, reason: &str) {
        self.answers
            .write()
            .insert(service.to_string(), Err(reason.to_string()));
    }

    /// Every query sleeps this long before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.write() = delay;
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn healthy_instances(&self, service: &str) -> Result<Vec<ServiceEndpoint>, RegistryError> {
        let delay = *self.delay.read();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        match self.answers.read().get(service) {
            Some(Ok(eps)) => Ok(eps.clone()),
            Some(Err(reason)) => Err(RegistryError::Unavailable(reason.clone())),
            None => Ok(Vec::new()),
        }
    }
}
