// src/orchestrator.rs
//! Wires the components together and owns the scheduler.
//!
//! Every collaborator is passed in explicitly. `from_config` builds the
//! production set (PostgREST store, Consul registry, HTTP extractor); tests
//! call `new` with in-memory fakes.

use std::sync::Arc;

use anyhow::Context;

use crate::batch::BatchProcessor;
use crate::config::OrchestratorConfig;
use crate::error::SchedulerError;
use crate::extract::{ContentExtractor, HttpExtractor};
use crate::health::HealthProbe;
use crate::jobs::{
    CleanupJob, DiscoveryRefreshJob, HealthCheckJob, ProcessFeedsJob, CLEANUP_OLD_ITEMS,
    HEALTH_CHECK, PROCESS_FEEDS, SERVICE_DISCOVERY_REFRESH,
};
use crate::locator::{ConsulRegistry, Service, ServiceLocator, ServiceRegistry};
use crate::retention::RetentionSweeper;
use crate::scheduler::{Job, Scheduler, Trigger};
use crate::store::{PostgrestStore, Repository, TableStore};

pub struct Orchestrator {
    config: OrchestratorConfig,
    scheduler: Scheduler,
    locator: Arc<ServiceLocator>,
    batch: BatchProcessor,
    probe: HealthProbe,
    sweeper: RetentionSweeper,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn TableStore>,
        registry: Arc<dyn ServiceRegistry>,
        extractor: Arc<dyn ContentExtractor>,
    ) -> Result<Self, SchedulerError> {
        let repo = Repository::new(store);
        let locator = Arc::new(ServiceLocator::new(
            registry,
            [
                (Service::FeedParser, config.feed_parser_fallback_url.clone()),
                (Service::WebApi, config.web_api_fallback_url.clone()),
            ],
            config.probe_timeout(),
        ));
        let batch = BatchProcessor::new(
            repo.clone(),
            Arc::clone(&extractor),
            Arc::clone(&locator),
            config.max_concurrent_feeds,
        );
        let probe = HealthProbe::new(
            extractor,
            Arc::clone(&locator),
            repo.clone(),
            config.probe_timeout(),
        );
        let sweeper = RetentionSweeper::new(repo);

        let mut scheduler = Scheduler::new(config.shutdown_drain());
        scheduler.register(
            Job::new(
                PROCESS_FEEDS,
                Trigger::every_minutes(config.update_interval_minutes)?,
                ProcessFeedsJob {
                    batch: batch.clone(),
                },
            )
            .named("Process RSS Feeds")
            .coalesce(true),
        )?;
        scheduler.register(
            Job::new(
                HEALTH_CHECK,
                Trigger::every_minutes(config.health_interval_minutes)?,
                HealthCheckJob {
                    probe: probe.clone(),
                },
            )
            .named("Health Check"),
        )?;
        scheduler.register(
            Job::new(
                CLEANUP_OLD_ITEMS,
                Trigger::daily_at(config.cleanup_hour, config.cleanup_minute)?,
                CleanupJob {
                    sweeper: sweeper.clone(),
                    retention_days: config.retention_days,
                },
            )
            .named("Cleanup Old Items"),
        )?;
        scheduler.register(
            Job::new(
                SERVICE_DISCOVERY_REFRESH,
                Trigger::every_minutes(config.discovery_interval_minutes)?,
                DiscoveryRefreshJob {
                    locator: Arc::clone(&locator),
                },
            )
            .named("Refresh Service Discovery"),
        )?;

        Ok(Self {
            config,
            scheduler,
            locator,
            batch,
            probe,
            sweeper,
        })
    }

    /// Production wiring. Fails fast on missing store credentials.
    pub fn from_config(config: OrchestratorConfig) -> anyhow::Result<Self> {
        let (url, key) = config.store_credentials()?;
        let store = PostgrestStore::new(url, key, config.store_timeout())
            .context("building store client")?;
        let registry = ConsulRegistry::new(
            &config.registry_host,
            config.registry_port,
            config.probe_timeout(),
        )
        .context("building registry client")?;
        let extractor = HttpExtractor::new(config.parse_timeout(), config.probe_timeout())?;

        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(registry),
            Arc::new(extractor),
        )?)
    }

    /// Resolves every service once, then starts the job drivers.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        tracing::info!(target: "scheduler", "starting feed scheduler");
        for (service, url) in self.locator.refresh_all().await {
            tracing::info!(target: "locator", %service, %url, "initial endpoint");
        }
        self.scheduler.start()?;
        tracing::info!(
            target: "scheduler",
            interval_minutes = self.config.update_interval_minutes,
            max_concurrent_feeds = self.batch.max_concurrent(),
            "feed scheduler started"
        );
        Ok(())
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
        tracing::info!(target: "scheduler", "feed scheduler stopped");
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn locator(&self) -> &Arc<ServiceLocator> {
        &self.locator
    }

    pub fn batch(&self) -> &BatchProcessor {
        &self.batch
    }

    pub fn probe(&self) -> &HealthProbe {
        &self.probe
    }

    pub fn sweeper(&self) -> &RetentionSweeper {
        &self.sweeper
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ScriptedExtractor;
    use crate::locator::StaticRegistry;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn orchestrator(config: OrchestratorConfig) -> Result<Orchestrator, SchedulerError> {
        Orchestrator::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(StaticRegistry::new()),
            Arc::new(ScriptedExtractor::new()),
        )
    }

    #[test]
    fn registers_the_four_jobs() {
        let o = orchestrator(OrchestratorConfig::default()).unwrap();
        assert_eq!(
            o.scheduler().job_ids(),
            vec![
                PROCESS_FEEDS.to_string(),
                HEALTH_CHECK.to_string(),
                CLEANUP_OLD_ITEMS.to_string(),
                SERVICE_DISCOVERY_REFRESH.to_string(),
            ]
        );
        let feeds = o.scheduler().status(PROCESS_FEEDS).unwrap();
        assert!(feeds.coalesce);
        assert_eq!(feeds.trigger, "every 15m");
        assert_eq!(
            o.scheduler().status(CLEANUP_OLD_ITEMS).unwrap().trigger,
            "daily at 02:00"
        );
    }

    #[test]
    fn health_probe_uses_probe_budget_not_store_budget() {
        let config = OrchestratorConfig {
            probe_timeout_secs: 5,
            store_timeout_secs: 10,
            ..OrchestratorConfig::default()
        };
        let o = orchestrator(config).unwrap();
        assert_eq!(o.probe().probe_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = OrchestratorConfig {
            update_interval_minutes: 0,
            ..OrchestratorConfig::default()
        };
        assert!(matches!(
            orchestrator(config),
            Err(SchedulerError::InvalidTrigger(_))
        ));
    }

    #[test]
    fn from_config_requires_store_credentials() {
        let err = Orchestrator::from_config(OrchestratorConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("SUPABASE_URL"));
    }

    #[tokio::test]
    async fn start_resolves_endpoints_before_scheduling() {
        let registry = Arc::new(StaticRegistry::new());
        registry.set_instances("feed-parser", vec![("10.0.0.7", 8001)]);
        let o = Orchestrator::new(
            OrchestratorConfig::default(),
            Arc::new(MemoryStore::new()),
            registry,
            Arc::new(ScriptedExtractor::new()),
        )
        .unwrap();

        o.start().await.unwrap();
        assert_eq!(o.locator().current(Service::FeedParser), "http://10.0.0.7:8001");
        assert_eq!(o.locator().current(Service::WebApi), "http://localhost:8002");
        assert!(o.scheduler().is_running());
        o.stop().await;
        assert!(!o.scheduler().is_running());
    }
}
