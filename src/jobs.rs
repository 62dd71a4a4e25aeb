// src/jobs.rs
//! The four recurring jobs and their bodies.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use async_trait::async_trait;

use crate::batch::BatchProcessor;
use crate::health::HealthProbe;
use crate::locator::ServiceLocator;
use crate::retention::RetentionSweeper;
use crate::scheduler::JobBody;

pub const PROCESS_FEEDS: &str = "process-feeds";
pub const HEALTH_CHECK: &str = "health-check";
pub const CLEANUP_OLD_ITEMS: &str = "cleanup-old-items";
pub const SERVICE_DISCOVERY_REFRESH: &str = "service-discovery-refresh";

pub struct ProcessFeedsJob {
    pub batch: BatchProcessor,
}

#[async_trait]
impl JobBody for ProcessFeedsJob {
    async fn run(&self) -> anyhow::Result<()> {
        self.batch
            .run_batch()
            .await
            .context("loading active feeds")?;
        Ok(())
    }
}

pub struct HealthCheckJob {
    pub probe: HealthProbe,
}

#[async_trait]
impl JobBody for HealthCheckJob {
    async fn run(&self) -> anyhow::Result<()> {
        // Down dependencies are already logged by the probe.
        self.probe.check().await;
        Ok(())
    }
}

pub struct CleanupJob {
    pub sweeper: RetentionSweeper,
    pub retention_days: u32,
}

#[async_trait]
impl JobBody for CleanupJob {
    async fn run(&self) -> anyhow::Result<()> {
        let report = self.sweeper.sweep(self.retention_days).await;
        if report.is_complete() {
            return Ok(());
        }
        let failed: Vec<String> = report
            .failed
            .iter()
            .map(|(c, reason)| format!("{c}: {reason}"))
            .collect();
        Err(anyhow!("cleanup incomplete ({})", failed.join("; ")))
    }
}

pub struct DiscoveryRefreshJob {
    pub locator: Arc<ServiceLocator>,
}

#[async_trait]
impl JobBody for DiscoveryRefreshJob {
    async fn run(&self) -> anyhow::Result<()> {
        let resolved = self.locator.refresh_all().await;
        for (service, url) in resolved {
            tracing::debug!(target: "locator", %service, %url, "endpoint refreshed");
        }
        Ok(())
    }
}
