use anyhow::Context;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "feeds_processed_total",
            "Feeds processed, labelled by status."
        );
        describe_counter!(
            "feed_failures_total",
            "Failed feeds, labelled by failure kind."
        );
        describe_histogram!(
            "feed_processing_ms",
            "Per-feed processing time in milliseconds."
        );
        describe_counter!("batch_runs_total", "Completed batch runs.");
        describe_gauge!("batch_last_run_ts", "Unix ts when the last batch finished.");
        describe_counter!("scheduler_runs_total", "Job runs started, by job.");
        describe_counter!(
            "scheduler_runs_skipped_total",
            "Firings dropped because the job was still running."
        );
        describe_counter!(
            "scheduler_job_failures_total",
            "Job runs that returned an error or panicked."
        );
        describe_counter!(
            "locator_fallbacks_total",
            "Resolutions that used the static fallback URL."
        );
        describe_counter!(
            "retention_deleted_total",
            "Rows removed by the retention sweep, by collection."
        );
        describe_counter!(
            "telemetry_write_failures_total",
            "Processing log writes that failed."
        );
        describe_counter!(
            "health_probe_failures_total",
            "Failed health probes, by target."
        );
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder for this process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}
