// src/scheduler/mod.rs
//! Recurring job scheduler.
//!
//! Each registered job gets its own driver task that waits for the job's
//! trigger and launches the body in a separate task. Jobs are single-flight:
//! a slot's `running` flag is claimed with a compare-exchange before launch
//! and released when the body finishes, and a firing that finds the flag set
//! is dropped, not queued.

mod trigger;

pub use trigger::{Trigger, MAX_INTERVAL_MINUTES};

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::SchedulerError;
use crate::metrics::ensure_metrics_described;

/// Body of a scheduled job. Errors are logged by the scheduler; they never
/// stop the job from firing again.
#[async_trait]
pub trait JobBody: Send + Sync {
    async fn run(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> JobBody for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self) -> anyhow::Result<()> {
        (self)().await
    }
}

/// A job definition. At most one run of a given job is in flight.
pub struct Job {
    id: String,
    name: String,
    trigger: Trigger,
    coalesce: bool,
    body: Arc<dyn JobBody>,
}

impl Job {
    pub fn new(id: impl Into<String>, trigger: Trigger, body: impl JobBody + 'static) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            trigger,
            coalesce: false,
            body: Arc::new(body),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Collapse firings missed while the driver lagged into one.
    pub fn coalesce(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub trigger: String,
    pub coalesce: bool,
    pub running: bool,
    pub runs: u64,
    pub skipped: u64,
    pub failures: u64,
    pub last_started: Option<DateTime<Utc>>,
    pub last_finished: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct RunTimes {
    last_started: Option<DateTime<Utc>>,
    last_finished: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct JobSlot {
    job: Job,
    running: AtomicBool,
    idle: Notify,
    runs: AtomicU64,
    skipped: AtomicU64,
    failures: AtomicU64,
    times: Mutex<RunTimes>,
}

impl JobSlot {
    fn new(job: Job) -> Self {
        Self {
            job,
            running: AtomicBool::new(false),
            idle: Notify::new(),
            runs: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            times: Mutex::new(RunTimes::default()),
        }
    }

    fn status(&self) -> JobStatus {
        let times = self.times.lock();
        JobStatus {
            id: self.job.id.clone(),
            name: self.job.name.clone(),
            trigger: self.job.trigger.to_string(),
            coalesce: self.job.coalesce,
            running: self.running.load(Ordering::Acquire),
            runs: self.runs.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_started: times.last_started,
            last_finished: times.last_finished,
            last_error: times.last_error.clone(),
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

/// Clears the running flag even if the run task unwinds.
struct RunGuard(Arc<JobSlot>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
        self.0.idle.notify_waiters();
    }
}

/// Claims the slot and spawns one run. `false` when a run is already active.
fn launch(slot: &Arc<JobSlot>) -> bool {
    let id = slot.job.id.as_str();
    if slot
        .running
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        slot.skipped.fetch_add(1, Ordering::Relaxed);
        counter!("scheduler_runs_skipped_total", "job" => id.to_string()).increment(1);
        tracing::debug!(target: "scheduler", job = id, "job is still running, skipping this firing");
        return false;
    }

    slot.runs.fetch_add(1, Ordering::Relaxed);
    slot.times.lock().last_started = Some(Utc::now());
    counter!("scheduler_runs_total", "job" => id.to_string()).increment(1);

    let guard = RunGuard(Arc::clone(slot));
    tokio::spawn(async move {
        let slot = Arc::clone(&guard.0);
        let id = slot.job.id.clone();
        let body = Arc::clone(&slot.job.body);
        tracing::debug!(target: "scheduler", job = %id, "job started");

        // Run the body in its own task so a panic surfaces as a JoinError
        // instead of taking the guard down with it.
        let outcome = tokio::spawn(async move { body.run().await }).await;
        let error = match outcome {
            Ok(Ok(())) => {
                tracing::debug!(target: "scheduler", job = %id, "job completed successfully");
                None
            }
            Ok(Err(e)) => {
                let msg = format!("{e:#}");
                tracing::error!(target: "scheduler", job = %id, error = %msg, "job failed");
                Some(msg)
            }
            Err(join) => {
                tracing::error!(target: "scheduler", job = %id, error = %join, "job panicked");
                Some(format!("panicked: {join}"))
            }
        };

        if error.is_some() {
            slot.failures.fetch_add(1, Ordering::Relaxed);
            counter!("scheduler_job_failures_total", "job" => id.clone()).increment(1);
        }
        {
            let mut times = slot.times.lock();
            times.last_finished = Some(Utc::now());
            times.last_error = error;
        }
        drop(guard);
    });
    true
}

/// Wall-clock source for daily triggers.
pub type WallClock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

/// Drives registered jobs. Lifecycle: `new → register* → start → stop`.
pub struct Scheduler {
    slots: Vec<Arc<JobSlot>>,
    shutdown: watch::Sender<bool>,
    drivers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    drain_timeout: Duration,
    clock: WallClock,
}

impl Scheduler {
    pub fn new(drain_timeout: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            slots: Vec::new(),
            shutdown,
            drivers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            drain_timeout,
            clock: Arc::new(Local::now),
        }
    }

    /// Replaces the wall clock daily triggers are computed against.
    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn register(&mut self, job: Job) -> Result<(), SchedulerError> {
        if self.started.load(Ordering::Acquire) {
            return Err(SchedulerError::AlreadyStarted);
        }
        if self.slots.iter().any(|s| s.job.id == job.id) {
            return Err(SchedulerError::DuplicateJob(job.id));
        }
        self.slots.push(Arc::new(JobSlot::new(job)));
        Ok(())
    }

    pub fn job_ids(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.job.id.clone()).collect()
    }

    /// Spawns one driver per job. Must be called inside a Tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SchedulerError::Stopped);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyStarted);
        }
        ensure_metrics_described();

        let mut drivers = self.drivers.lock();
        for slot in &self.slots {
            let slot = Arc::clone(slot);
            let shutdown = self.shutdown.subscribe();
            let clock = Arc::clone(&self.clock);
            drivers.push(tokio::spawn(drive(slot, shutdown, clock)));
        }
        tracing::info!(target: "scheduler", jobs = self.slots.len(), "scheduler started");
        Ok(())
    }

    /// Stops all drivers, then waits up to the drain budget for in-flight
    /// runs. Runs still active after that are left to finish on their own.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(target: "scheduler", "stopping scheduler");
        self.shutdown.send_replace(true);

        let drivers: Vec<_> = std::mem::take(&mut *self.drivers.lock());
        for d in drivers {
            if let Err(e) = d.await {
                tracing::error!(target: "scheduler", error = %e, "job driver ended abnormally");
            }
        }

        let busy: Vec<_> = self
            .slots
            .iter()
            .filter(|s| s.running.load(Ordering::Acquire))
            .cloned()
            .collect();
        if busy.is_empty() {
            return;
        }
        tracing::info!(target: "scheduler", in_flight = busy.len(), "waiting for in-flight jobs");
        let drain = futures::future::join_all(busy.iter().map(|s| s.wait_idle()));
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            tracing::warn!(
                target: "scheduler",
                drain_secs = self.drain_timeout.as_secs(),
                "in-flight jobs still running after drain budget; leaving them to finish"
            );
        }
    }

    /// Runs a job now under the same single-flight rule as scheduled firings.
    pub fn trigger(&self, job_id: &str) -> Result<(), SchedulerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SchedulerError::Stopped);
        }
        let slot = self
            .slots
            .iter()
            .find(|s| s.job.id == job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
        if launch(slot) {
            tracing::info!(target: "scheduler", job = job_id, "job triggered manually");
            Ok(())
        } else {
            Err(SchedulerError::JobAlreadyRunning(job_id.to_string()))
        }
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.slots
            .iter()
            .find(|s| s.job.id == job_id)
            .map(|s| s.status())
    }

    pub fn statuses(&self) -> Vec<JobStatus> {
        self.slots.iter().map(|s| s.status()).collect()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire)
    }
}

async fn drive(slot: Arc<JobSlot>, mut shutdown: watch::Receiver<bool>, clock: WallClock) {
    let id = slot.job.id.clone();
    tracing::debug!(target: "scheduler", job = %id, trigger = %slot.job.trigger, "job driver started");

    match slot.job.trigger {
        Trigger::Interval(period) => {
            let Some(first) = Instant::now().checked_add(period) else {
                let msg = format!("interval of {}s is out of range", period.as_secs());
                tracing::error!(target: "scheduler", job = %id, error = %msg, "job driver exiting");
                slot.times.lock().last_error = Some(msg);
                return;
            };
            let mut ticker = tokio::time::interval_at(first, period);
            ticker.set_missed_tick_behavior(if slot.job.coalesce {
                MissedTickBehavior::Skip
            } else {
                MissedTickBehavior::Burst
            });
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => { launch(&slot); }
                }
            }
        }
        Trigger::Daily { hour, minute } => loop {
            let now = clock();
            let Some(next) = Trigger::next_daily_after(&now, hour, minute) else {
                tracing::error!(target: "scheduler", job = %id, "no next fire time; driver exiting");
                slot.times.lock().last_error = Some("no next fire time".into());
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(target: "scheduler", job = %id, next = %next, "next daily fire");
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(wait) => { launch(&slot); }
            }
        },
    }

    tracing::info!(target: "scheduler", job = %id, "job driver stopped");
}
