// tests/scheduler_single_flight.rs
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;

use feed_scheduler::error::SchedulerError;
use feed_scheduler::scheduler::{Job, Scheduler, Trigger};

#[derive(Default)]
struct Probe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    finished: AtomicUsize,
}

fn slow_job(id: &str, every_minutes: u64, work: Duration, probe: Arc<Probe>) -> Job {
    Job::new(id, Trigger::every_minutes(every_minutes).unwrap(), move || {
        let probe = Arc::clone(&probe);
        async move {
            let now = probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            probe.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(work).await;
            probe.in_flight.fetch_sub(1, Ordering::SeqCst);
            probe.finished.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        }
    })
    .coalesce(true)
}

#[tokio::test(start_paused = true)]
async fn overlapping_firings_are_dropped_not_queued() {
    let probe = Arc::new(Probe::default());
    let mut s = Scheduler::new(Duration::from_secs(300));
    s.register(slow_job("process-feeds", 1, Duration::from_secs(150), probe.clone()))
        .unwrap();
    s.start().unwrap();

    // Fires at 60s (runs to 210s), 120s and 180s are skipped, 240s runs,
    // 300s is skipped again.
    tokio::time::sleep(Duration::from_secs(310)).await;

    let status = s.status("process-feeds").unwrap();
    assert_eq!(status.runs, 2);
    assert_eq!(status.skipped, 3);
    assert!(status.running);
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
    assert_eq!(probe.finished.load(Ordering::SeqCst), 1);

    s.stop().await;
    assert_eq!(probe.finished.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failing_and_panicking_jobs_keep_firing() {
    let mut s = Scheduler::new(Duration::from_secs(5));
    s.register(Job::new("fails", Trigger::every_minutes(1).unwrap(), || async {
        Err::<(), _>(anyhow!("store unreachable"))
    }))
    .unwrap();
    s.register(Job::new("panics", Trigger::every_minutes(1).unwrap(), || async {
        if true {
            panic!("job body blew up");
        }
        anyhow::Ok(())
    }))
    .unwrap();
    let healthy = Arc::new(AtomicUsize::new(0));
    let h = healthy.clone();
    s.register(Job::new("healthy", Trigger::every_minutes(1).unwrap(), move || {
        let h = h.clone();
        async move {
            h.fetch_add(1, Ordering::SeqCst);
            anyhow::Ok(())
        }
    }))
    .unwrap();
    s.start().unwrap();

    tokio::time::sleep(Duration::from_secs(185)).await;

    let fails = s.status("fails").unwrap();
    assert_eq!((fails.runs, fails.failures), (3, 3));
    assert_eq!(fails.last_error.as_deref(), Some("store unreachable"));
    assert!(!fails.running);

    let panics = s.status("panics").unwrap();
    assert_eq!((panics.runs, panics.failures), (3, 3));
    assert!(panics.last_error.unwrap().starts_with("panicked"));

    assert_eq!(healthy.load(Ordering::SeqCst), 3);
    s.stop().await;
}

#[tokio::test(start_paused = true)]
async fn manual_trigger_respects_single_flight() {
    let probe = Arc::new(Probe::default());
    let mut s = Scheduler::new(Duration::from_secs(60));
    s.register(slow_job("cleanup-old-items", 60, Duration::from_secs(20), probe.clone()))
        .unwrap();
    s.start().unwrap();

    s.trigger("cleanup-old-items").unwrap();
    assert_eq!(
        s.trigger("cleanup-old-items"),
        Err(SchedulerError::JobAlreadyRunning("cleanup-old-items".into()))
    );
    assert_eq!(
        s.trigger("nope"),
        Err(SchedulerError::JobNotFound("nope".into()))
    );

    tokio::time::sleep(Duration::from_secs(21)).await;
    assert_eq!(probe.finished.load(Ordering::SeqCst), 1);
    s.trigger("cleanup-old-items").unwrap();

    s.stop().await;
    assert_eq!(probe.finished.load(Ordering::SeqCst), 2);
    assert_eq!(s.status("cleanup-old-items").unwrap().skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn stop_gives_up_after_drain_budget() {
    let done = Arc::new(AtomicBool::new(false));
    let d = done.clone();
    let mut s = Scheduler::new(Duration::from_secs(5));
    s.register(Job::new("long", Trigger::every_minutes(10).unwrap(), move || {
        let d = d.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(100)).await;
            d.store(true, Ordering::SeqCst);
            anyhow::Ok(())
        }
    }))
    .unwrap();
    s.start().unwrap();
    s.trigger("long").unwrap();

    let started = tokio::time::Instant::now();
    s.stop().await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!done.load(Ordering::SeqCst));
    assert!(s.status("long").unwrap().running);

    // The run is left to finish on its own.
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert!(done.load(Ordering::SeqCst));
    assert!(!s.status("long").unwrap().running);
}

#[tokio::test(start_paused = true)]
async fn stopped_scheduler_fires_nothing() {
    let probe = Arc::new(Probe::default());
    let mut s = Scheduler::new(Duration::from_secs(1));
    s.register(slow_job("health-check", 1, Duration::from_secs(1), probe.clone()))
        .unwrap();
    s.start().unwrap();
    s.stop().await;

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(probe.finished.load(Ordering::SeqCst), 0);
    assert_eq!(s.trigger("health-check"), Err(SchedulerError::Stopped));
}
