// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod batch;
pub mod config;
pub mod error;
pub mod extract;
pub mod health;
pub mod jobs;
pub mod locator;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod recorder;
pub mod retention;
pub mod scheduler;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, OpsState};
pub use crate::batch::{BatchProcessor, BatchReport, FeedOutcome};
pub use crate::config::OrchestratorConfig;
pub use crate::orchestrator::Orchestrator;
pub use crate::scheduler::{Job, JobBody, JobStatus, Scheduler, Trigger};
