// src/error.rs
//! Error taxonomy shared by the orchestrator components.
//!
//! Every failure is contained at the smallest boundary that can absorb it:
//! registry errors degrade to a fallback URL, extractor and store errors are
//! classified per feed, and job-level errors are logged by the scheduler.

use thiserror::Error;

use crate::model::FailureKind;

/// Storage collaborator failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request timed out")]
    Timeout,

    #[error("store request failed: {0}")]
    Request(String),

    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not encode row for {collection}: {reason}")]
    Encode {
        collection: &'static str,
        reason: String,
    },

    #[error("malformed row in {collection}: {reason}")]
    Decode {
        collection: &'static str,
        reason: String,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Request(e.to_string())
        }
    }
}

/// Service registry failures. Never surfaced to locator callers.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("registry query timed out")]
    Timeout,

    #[error("unexpected registry response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RegistryError::Timeout
        } else if e.is_decode() {
            RegistryError::Decode(e.to_string())
        } else {
            RegistryError::Unavailable(e.to_string())
        }
    }
}

/// Content-extraction service failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Request(String),

    #[error("feed parser returned HTTP {0}")]
    Status(u16),

    #[error("invalid parse response: {0}")]
    Decode(String),
}

impl ExtractError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ExtractError::Timeout => FailureKind::Timeout,
            ExtractError::Request(_) => FailureKind::RequestError,
            ExtractError::Status(_) | ExtractError::Decode(_) => FailureKind::ProcessingError,
        }
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExtractError::Timeout
        } else if e.is_decode() {
            ExtractError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ExtractError::Status(status.as_u16())
        } else {
            ExtractError::Request(e.to_string())
        }
    }
}

/// Why a single feed could not be processed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("storing items failed: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Aborted(String),
}

impl FeedError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FeedError::Extract(e) => e.kind(),
            FeedError::Store(_) | FeedError::Aborted(_) => FailureKind::ProcessingError,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job is already running: {0}")]
    JobAlreadyRunning(String),

    #[error("job id registered twice: {0}")]
    DuplicateJob(String),

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("scheduler already started")]
    AlreadyStarted,

    #[error("scheduler is stopped")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must both be set")]
    MissingStoreCredentials,

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("reading config file {path}: {reason}")]
    File { path: String, reason: String },
}
