//! Types for the engine module.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::job::{ErrorKind, JobId, ProfileError};

/// Error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine was never started or has been shut down.
    #[error("Engine is not running")]
    NotRunning,

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// The output profile cannot be executed.
    #[error("Unsupported output profile: {0}")]
    UnsupportedFormat(#[from] ProfileError),

    /// Only terminal jobs can be evicted.
    #[error("Job {0} has not finished")]
    JobActive(JobId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Classification for errors that describe a request rather than the
    /// engine's own state.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::JobNotFound(_) => Some(ErrorKind::NotFound),
            Self::UnsupportedFormat(_) => Some(ErrorKind::UnsupportedFormat),
            Self::Io(_) => Some(ErrorKind::Io),
            Self::NotRunning | Self::JobActive(_) => None,
        }
    }
}

/// Answer to a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelAck {
    /// The job will stop; watch its events for the Cancelled outcome.
    Requested,
    /// The job had already reached a terminal state.
    AlreadyFinished,
}

/// Status of the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Number of workers, i.e. the concurrency limit.
    pub workers: usize,
    /// Jobs currently held by a worker.
    pub active: usize,
    /// Jobs waiting for a worker.
    pub queued: usize,
    /// Jobs completed since startup.
    pub processed: u64,
    /// Jobs failed since startup.
    pub failed: u64,
    /// Jobs cancelled since startup.
    pub cancelled: u64,
}

/// Tracks statistics for the worker pool.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    pub(crate) active: AtomicU64,
    pub(crate) total_processed: AtomicU64,
    pub(crate) total_failed: AtomicU64,
    pub(crate) total_cancelled: AtomicU64,
}

impl PoolStats {
    pub(crate) fn to_status(&self, workers: usize, queued: usize) -> PoolStatus {
        PoolStatus {
            workers,
            active: self.active.load(Ordering::Relaxed) as usize,
            queued,
            processed: self.total_processed.load(Ordering::Relaxed),
            failed: self.total_failed.load(Ordering::Relaxed),
            cancelled: self.total_cancelled.load(Ordering::Relaxed),
        }
    }
}
