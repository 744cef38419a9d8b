//! Download engine: the job state machine and its worker pool.
//!
//! A job moves `Queued -> Downloading -> Postprocessing -> [EmbeddingCover]
//! -> Completed`, or ends `Cancelled`/`Failed` from any live state. Each
//! worker owns one job at a time, so `max_concurrent_jobs` bounds how many
//! fetches and transcodes run at once.

mod config;
mod download;
mod progress;
mod retry;
mod runner;
mod types;

pub use config::{EngineConfig, RetryConfig};
pub use download::DownloadEngine;
pub use progress::ProgressTracker;
pub use types::{CancelAck, EngineError, PoolStatus};
