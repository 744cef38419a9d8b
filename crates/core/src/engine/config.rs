//! Configuration for the download engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the job engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of workers, i.e. jobs fetched or transcoded at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Root of the per-job work directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Initial capacity of each job's event log.
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,

    /// Retry configuration for network failures.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound for any delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_concurrent_jobs() -> usize {
    3
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("tonefetch")
}

fn default_event_log_capacity() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1 for the first retry).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Retries with no delay, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            work_dir: default_work_dir(),
            event_log_capacity: default_event_log_capacity(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Sets the number of workers.
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Sets the work directory root.
    pub fn with_work_dir(mut self, dir: PathBuf) -> Self {
        self.work_dir = dir;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.work_dir.ends_with("tonefetch"));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_retry(3), Duration::from_millis(400));
        assert_eq!(retry.delay_for_retry(10), Duration::from_millis(1000));
    }

    #[test]
    fn test_immediate_retry() {
        let retry = RetryConfig::immediate(4);
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.delay_for_retry(3), Duration::ZERO);
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::default()
            .with_max_concurrent_jobs(8)
            .with_work_dir(PathBuf::from("/tmp/work"))
            .with_retry(RetryConfig::immediate(1));
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.work_dir, PathBuf::from("/tmp/work"));
        assert_eq!(config.retry.max_attempts, 1);
    }
}
