//! Prometheus metrics for the job engine.
//!
//! Metric definitions are static and known-valid, so construction failures
//! are treated as programming errors.

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

// =============================================================================
// Jobs
// =============================================================================

/// Jobs accepted by `submit`.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("tonefetch_jobs_submitted_total", "Total jobs submitted")
        .expect("valid metric definition")
});

/// Finished jobs by outcome.
pub static JOBS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tonefetch_jobs_total", "Total jobs that reached a terminal state"),
        &["outcome"], // "completed", "degraded", "cancelled", "failed"
    )
    .expect("valid metric definition")
});

/// Jobs currently held by a worker.
pub static JOBS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("tonefetch_jobs_active", "Jobs currently being processed")
        .expect("valid metric definition")
});

// =============================================================================
// Steps
// =============================================================================

/// Resolve + fetch duration in seconds.
pub static FETCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("tonefetch_fetch_duration_seconds", "Duration of resolve and fetch")
            .buckets(vec![1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        &["result"], // "success", "failed", "cancelled"
    )
    .expect("valid metric definition")
});

/// Transcode + embed + placement duration in seconds.
pub static POSTPROCESS_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "tonefetch_postprocess_duration_seconds",
            "Duration of the postprocess pipeline",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["format"],
    )
    .expect("valid metric definition")
});

/// Fetch attempts repeated after a network error.
pub static FETCH_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "tonefetch_fetch_retries_total",
        "Total fetch attempts retried after a network error",
    )
    .expect("valid metric definition")
});

/// Cover embeds that failed and left the job degraded.
pub static COVER_EMBED_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "tonefetch_cover_embed_failures_total",
        "Total cover embeds that failed",
    )
    .expect("valid metric definition")
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_TOTAL.clone()),
        Box::new(JOBS_ACTIVE.clone()),
        Box::new(FETCH_DURATION.clone()),
        Box::new(POSTPROCESS_DURATION.clone()),
        Box::new(FETCH_RETRIES.clone()),
        Box::new(COVER_EMBED_FAILURES.clone()),
    ]
}

/// Registers every core metric in `registry`.
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    for metric in all_metrics() {
        registry.register(metric)?;
    }
    Ok(())
}
