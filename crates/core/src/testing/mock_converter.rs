//! Mock converter for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::converter::{
    ConversionResult, Converter, ConverterError, CoverEmbedJob, RetagJob, TranscodeJob,
};

/// A recorded transcode for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedTranscode {
    /// The job that was submitted.
    pub job: TranscodeJob,
    /// Whether the transcode succeeded.
    pub success: bool,
}

/// A recorded cover embed for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedEmbed {
    pub job: CoverEmbedJob,
    pub success: bool,
}

/// A recorded retag for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedRetag {
    pub job: RetagJob,
    pub success: bool,
}

/// Counts in-flight calls and remembers the highest count seen.
#[derive(Debug, Default)]
pub(crate) struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub(crate) fn enter(self: &Arc<Self>) -> GaugeGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard {
            gauge: Arc::clone(self),
        }
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Leaves the gauge when dropped, including when the call is cancelled.
pub(crate) struct GaugeGuard {
    gauge: Arc<ConcurrencyGauge>,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.gauge.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock implementation of the Converter trait.
///
/// Provides controllable behavior for testing:
/// - Track transcodes and cover embeds for assertions
/// - Write small fake output files so placement has something to move
/// - Simulate transcode errors and failing cover embeds
/// - Simulate slow conversions and record peak concurrency
///
/// # Example
///
/// ```rust,ignore
/// use tonefetch_core::testing::MockConverter;
///
/// let converter = MockConverter::new();
/// converter.set_fail_embeds(true).await;
///
/// // ... run a job with a custom cover ...
///
/// let embeds = converter.recorded_embeds().await;
/// assert!(!embeds[0].success);
/// ```
#[derive(Debug)]
pub struct MockConverter {
    /// Recorded transcodes.
    transcodes: Arc<RwLock<Vec<RecordedTranscode>>>,
    /// Recorded embeds.
    embeds: Arc<RwLock<Vec<RecordedEmbed>>>,
    /// Recorded retags.
    retags: Arc<RwLock<Vec<RecordedRetag>>>,
    /// If set, the next transcode or retag will fail with this error.
    next_error: Arc<RwLock<Option<ConverterError>>>,
    /// Whether every embed fails.
    fail_embeds: Arc<RwLock<bool>>,
    /// Simulated conversion duration in milliseconds.
    conversion_duration_ms: Arc<RwLock<u64>>,
    /// Overrides the duration for cover embeds.
    embed_duration_ms: Arc<RwLock<Option<u64>>>,
    gauge: Arc<ConcurrencyGauge>,
}

impl Default for MockConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConverter {
    /// Create a new mock converter.
    pub fn new() -> Self {
        Self {
            transcodes: Arc::new(RwLock::new(Vec::new())),
            embeds: Arc::new(RwLock::new(Vec::new())),
            retags: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            fail_embeds: Arc::new(RwLock::new(false)),
            conversion_duration_ms: Arc::new(RwLock::new(0)),
            embed_duration_ms: Arc::new(RwLock::new(None)),
            gauge: Arc::new(ConcurrencyGauge::default()),
        }
    }

    /// Get all recorded transcodes.
    pub async fn recorded_transcodes(&self) -> Vec<RecordedTranscode> {
        self.transcodes.read().await.clone()
    }

    /// Get all recorded cover embeds.
    pub async fn recorded_embeds(&self) -> Vec<RecordedEmbed> {
        self.embeds.read().await.clone()
    }

    /// Get all recorded retags.
    pub async fn recorded_retags(&self) -> Vec<RecordedRetag> {
        self.retags.read().await.clone()
    }

    /// Get the number of transcodes performed.
    pub async fn transcode_count(&self) -> usize {
        self.transcodes.read().await.len()
    }

    /// Configure the next transcode or retag to fail with the given error.
    pub async fn set_next_error(&self, error: ConverterError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make every cover embed fail.
    pub async fn set_fail_embeds(&self, fail: bool) {
        *self.fail_embeds.write().await = fail;
    }

    /// Set the simulated conversion duration.
    pub async fn set_conversion_duration(&self, duration: Duration) {
        *self.conversion_duration_ms.write().await = duration.as_millis() as u64;
    }

    /// Set the simulated cover embed duration, independent of transcodes.
    pub async fn set_embed_duration(&self, duration: Duration) {
        *self.embed_duration_ms.write().await = Some(duration.as_millis() as u64);
    }

    /// Highest number of simultaneous transcodes and embeds seen so far.
    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak()
    }

    /// Take the next error if set.
    async fn take_error(&self) -> Option<ConverterError> {
        self.next_error.write().await.take()
    }

    async fn simulate_work(&self, duration_ms: u64) -> u64 {
        if duration_ms > 0 {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        } else {
            tokio::task::yield_now().await;
        }
        duration_ms
    }
}

#[async_trait]
impl Converter for MockConverter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcode(&self, job: TranscodeJob) -> Result<ConversionResult, ConverterError> {
        let _guard = self.gauge.enter();

        if let Some(err) = self.take_error().await {
            self.transcodes.write().await.push(RecordedTranscode {
                job,
                success: false,
            });
            return Err(err);
        }

        if !job.input_path.exists() {
            return Err(ConverterError::InputNotFound {
                path: job.input_path,
            });
        }

        let duration_ms = *self.conversion_duration_ms.read().await;
        let duration_ms = self.simulate_work(duration_ms).await;

        // Stand-in for the encoded audio: format plus the tags that were asked for.
        let body = format!(
            "{}|{}|{}",
            job.format,
            job.metadata.title.as_deref().unwrap_or_default(),
            job.metadata.artist.as_deref().unwrap_or_default()
        );
        tokio::fs::write(&job.output_path, body.as_bytes()).await?;

        self.transcodes.write().await.push(RecordedTranscode {
            job: job.clone(),
            success: true,
        });

        Ok(ConversionResult {
            output_path: job.output_path,
            output_size_bytes: body.len() as u64,
            duration_ms,
        })
    }

    async fn embed_cover(&self, job: CoverEmbedJob) -> Result<ConversionResult, ConverterError> {
        let _guard = self.gauge.enter();

        if *self.fail_embeds.read().await {
            self.embeds.write().await.push(RecordedEmbed {
                job,
                success: false,
            });
            return Err(ConverterError::conversion_failed(
                "ffmpeg exited with code 1",
                Some("Invalid data found when processing input".to_string()),
            ));
        }

        let embed_ms = *self.embed_duration_ms.read().await;
        let duration_ms = match embed_ms {
            Some(ms) => ms,
            None => *self.conversion_duration_ms.read().await,
        };
        let duration_ms = self.simulate_work(duration_ms).await;

        let mut body = tokio::fs::read(&job.input_path).await?;
        body.extend_from_slice(b"|cover");
        tokio::fs::write(&job.output_path, &body).await?;

        self.embeds.write().await.push(RecordedEmbed {
            job: job.clone(),
            success: true,
        });

        Ok(ConversionResult {
            output_path: job.output_path,
            output_size_bytes: body.len() as u64,
            duration_ms,
        })
    }

    async fn retag(&self, job: RetagJob) -> Result<ConversionResult, ConverterError> {
        let _guard = self.gauge.enter();

        if let Some(err) = self.take_error().await {
            self.retags.write().await.push(RecordedRetag {
                job,
                success: false,
            });
            return Err(err);
        }

        let duration_ms = *self.conversion_duration_ms.read().await;
        let duration_ms = self.simulate_work(duration_ms).await;

        let mut body = tokio::fs::read(&job.input_path).await.map_err(|_| {
            ConverterError::InputNotFound {
                path: job.input_path.clone(),
            }
        })?;
        let tags = format!(
            "|tags:{};{};{}",
            job.metadata.title.as_deref().unwrap_or_default(),
            job.metadata.artist.as_deref().unwrap_or_default(),
            job.metadata.album.as_deref().unwrap_or_default()
        );
        body.extend_from_slice(tags.as_bytes());
        if job.cover_path.is_some() {
            body.extend_from_slice(b"|cover");
        }
        tokio::fs::write(&job.output_path, &body).await?;

        self.retags.write().await.push(RecordedRetag {
            job: job.clone(),
            success: true,
        });

        Ok(ConversionResult {
            output_path: job.output_path,
            output_size_bytes: body.len() as u64,
            duration_ms,
        })
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        Ok(())
    }
}
