//! Trait definitions for the converter module.

use async_trait::async_trait;

use super::error::ConverterError;
use super::types::{ConversionResult, CoverEmbedJob, RetagJob, TranscodeJob};

/// Transcodes and tags audio files.
///
/// Implementations must not leave a partial file at the output path on
/// failure, and must kill any child process when the returned future is
/// dropped.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Returns the name of this converter implementation.
    fn name(&self) -> &str;

    /// Transcodes, tags and optionally attaches a thumbnail.
    async fn transcode(&self, job: TranscodeJob) -> Result<ConversionResult, ConverterError>;

    /// Attaches a cover image, writing the result to `job.output_path`.
    async fn embed_cover(&self, job: CoverEmbedJob) -> Result<ConversionResult, ConverterError>;

    /// Rewrites tags (and optionally the cover) into `job.output_path`,
    /// copying the audio stream unchanged.
    async fn retag(&self, job: RetagJob) -> Result<ConversionResult, ConverterError>;

    /// Validates that the converter is properly configured and ready.
    async fn validate(&self) -> Result<(), ConverterError>;
}
