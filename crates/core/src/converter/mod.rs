//! Converter module for transcoding and tagging audio files.
//!
//! This module provides the `Converter` trait and an FFmpeg-backed
//! implementation.
//!
//! # Features
//!
//! - Audio transcoding (MP3, M4A/AAC, FLAC, WAV)
//! - Tag injection in the same ffmpeg pass
//! - Inline thumbnail attachment during transcode
//! - Separate cover embedding with format-specific arguments
//! - Retagging finished files with a stream copy
//!
//! # Example
//!
//! ```ignore
//! use tonefetch_core::converter::{AudioFormat, Converter, EmbeddedMetadata, FfmpegConverter, TranscodeJob};
//!
//! let converter = FfmpegConverter::with_defaults();
//! converter.validate().await?;
//!
//! let job = TranscodeJob {
//!     job_id: "job-1".to_string(),
//!     input_path: PathBuf::from("/work/source.webm"),
//!     output_path: PathBuf::from("/work/transcoded.mp3"),
//!     format: AudioFormat::Mp3,
//!     bitrate_kbps: Some(320),
//!     metadata: EmbeddedMetadata {
//!         title: Some("Song Title".to_string()),
//!         artist: Some("Artist Name".to_string()),
//!         ..Default::default()
//!     },
//!     thumbnail_path: None,
//! };
//!
//! let result = converter.transcode(job).await?;
//! println!("Converted in {} ms", result.duration_ms);
//! ```

mod config;
mod error;
mod ffmpeg;
mod traits;
mod types;

pub use config::ConverterConfig;
pub use error::ConverterError;
pub use ffmpeg::FfmpegConverter;
pub use traits::Converter;
pub use types::{
    AudioFormat, ConversionResult, CoverEmbedJob, EmbeddedMetadata, RetagJob, TranscodeJob,
};
