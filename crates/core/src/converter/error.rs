//! Error types for the converter module.

use std::path::PathBuf;
use thiserror::Error;

use crate::job::ErrorKind;

/// Errors that can occur while running ffmpeg.
#[derive(Debug, Error)]
pub enum ConverterError {
    /// FFmpeg binary not found.
    #[error("FFmpeg not found at path: {path}")]
    FfmpegNotFound { path: PathBuf },

    /// Input file not found.
    #[error("Input file not found: {path}")]
    InputNotFound { path: PathBuf },

    /// Output directory does not exist and could not be created.
    #[error("Failed to create output directory: {path}")]
    OutputDirectoryFailed { path: PathBuf },

    /// FFmpeg ran but did not produce the expected output.
    #[error("Conversion failed: {reason}{}", .stderr.as_deref().map(|s| format!(": {}", s)).unwrap_or_default())]
    ConversionFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// Conversion timed out.
    #[error("Conversion timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// I/O error during conversion.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConverterError {
    /// Creates a new conversion failed error with stderr output.
    pub fn conversion_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::ConversionFailed {
            reason: reason.into(),
            stderr,
        }
    }

    /// Classification used when a transcode fails.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputNotFound { .. } | Self::OutputDirectoryFailed { .. } | Self::Io(_) => {
                ErrorKind::Io
            }
            _ => ErrorKind::Transcode,
        }
    }
}
