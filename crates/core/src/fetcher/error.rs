//! Error types for the fetcher module.

use std::path::PathBuf;
use thiserror::Error;

use crate::job::ErrorKind;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Nothing matched the URL or query.
    #[error("Not found: {reason}")]
    NotFound { reason: String },

    /// Transient network failure. Retried by the engine.
    #[error("Network error: {reason}")]
    Network { reason: String },

    /// The URL belongs to no supported extractor.
    #[error("Unsupported source: {reason}")]
    UnsupportedSource { reason: String },

    /// Raised by the progress callback to abort a fetch.
    #[error("Fetch cancelled")]
    Cancelled,

    #[error("yt-dlp not found at path: {path}")]
    ToolNotFound { path: PathBuf },

    /// yt-dlp failed for a reason that could not be classified.
    #[error("yt-dlp failed (exit code {code:?}): {stderr}")]
    ToolFailed { code: Option<i32>, stderr: String },

    #[error("Failed to parse yt-dlp output: {reason}")]
    Parse { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::NotFound {
            reason: reason.into(),
        }
    }

    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network {
            reason: reason.into(),
        }
    }

    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Network { .. } => ErrorKind::Network,
            Self::UnsupportedSource { .. } => ErrorKind::UnsupportedSource,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
            Self::ToolNotFound { .. } | Self::ToolFailed { .. } | Self::Parse { .. } => {
                ErrorKind::Provider
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_is_retryable() {
        assert!(FetchError::network("reset").is_retryable());
        assert!(!FetchError::not_found("gone").is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(FetchError::not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(FetchError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            FetchError::Parse {
                reason: "bad json".to_string()
            }
            .kind(),
            ErrorKind::Provider
        );
    }
}
