//! Core job types and the job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::profile::OutputProfile;
use crate::fetcher::{SourceMetadata, SourceRef};

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, waiting for a worker.
    Queued,
    /// Resolving the source and fetching the raw media.
    Downloading,
    /// Transcoding and tagging.
    Postprocessing,
    /// Embedding a user supplied cover.
    EmbeddingCover,
    /// Finished file placed in the output directory.
    Completed,
    /// Stopped by a cancel request.
    Cancelled,
    /// Stopped by an unrecoverable error.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Downloading) => true,
            (Downloading, Postprocessing) => true,
            (Postprocessing, EmbeddingCover) => true,
            (Postprocessing, Completed) | (EmbeddingCover, Completed) => true,
            (from, Cancelled) | (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Postprocessing => "postprocessing",
            Self::EmbeddingCover => "embedding_cover",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of job failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Network,
    UnsupportedFormat,
    UnsupportedSource,
    Transcode,
    /// Non-fatal. Only ever reported as a warning.
    CoverEmbed,
    Io,
    /// An external tool failed in a way that fits no other kind.
    Provider,
    /// Outcome classification only, never stored on a failed job.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Network => "network",
            Self::UnsupportedFormat => "unsupported_format",
            Self::UnsupportedSource => "unsupported_source",
            Self::Transcode => "transcode",
            Self::CoverEmbed => "cover_embed",
            Self::Io => "io",
            Self::Provider => "provider",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Normalized download progress. Every field is optional because providers
/// report different subsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    /// Whether `total_bytes` is the provider's estimate.
    #[serde(default)]
    pub total_is_estimate: bool,
    /// Bytes per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_bps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_secs: Option<u64>,
    /// 0.0 to 100.0, `None` while the total is unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

/// Rejected state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition from {from} to {to}")]
    Illegal { from: JobStatus, to: JobStatus },

    #[error("transition to {to} must go through its outcome setter")]
    MissingOutcome { to: JobStatus },
}

/// One download-and-postprocess job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source: SourceRef,
    pub profile: OutputProfile,
    pub status: JobStatus,
    pub progress: JobProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SourceMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub degraded: bool,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a queued job.
    pub fn new(id: JobId, source: SourceRef, profile: OutputProfile) -> Self {
        let now = Utc::now();
        Self {
            id,
            source,
            profile,
            status: JobStatus::Queued,
            progress: JobProgress::default(),
            metadata: None,
            result: None,
            error: None,
            degraded: false,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to a non-outcome state (everything except Completed and Failed).
    pub fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if matches!(to, JobStatus::Completed | JobStatus::Failed) {
            return Err(TransitionError::MissingOutcome { to });
        }
        self.apply(to)
    }

    /// Marks the job completed with its final file.
    pub fn complete(&mut self, path: PathBuf) -> Result<(), TransitionError> {
        self.apply(JobStatus::Completed)?;
        self.result = Some(path);
        Ok(())
    }

    /// Marks the job failed.
    pub fn fail(&mut self, error: JobError) -> Result<(), TransitionError> {
        self.apply(JobStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Records a non-fatal problem.
    pub fn warn(&mut self, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.warnings.push(message.into());
        self.touch();
    }

    fn apply(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.touch();
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
