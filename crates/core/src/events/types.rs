//! Progress event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::job::{JobError, JobId, JobProgress, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Status,
    Progress,
    Warning,
    Error,
    Done,
    Cancelled,
}

impl EventKind {
    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error | Self::Done | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    Status {
        status: JobStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Progress(JobProgress),
    Warning {
        message: String,
    },
    Error(JobError),
    Done {
        path: PathBuf,
        degraded: bool,
    },
    Cancelled {
        message: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Status { .. } => EventKind::Status,
            Self::Progress(_) => EventKind::Progress,
            Self::Warning { .. } => EventKind::Warning,
            Self::Error(_) => EventKind::Error,
            Self::Done { .. } => EventKind::Done,
            Self::Cancelled { .. } => EventKind::Cancelled,
        }
    }

    pub fn status(status: JobStatus, message: impl Into<Option<String>>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }
}

/// One immutable notification about a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// Starts at 0, strictly increasing within a job.
    pub seq: u64,
    pub kind: EventKind,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}
