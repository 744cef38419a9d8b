//! Types for the postprocess pipeline.

use std::path::PathBuf;
use thiserror::Error;

use crate::converter::{ConverterError, EmbeddedMetadata};
use crate::cover::CoverError;
use crate::fetcher::{FetchedMedia, SourceMetadata};
use crate::job::{ErrorKind, JobId, JobStatus, OutputProfile};
use crate::placer::{PlacementAction, PlacerError};

/// Everything the pipeline needs to turn fetched media into a placed file.
#[derive(Debug, Clone)]
pub struct PostprocessPlan {
    pub job_id: JobId,
    /// Job-private scratch directory. Every intermediate file lives here.
    pub work_dir: PathBuf,
    pub media: FetchedMedia,
    pub metadata: SourceMetadata,
    pub profile: OutputProfile,
}

impl PostprocessPlan {
    /// Tags written during transcode. Artist falls back to the uploader,
    /// then `Unknown`; the comment carries the source page.
    pub fn tags(&self) -> EmbeddedMetadata {
        let artist = self.metadata.display_artist().to_string();
        EmbeddedMetadata {
            title: Some(self.metadata.title.clone()),
            album_artist: self.metadata.album.as_ref().map(|_| artist.clone()),
            artist: Some(artist),
            album: self.metadata.album.clone(),
            comment: Some(self.metadata.webpage_url.clone()),
        }
    }

    /// Intermediate file produced by the transcode step.
    pub fn transcoded_path(&self) -> PathBuf {
        self.work_dir
            .join(format!("transcoded.{}", self.profile.format.extension()))
    }
}

/// Result of a finished pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostprocessOutcome {
    /// Final location in the output directory.
    pub path: PathBuf,
    pub action: PlacementAction,
    /// A cover was requested but could not be embedded.
    pub degraded: bool,
    pub warnings: Vec<String>,
}

/// Receives the pipeline's state changes as they happen.
pub trait PostprocessObserver: Send + Sync {
    /// A new step began.
    fn on_step(&self, status: JobStatus);

    /// A non-fatal problem occurred.
    fn on_warning(&self, message: &str);
}

#[derive(Debug, Error)]
pub enum PostprocessError {
    #[error("Postprocessing cancelled")]
    Cancelled,

    #[error("Transcode failed: {0}")]
    Transcode(#[source] ConverterError),

    /// Non-fatal: the pipeline turns this into a warning.
    #[error("Cover embedding failed: {0}")]
    CoverEmbed(#[source] ConverterError),

    /// Non-fatal: the pipeline turns this into a warning.
    #[error(transparent)]
    Cover(#[from] CoverError),

    #[error("Placement failed: {0}")]
    Placement(#[from] PlacerError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PostprocessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Transcode(e) => e.kind(),
            Self::CoverEmbed(_) => ErrorKind::CoverEmbed,
            Self::Cover(e) => e.kind(),
            Self::Placement(e) => e.kind(),
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}
