//! Rewriting the tags of an audio file that is already in the library.
//!
//! The new file is written next to the original under a hidden temporary
//! name and renamed over it, so a failed retag leaves the original intact.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::converter::{AudioFormat, Converter, ConverterError, EmbeddedMetadata, RetagJob};
use crate::cover::is_supported_image;
use crate::job::ErrorKind;

/// New tags for an existing file. `None` leaves a tag as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetagRequest {
    pub path: PathBuf,
    pub title: Option<String>,
    /// Also written as the album artist.
    pub artist: Option<String>,
    pub album: Option<String>,
    pub cover_path: Option<PathBuf>,
}

impl RetagRequest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    fn metadata(&self) -> EmbeddedMetadata {
        let non_blank = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let artist = non_blank(&self.artist);
        EmbeddedMetadata {
            title: non_blank(&self.title),
            album_artist: artist.clone(),
            artist,
            album: non_blank(&self.album),
            comment: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.metadata() == EmbeddedMetadata::default() && self.cover_path.is_none()
    }
}

#[derive(Debug, Error)]
pub enum RetagError {
    #[error("Audio file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Unsupported audio file: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Cover must be a jpg or png image: {path}")]
    UnsupportedCover { path: PathBuf },

    #[error("No tags or cover given")]
    NothingToChange,

    #[error(transparent)]
    Converter(#[from] ConverterError),

    #[error("Failed to replace {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RetagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::UnsupportedFormat { .. }
            | Self::UnsupportedCover { .. }
            | Self::NothingToChange => ErrorKind::UnsupportedFormat,
            Self::Converter(e) => e.kind(),
            Self::Io { .. } => ErrorKind::Io,
        }
    }
}

/// Hidden sibling of `path` that keeps its extension, so ffmpeg picks the
/// same container.
fn temp_path(path: &Path, format: AudioFormat) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = format!(".{}.retag-{}.{}", stem, Uuid::new_v4(), format.extension());
    path.with_file_name(name)
}

/// Applies `request` to the file in place and returns its path.
pub async fn retag<C: Converter + ?Sized>(
    converter: &C,
    request: &RetagRequest,
) -> Result<PathBuf, RetagError> {
    let path = &request.path;
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(RetagError::NotFound { path: path.clone() });
    }
    let format = AudioFormat::from_path(path)
        .filter(AudioFormat::supports_attached_picture)
        .ok_or_else(|| RetagError::UnsupportedFormat { path: path.clone() })?;
    if let Some(cover) = &request.cover_path {
        if !is_supported_image(cover) {
            return Err(RetagError::UnsupportedCover {
                path: cover.clone(),
            });
        }
    }
    if request.is_empty() {
        return Err(RetagError::NothingToChange);
    }

    let temp = temp_path(path, format);
    let job = RetagJob {
        job_id: format!("retag-{}", Uuid::new_v4()),
        input_path: path.clone(),
        output_path: temp.clone(),
        format,
        metadata: request.metadata(),
        cover_path: request.cover_path.clone(),
    };
    debug!(path = %path.display(), temp = %temp.display(), "Retagging file");

    if let Err(e) = converter.retag(job).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(RetagError::Io {
            path: path.clone(),
            source: e,
        });
    }

    info!(path = %path.display(), cover = request.cover_path.is_some(), "Retagged file");
    Ok(path.clone())
}
