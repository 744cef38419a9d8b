//! Custom cover provisioning.
//!
//! A user supplied cover is never touched in place: it is copied into the
//! job's work directory and the copy is what gets embedded.

use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::job::ErrorKind;

/// Image extensions accepted as custom covers.
pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("Cover image not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Failed to stage cover {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoverError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Io
    }
}

/// Whether `path` has an image extension usable as cover art.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            SUPPORTED_IMAGE_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

/// Copies `custom_cover` to `work_dir/cover-<uuid>.<ext>` and returns the copy.
pub async fn stage(custom_cover: &Path, work_dir: &Path) -> Result<PathBuf, CoverError> {
    let meta = tokio::fs::metadata(custom_cover).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CoverError::NotFound {
                path: custom_cover.to_path_buf(),
            }
        } else {
            CoverError::Io {
                path: custom_cover.to_path_buf(),
                source: e,
            }
        }
    })?;
    if !meta.is_file() {
        return Err(CoverError::NotFound {
            path: custom_cover.to_path_buf(),
        });
    }

    let ext = custom_cover
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string());

    let staged = work_dir.join(format!("cover-{}.{}", Uuid::new_v4(), ext));
    tokio::fs::copy(custom_cover, &staged)
        .await
        .map_err(|e| CoverError::Io {
            path: staged.clone(),
            source: e,
        })?;

    tracing::debug!(source = %custom_cover.display(), staged = %staged.display(), "Staged custom cover");
    Ok(staged)
}
