//! Output profile: the per-job snapshot of output options.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::converter::AudioFormat;
use crate::cover;
use crate::fetcher::SourceRef;

/// Bitrates accepted for lossy formats, in kbps.
pub const SUPPORTED_BITRATES: &[u32] = &[320, 256, 192, 128, 96];

/// What to do when the destination file already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Keep the existing file and complete with its path.
    Skip,
    /// Replace the existing file.
    Overwrite,
    /// Append ` (2)`, ` (3)`, ... before the extension.
    #[default]
    Uniquify,
}

/// Options governing the output of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputProfile {
    pub format: AudioFormat,
    /// Only used by lossy formats.
    pub bitrate_kbps: u32,
    pub output_dir: PathBuf,
    pub output_template: String,
    pub fallback_template: String,
    pub save_cover_art: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_cover_path: Option<PathBuf>,
    pub create_artist_folders: bool,
    pub collision_policy: CollisionPolicy,
}

impl Default for OutputProfile {
    fn default() -> Self {
        Self {
            format: AudioFormat::Mp3,
            bitrate_kbps: 320,
            output_dir: PathBuf::from("downloads"),
            output_template: "%(artist)s - %(title).200s.%(ext)s".to_string(),
            fallback_template: "%(uploader)s - %(title).200s.%(ext)s".to_string(),
            save_cover_art: true,
            custom_cover_path: None,
            create_artist_folders: false,
            collision_policy: CollisionPolicy::default(),
        }
    }
}

/// A profile that cannot be executed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("unsupported bitrate {bitrate} kbps for {format} (expected one of 320, 256, 192, 128, 96)")]
    UnsupportedBitrate { format: AudioFormat, bitrate: u32 },

    #[error("{field} must not be empty")]
    EmptyTemplate { field: &'static str },

    #[error("unsupported cover image: {path}")]
    UnsupportedCover { path: PathBuf },
}

impl OutputProfile {
    /// Checks the profile before it is accepted for a job.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if !self.format.is_lossless() && !SUPPORTED_BITRATES.contains(&self.bitrate_kbps) {
            return Err(ProfileError::UnsupportedBitrate {
                format: self.format,
                bitrate: self.bitrate_kbps,
            });
        }
        if self.output_template.trim().is_empty() {
            return Err(ProfileError::EmptyTemplate {
                field: "output_template",
            });
        }
        if self.fallback_template.trim().is_empty() {
            return Err(ProfileError::EmptyTemplate {
                field: "fallback_template",
            });
        }
        if let Some(cover) = &self.custom_cover_path {
            if !cover::is_supported_image(cover) {
                return Err(ProfileError::UnsupportedCover {
                    path: cover.clone(),
                });
            }
        }
        Ok(())
    }

    /// Bitrate passed to the encoder, if the format uses one.
    pub fn effective_bitrate(&self) -> Option<u32> {
        (!self.format.is_lossless()).then_some(self.bitrate_kbps)
    }

    /// Whether the provider thumbnail should be requested.
    pub fn wants_thumbnail(&self) -> bool {
        self.save_cover_art && self.custom_cover_path.is_none()
    }
}

/// A request to run one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub source: SourceRef,
    pub profile: OutputProfile,
}

impl JobRequest {
    pub fn new(source: SourceRef, profile: OutputProfile) -> Self {
        Self { source, profile }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_valid() {
        let profile = OutputProfile::default();
        assert!(profile.validate().is_ok());
        assert_eq!(profile.collision_policy, CollisionPolicy::Uniquify);
        assert_eq!(profile.effective_bitrate(), Some(320));
    }

    #[test]
    fn test_rejects_unsupported_bitrate_for_lossy() {
        let profile = OutputProfile {
            bitrate_kbps: 160,
            ..OutputProfile::default()
        };
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::UnsupportedBitrate { bitrate: 160, .. })
        ));
    }

    #[test]
    fn test_lossless_ignores_bitrate() {
        let profile = OutputProfile {
            format: AudioFormat::Flac,
            bitrate_kbps: 1,
            ..OutputProfile::default()
        };
        assert!(profile.validate().is_ok());
        assert_eq!(profile.effective_bitrate(), None);
    }

    #[test]
    fn test_rejects_empty_templates() {
        let profile = OutputProfile {
            output_template: "  ".to_string(),
            ..OutputProfile::default()
        };
        assert_eq!(
            profile.validate(),
            Err(ProfileError::EmptyTemplate {
                field: "output_template"
            })
        );
    }

    #[test]
    fn test_rejects_non_image_cover() {
        let profile = OutputProfile {
            custom_cover_path: Some(PathBuf::from("/tmp/cover.gif")),
            ..OutputProfile::default()
        };
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::UnsupportedCover { .. })
        ));
    }

    #[test]
    fn test_custom_cover_disables_thumbnail() {
        let mut profile = OutputProfile::default();
        assert!(profile.wants_thumbnail());
        profile.custom_cover_path = Some(PathBuf::from("/tmp/cover.png"));
        assert!(!profile.wants_thumbnail());
        profile.custom_cover_path = None;
        profile.save_cover_art = false;
        assert!(!profile.wants_thumbnail());
    }

    #[test]
    fn test_profile_deserializes_with_defaults() {
        let profile: OutputProfile =
            serde_json::from_str(r#"{"format":"flac","collision_policy":"skip"}"#).unwrap();
        assert_eq!(profile.format, AudioFormat::Flac);
        assert_eq!(profile.collision_policy, CollisionPolicy::Skip);
        assert!(profile.save_cover_art);
    }
}
