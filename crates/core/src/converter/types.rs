//! Types for the converter module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Target audio format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// MPEG Audio Layer III
    Mp3,
    /// AAC in an MP4 container
    M4a,
    /// Free Lossless Audio Codec
    Flac,
    /// WAVE (uncompressed PCM)
    Wav,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 4] = [Self::Mp3, Self::M4a, Self::Flac, Self::Wav];

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::Flac => "flac",
            Self::Wav => "wav",
        }
    }

    /// Returns the ffmpeg codec name for this format.
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
            Self::M4a => "aac",
            Self::Flac => "flac",
            Self::Wav => "pcm_s16le",
        }
    }

    /// Whether this format is lossless.
    pub fn is_lossless(&self) -> bool {
        matches!(self, Self::Flac | Self::Wav)
    }

    /// Format of an existing file, judged by its extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        Self::ALL
            .into_iter()
            .find(|f| f.extension().eq_ignore_ascii_case(ext))
    }

    /// Whether the container can carry an attached cover picture.
    pub fn supports_attached_picture(&self) -> bool {
        !matches!(self, Self::Wav)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(Self::Mp3),
            "m4a" | "aac" => Ok(Self::M4a),
            "flac" => Ok(Self::Flac),
            "wav" => Ok(Self::Wav),
            other => Err(format!("unsupported audio format: {}", other)),
        }
    }
}

/// Tags written into the output file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    /// Usually the source page URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl EmbeddedMetadata {
    /// Convert to ffmpeg metadata arguments.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let fields = [
            ("title", &self.title),
            ("artist", &self.artist),
            ("album", &self.album),
            ("album_artist", &self.album_artist),
            ("comment", &self.comment),
        ];

        let mut args = Vec::new();
        for (key, value) in fields {
            if let Some(value) = value {
                args.extend(["-metadata".to_string(), format!("{}={}", key, value)]);
            }
        }
        args
    }
}

/// Transcode the raw download into the target format, tagging it and
/// optionally attaching the provider thumbnail in the same pass.
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    /// Used for logging only.
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub format: AudioFormat,
    /// Ignored for lossless formats.
    pub bitrate_kbps: Option<u32>,
    pub metadata: EmbeddedMetadata,
    pub thumbnail_path: Option<PathBuf>,
}

/// Attach a cover image to an already transcoded file, writing to a new file.
#[derive(Debug, Clone)]
pub struct CoverEmbedJob {
    pub job_id: String,
    pub input_path: PathBuf,
    pub cover_path: PathBuf,
    pub output_path: PathBuf,
    pub format: AudioFormat,
}

/// Rewrite the tags of a finished file without re-encoding the audio.
///
/// Tags not named in `metadata` are carried over from the input. Without a
/// cover, an existing attached picture is kept.
#[derive(Debug, Clone)]
pub struct RetagJob {
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub format: AudioFormat,
    pub metadata: EmbeddedMetadata,
    pub cover_path: Option<PathBuf>,
}

/// Result of a successful ffmpeg run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub output_path: PathBuf,
    pub output_size_bytes: u64,
    pub duration_ms: u64,
}
