//! Types for the fetcher module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Source platform for searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    SoundCloud,
    YouTube,
}

impl Provider {
    /// yt-dlp search key for this provider (`scsearch`, `ytsearch`).
    pub fn search_key(&self) -> &'static str {
        match self {
            Self::SoundCloud => "scsearch",
            Self::YouTube => "ytsearch",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SoundCloud => "soundcloud",
            Self::YouTube => "youtube",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "soundcloud" | "sc" => Ok(Self::SoundCloud),
            "youtube" | "yt" => Ok(Self::YouTube),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRef {
    /// A direct track URL.
    Url(String),
    /// A free-text search; the first hit is used.
    Search { query: String, provider: Provider },
}

impl SourceRef {
    /// Treats anything that looks like an http(s) URL as a URL, the rest as a search.
    pub fn parse(input: &str, provider: Provider) -> Self {
        let trimmed = input.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else {
            Self::Search {
                query: trimmed.to_string(),
                provider,
            }
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.write_str(url),
            Self::Search { query, provider } => write!(f, "{}:\"{}\"", provider, query),
        }
    }
}

/// Resolved information about a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    pub webpage_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extractor: Option<String>,
}

impl SourceMetadata {
    /// Artist, falling back to the uploader, then `Unknown`.
    pub fn display_artist(&self) -> &str {
        self.artist
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .or_else(|| self.uploader.as_deref().filter(|u| !u.trim().is_empty()))
            .unwrap_or("Unknown")
    }
}

/// Parameters for fetching a resolved track.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub metadata: SourceMetadata,
    /// Directory that receives the raw media (and thumbnail).
    pub sink_dir: PathBuf,
    /// Ask the provider for its thumbnail next to the media.
    pub write_thumbnail: bool,
}

/// Files produced by a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub media_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
}

/// One progress report as the provider gave it. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawProgress {
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<u64>,
    /// Bytes per second.
    pub speed: Option<f64>,
    /// Seconds.
    pub eta: Option<u64>,
    pub filename: Option<String>,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    /// `m:ss`, or `--:--` when unknown.
    pub duration: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub provider: Provider,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_ref_parse() {
        assert_eq!(
            SourceRef::parse(" https://soundcloud.com/a/b ", Provider::YouTube),
            SourceRef::Url("https://soundcloud.com/a/b".to_string())
        );
        assert_eq!(
            SourceRef::parse("daft punk", Provider::YouTube),
            SourceRef::Search {
                query: "daft punk".to_string(),
                provider: Provider::YouTube
            }
        );
    }

    #[test]
    fn test_provider_parse_and_key() {
        assert_eq!("SoundCloud".parse::<Provider>(), Ok(Provider::SoundCloud));
        assert_eq!("yt".parse::<Provider>(), Ok(Provider::YouTube));
        assert!("bandcamp".parse::<Provider>().is_err());
        assert_eq!(Provider::YouTube.search_key(), "ytsearch");
    }

    #[test]
    fn test_display_artist_fallback() {
        let mut meta = SourceMetadata {
            id: "1".to_string(),
            title: "t".to_string(),
            artist: Some(" ".to_string()),
            uploader: Some("uploader".to_string()),
            album: None,
            duration_secs: None,
            webpage_url: "https://x".to_string(),
            thumbnail_url: None,
            extractor: None,
        };
        assert_eq!(meta.display_artist(), "uploader");
        meta.uploader = None;
        assert_eq!(meta.display_artist(), "Unknown");
    }
}
