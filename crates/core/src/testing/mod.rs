//! Testing utilities and mock implementations for engine tests.
//!
//! This module provides mock implementations of the external tool traits,
//! so the whole job lifecycle can be exercised without yt-dlp or ffmpeg.
//!
//! # Example
//!
//! ```rust,ignore
//! use tonefetch_core::testing::{MockConverter, MockFetcher};
//!
//! let fetcher = MockFetcher::new();
//! let converter = MockConverter::new();
//!
//! // Configure mock behavior
//! fetcher.fail_network_times(1).await;
//! converter.set_fail_embeds(true).await;
//!
//! // Hand both to a DownloadEngine...
//! ```

mod mock_converter;
mod mock_fetcher;

pub use mock_converter::{MockConverter, RecordedEmbed, RecordedRetag, RecordedTranscode};
pub use mock_fetcher::{MockFetcher, RecordedFetch};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use crate::converter::AudioFormat;
    use crate::fetcher::{Provider, SearchResult, SourceMetadata};
    use crate::job::OutputProfile;

    /// Resolved metadata with every optional field filled in.
    pub fn track_metadata(artist: &str, title: &str) -> SourceMetadata {
        let slug = title.to_lowercase().replace(' ', "-");
        SourceMetadata {
            id: format!("track-{}", slug),
            title: title.to_string(),
            artist: Some(artist.to_string()),
            uploader: Some(format!("{} Official", artist)),
            album: None,
            duration_secs: Some(215),
            webpage_url: format!("https://soundcloud.com/{}/{}", artist.to_lowercase(), slug),
            thumbnail_url: Some(format!("https://i1.sndcdn.com/{}.jpg", slug)),
            extractor: Some("soundcloud".to_string()),
        }
    }

    /// Profile writing `format` at `bitrate_kbps` into `output_dir`.
    pub fn profile(output_dir: &Path, format: AudioFormat, bitrate_kbps: u32) -> OutputProfile {
        OutputProfile {
            format,
            bitrate_kbps,
            output_dir: output_dir.to_path_buf(),
            ..OutputProfile::default()
        }
    }

    /// A search hit as the fetcher would report it.
    pub fn search_result(title: &str, artist: &str, provider: Provider) -> SearchResult {
        SearchResult {
            id: title.to_lowercase().replace(' ', "-"),
            title: title.to_string(),
            artist: artist.to_string(),
            duration_secs: Some(200),
            duration: "3:20".to_string(),
            url: format!("https://{}.example/{}", provider, title.replace(' ', "-")),
            thumbnail_url: None,
            provider,
        }
    }
}
