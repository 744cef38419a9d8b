//! Fetcher module: resolving, searching and downloading tracks.
//!
//! The `Fetcher` trait is the boundary to the outside world. `YtDlpFetcher`
//! drives the `yt-dlp` binary and normalizes its output into typed values:
//! [`SourceMetadata`] for resolved tracks and [`RawProgress`] for download
//! progress.

mod config;
mod error;
mod search;
mod traits;
mod types;
mod ytdlp;

pub use config::FetcherConfig;
pub use error::FetchError;
pub use search::{filter_entries, format_duration, SearchEntry};
pub use traits::{Fetcher, ProgressCallback};
pub use types::{
    FetchRequest, FetchedMedia, Provider, RawProgress, SearchResult, SourceMetadata, SourceRef,
};
pub use ytdlp::YtDlpFetcher;
