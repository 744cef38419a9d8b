//! Trait definitions for the fetcher module.

use async_trait::async_trait;

use super::error::FetchError;
use super::types::{
    FetchRequest, FetchedMedia, Provider, RawProgress, SearchResult, SourceMetadata, SourceRef,
};

/// Progress sink handed to [`Fetcher::fetch`].
///
/// Returning `Err(FetchError::Cancelled)` asks the fetcher to abort; the
/// fetcher must stop and return that error.
pub type ProgressCallback<'a> = dyn Fn(RawProgress) -> Result<(), FetchError> + Send + Sync + 'a;

/// Resolves and downloads tracks from a provider.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Returns the name of this fetcher implementation.
    fn name(&self) -> &str;

    /// Looks up the track a source reference points at.
    async fn resolve(&self, source: &SourceRef) -> Result<SourceMetadata, FetchError>;

    /// Downloads the best audio stream into `request.sink_dir`.
    async fn fetch(
        &self,
        request: &FetchRequest,
        on_progress: &ProgressCallback<'_>,
    ) -> Result<FetchedMedia, FetchError>;

    /// Searches a provider, returning at most `limit` relevant results.
    async fn search(
        &self,
        query: &str,
        provider: Provider,
        limit: usize,
    ) -> Result<Vec<SearchResult>, FetchError>;

    /// Checks that the backing tool is available.
    async fn validate(&self) -> Result<(), FetchError>;
}
