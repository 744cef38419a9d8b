//! Mock fetcher for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::mock_converter::ConcurrencyGauge;
use crate::fetcher::{
    FetchError, FetchRequest, FetchedMedia, Fetcher, ProgressCallback, Provider, RawProgress,
    SearchResult, SourceMetadata, SourceRef,
};

/// A recorded fetch for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedFetch {
    /// Id of the resolved track.
    pub track_id: String,
    pub write_thumbnail: bool,
    /// Whether the fetch produced media.
    pub success: bool,
}

/// Mock implementation of the Fetcher trait.
///
/// Provides controllable behavior for testing:
/// - Track resolves and fetches for assertions
/// - Simulate progress reports with a delay between them
/// - Simulate not-found sources and transient network failures
/// - Write fake media and thumbnail files into the sink directory
/// - Record peak fetch concurrency
///
/// # Example
///
/// ```rust,ignore
/// use tonefetch_core::testing::MockFetcher;
///
/// let fetcher = MockFetcher::new();
/// fetcher.fail_network_times(2).await;
///
/// // ... the engine retries and the third attempt succeeds ...
///
/// assert_eq!(fetcher.fetch_attempts().await, 3);
/// ```
#[derive(Debug)]
pub struct MockFetcher {
    /// Metadata returned by resolve. Derived from the source when unset.
    metadata: Arc<RwLock<Option<SourceMetadata>>>,
    /// If set, the next resolve will fail with this error.
    next_resolve_error: Arc<RwLock<Option<FetchError>>>,
    /// Remaining fetch attempts that fail with a network error.
    network_failures: Arc<RwLock<u32>>,
    /// Progress reports sent during each fetch.
    progress_steps: Arc<RwLock<Vec<RawProgress>>>,
    /// Pause before each progress report, in milliseconds.
    step_delay_ms: Arc<RwLock<u64>>,
    /// Whether a thumbnail is written when requested.
    provide_thumbnail: Arc<RwLock<bool>>,
    search_results: Arc<RwLock<Vec<SearchResult>>>,
    resolves: Arc<RwLock<Vec<SourceRef>>>,
    fetches: Arc<RwLock<Vec<RecordedFetch>>>,
    gauge: Arc<ConcurrencyGauge>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    /// Create a new mock fetcher reporting four steps of a 1000 byte download.
    pub fn new() -> Self {
        Self {
            metadata: Arc::new(RwLock::new(None)),
            next_resolve_error: Arc::new(RwLock::new(None)),
            network_failures: Arc::new(RwLock::new(0)),
            progress_steps: Arc::new(RwLock::new(default_steps())),
            step_delay_ms: Arc::new(RwLock::new(0)),
            provide_thumbnail: Arc::new(RwLock::new(true)),
            search_results: Arc::new(RwLock::new(Vec::new())),
            resolves: Arc::new(RwLock::new(Vec::new())),
            fetches: Arc::new(RwLock::new(Vec::new())),
            gauge: Arc::new(ConcurrencyGauge::default()),
        }
    }

    /// Always resolve to this metadata.
    pub async fn set_metadata(&self, metadata: SourceMetadata) {
        *self.metadata.write().await = Some(metadata);
    }

    /// Configure the next resolve to fail with the given error.
    pub async fn set_next_resolve_error(&self, error: FetchError) {
        *self.next_resolve_error.write().await = Some(error);
    }

    /// Make the next `times` fetch attempts fail with a network error.
    pub async fn fail_network_times(&self, times: u32) {
        *self.network_failures.write().await = times;
    }

    /// Replace the progress reports sent during a fetch.
    pub async fn set_progress_steps(&self, steps: Vec<RawProgress>) {
        *self.progress_steps.write().await = steps;
    }

    /// Pause before each progress report.
    pub async fn set_step_delay(&self, delay: Duration) {
        *self.step_delay_ms.write().await = delay.as_millis() as u64;
    }

    /// Whether a requested thumbnail is actually written.
    pub async fn set_provide_thumbnail(&self, provide: bool) {
        *self.provide_thumbnail.write().await = provide;
    }

    pub async fn set_search_results(&self, results: Vec<SearchResult>) {
        *self.search_results.write().await = results;
    }

    /// Sources passed to resolve, in call order.
    pub async fn recorded_resolves(&self) -> Vec<SourceRef> {
        self.resolves.read().await.clone()
    }

    /// Every fetch attempt, in call order.
    pub async fn recorded_fetches(&self) -> Vec<RecordedFetch> {
        self.fetches.read().await.clone()
    }

    pub async fn fetch_attempts(&self) -> usize {
        self.fetches.read().await.len()
    }

    /// Highest number of simultaneous fetches seen so far.
    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak()
    }

    /// Fetches running right now.
    pub fn active_fetches(&self) -> usize {
        self.gauge.active()
    }

    fn metadata_for(source: &SourceRef) -> SourceMetadata {
        let (id, title, url) = match source {
            SourceRef::Url(url) => {
                let slug = url
                    .trim_end_matches('/')
                    .rsplit('/')
                    .next()
                    .unwrap_or("track")
                    .to_string();
                (slug.clone(), slug, url.clone())
            }
            SourceRef::Search { query, provider } => (
                format!("{}-{}", provider, query.replace(' ', "-")),
                query.clone(),
                format!("https://{}.example/{}", provider, query.replace(' ', "-")),
            ),
        };
        SourceMetadata {
            id,
            title,
            artist: Some("Mock Artist".to_string()),
            uploader: Some("mock-uploader".to_string()),
            album: None,
            duration_secs: Some(180),
            webpage_url: url,
            thumbnail_url: None,
            extractor: Some("mock".to_string()),
        }
    }

    async fn record_fetch(&self, request: &FetchRequest, success: bool) {
        self.fetches.write().await.push(RecordedFetch {
            track_id: request.metadata.id.clone(),
            write_thumbnail: request.write_thumbnail,
            success,
        });
    }
}

fn default_steps() -> Vec<RawProgress> {
    [250u64, 500, 750, 1000]
        .into_iter()
        .map(|downloaded| RawProgress {
            downloaded_bytes: Some(downloaded),
            total_bytes: Some(1000),
            speed: Some(500.0),
            ..RawProgress::default()
        })
        .collect()
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn resolve(&self, source: &SourceRef) -> Result<SourceMetadata, FetchError> {
        self.resolves.write().await.push(source.clone());
        if let Some(err) = self.next_resolve_error.write().await.take() {
            return Err(err);
        }
        if let Some(metadata) = self.metadata.read().await.as_ref() {
            return Ok(metadata.clone());
        }
        Ok(Self::metadata_for(source))
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        on_progress: &ProgressCallback<'_>,
    ) -> Result<FetchedMedia, FetchError> {
        let _guard = self.gauge.enter();

        {
            let mut failures = self.network_failures.write().await;
            if *failures > 0 {
                *failures -= 1;
                drop(failures);
                self.record_fetch(request, false).await;
                return Err(FetchError::network("Connection reset by peer"));
            }
        }

        let steps = self.progress_steps.read().await.clone();
        let delay = *self.step_delay_ms.read().await;
        for step in steps {
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            } else {
                tokio::task::yield_now().await;
            }
            if let Err(err) = on_progress(step) {
                self.record_fetch(request, false).await;
                return Err(err);
            }
        }

        tokio::fs::create_dir_all(&request.sink_dir).await?;
        let media_path = request.sink_dir.join("source.webm");
        tokio::fs::write(&media_path, request.metadata.id.as_bytes()).await?;

        let thumbnail_path = if request.write_thumbnail && *self.provide_thumbnail.read().await {
            let path = request.sink_dir.join("source.jpg");
            tokio::fs::write(&path, b"thumbnail").await?;
            Some(path)
        } else {
            None
        };

        self.record_fetch(request, true).await;
        Ok(FetchedMedia {
            media_path,
            thumbnail_path,
        })
    }

    async fn search(
        &self,
        _query: &str,
        provider: Provider,
        limit: usize,
    ) -> Result<Vec<SearchResult>, FetchError> {
        Ok(self
            .search_results
            .read()
            .await
            .iter()
            .filter(|r| r.provider == provider)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn validate(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn request(dir: &TempDir, write_thumbnail: bool) -> FetchRequest {
        FetchRequest {
            metadata: MockFetcher::metadata_for(&SourceRef::Url(
                "https://soundcloud.com/band/song".to_string(),
            )),
            sink_dir: dir.path().to_path_buf(),
            write_thumbnail,
        }
    }

    #[tokio::test]
    async fn test_resolve_derives_metadata() {
        let fetcher = MockFetcher::new();
        let meta = fetcher
            .resolve(&SourceRef::Url("https://soundcloud.com/band/song".to_string()))
            .await
            .unwrap();
        assert_eq!(meta.id, "song");
        assert_eq!(fetcher.recorded_resolves().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_reports_progress_and_writes_files() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new();
        let seen = Mutex::new(Vec::new());

        let media = fetcher
            .fetch(&request(&dir, true), &|p: RawProgress| {
                seen.lock().unwrap().push(p.downloaded_bytes);
                Ok(())
            })
            .await
            .unwrap();

        assert!(media.media_path.exists());
        assert!(media.thumbnail_path.unwrap().exists());
        assert_eq!(seen.into_inner().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_callback_error_aborts_fetch() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new();

        let err = fetcher
            .fetch(&request(&dir, false), &|_: RawProgress| Err(FetchError::Cancelled))
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        assert!(!dir.path().join("source.webm").exists());
        assert_eq!(fetcher.active_fetches(), 0);
    }

    #[tokio::test]
    async fn test_network_failures_are_consumed() {
        let dir = TempDir::new().unwrap();
        let fetcher = MockFetcher::new();
        fetcher.fail_network_times(1).await;

        let first = fetcher.fetch(&request(&dir, false), &|_: RawProgress| Ok(())).await;
        assert!(matches!(first, Err(FetchError::Network { .. })));
        assert!(fetcher.fetch(&request(&dir, false), &|_: RawProgress| Ok(())).await.is_ok());
        assert_eq!(fetcher.fetch_attempts().await, 2);
    }
}
