//! yt-dlp backed fetcher.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::config::FetcherConfig;
use super::error::FetchError;
use super::search::{filter_entries, SearchEntry};
use super::traits::{Fetcher, ProgressCallback};
use super::types::{
    FetchRequest, FetchedMedia, Provider, RawProgress, SearchResult, SourceMetadata, SourceRef,
};

/// Prefix of the progress lines we ask yt-dlp to print.
const PROGRESS_MARKER: &str = "[tonefetch]";

/// Stem of every file written into the sink directory.
const OUTPUT_STEM: &str = "source";

const THUMBNAIL_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl", "temp"];

/// Subset of yt-dlp's info JSON that we use.
#[derive(Debug, Deserialize)]
struct InfoJson {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    artist: Option<String>,
    #[serde(default)]
    creator: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    album: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    original_url: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    extractor_key: Option<String>,
    #[serde(default)]
    extractor: Option<String>,
}

pub struct YtDlpFetcher {
    config: FetcherConfig,
}

impl YtDlpFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(FetcherConfig::default())
    }

    fn common_args(&self) -> Vec<String> {
        vec![
            "--no-color".to_string(),
            "--socket-timeout".to_string(),
            self.config.socket_timeout_secs.to_string(),
        ]
    }

    fn build_resolve_args(&self, source: &SourceRef) -> Vec<String> {
        let mut args = self.common_args();
        args.extend(
            ["--dump-json", "--no-playlist", "--skip-download"].map(String::from),
        );
        args.push(match source {
            SourceRef::Url(url) => url.clone(),
            SourceRef::Search { query, provider } => {
                format!("{}1:{}", provider.search_key(), query)
            }
        });
        args
    }

    fn build_search_args(&self, query: &str, provider: Provider, limit: usize) -> Vec<String> {
        let mut args = self.common_args();
        args.extend(
            ["--dump-json", "--flat-playlist", "--skip-download", "--ignore-errors"]
                .map(String::from),
        );
        // Over-fetch so filtering still leaves `limit` results.
        args.push(format!(
            "{}{}:{}",
            provider.search_key(),
            limit.saturating_mul(2).max(1),
            query
        ));
        args
    }

    fn build_fetch_args(&self, request: &FetchRequest) -> Vec<String> {
        let mut args = self.common_args();
        let output = request.sink_dir.join(format!("{}.%(ext)s", OUTPUT_STEM));
        args.extend([
            "--no-playlist".to_string(),
            "--newline".to_string(),
            "--progress-template".to_string(),
            format!(
                "download:{} %(progress.downloaded_bytes)s %(progress.total_bytes)s \
                 %(progress.total_bytes_estimate)s %(progress.speed)s %(progress.eta)s",
                PROGRESS_MARKER
            ),
            "-f".to_string(),
            "bestaudio/best".to_string(),
            "--retries".to_string(),
            self.config.retries.to_string(),
            "--fragment-retries".to_string(),
            self.config.retries.to_string(),
            "-o".to_string(),
            output.to_string_lossy().to_string(),
        ]);
        if request.write_thumbnail {
            args.extend(
                ["--write-thumbnail", "--convert-thumbnails", "jpg"].map(String::from),
            );
        } else {
            args.push("--no-write-thumbnail".to_string());
        }
        args.push(request.metadata.webpage_url.clone());
        args
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.yt_dlp_path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, e: std::io::Error) -> FetchError {
        if e.kind() == std::io::ErrorKind::NotFound {
            FetchError::ToolNotFound {
                path: self.config.yt_dlp_path.clone(),
            }
        } else {
            FetchError::Io(e)
        }
    }

    /// Runs yt-dlp to completion and returns stdout. Used by resolve and search.
    async fn run_capture(&self, args: &[String]) -> Result<String, FetchError> {
        debug!(?args, "Running yt-dlp");
        let child = self.command(args).spawn().map_err(|e| self.spawn_error(e))?;

        let limit = Duration::from_secs(self.config.resolve_timeout_secs);
        let output = timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| {
                FetchError::network(format!(
                    "yt-dlp did not answer within {} seconds",
                    self.config.resolve_timeout_secs
                ))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() && stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(output.status.code(), &stderr));
        }
        Ok(stdout)
    }
}

/// Parses one `--dump-json` line into metadata.
fn parse_metadata(line: &str) -> Result<SourceMetadata, FetchError> {
    let info: InfoJson = serde_json::from_str(line).map_err(|e| FetchError::Parse {
        reason: e.to_string(),
    })?;

    let webpage_url = info
        .webpage_url
        .or(info.original_url)
        .ok_or_else(|| FetchError::Parse {
            reason: format!("no webpage_url for {}", info.id),
        })?;

    Ok(SourceMetadata {
        title: info
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| info.id.clone()),
        id: info.id,
        artist: info.artist.or(info.creator),
        uploader: info.uploader,
        album: info.album,
        duration_secs: info.duration.filter(|d| *d > 0.0).map(|d| d.round() as u64),
        webpage_url,
        thumbnail_url: info.thumbnail,
        extractor: info.extractor_key.or(info.extractor),
    })
}

fn parse_field<T: std::str::FromStr>(raw: Option<&str>) -> Option<T> {
    let raw = raw?;
    if raw == "NA" || raw == "None" {
        return None;
    }
    raw.parse().ok()
}

fn parse_u64(raw: Option<&str>) -> Option<u64> {
    parse_field::<f64>(raw)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
}

/// Parses one line printed through our `--progress-template`.
fn parse_progress_line(line: &str) -> Option<RawProgress> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let mut fields = rest.split_whitespace();

    Some(RawProgress {
        downloaded_bytes: parse_u64(fields.next()),
        total_bytes: parse_u64(fields.next()),
        total_bytes_estimate: parse_u64(fields.next()),
        speed: parse_field::<f64>(fields.next()).filter(|s| s.is_finite() && *s >= 0.0),
        eta: parse_u64(fields.next()),
        filename: None,
    })
}

const UNSUPPORTED_MARKERS: &[&str] = &["unsupported url", "no suitable extractor"];

const NOT_FOUND_MARKERS: &[&str] = &[
    "http error 404",
    "http error 410",
    "video unavailable",
    "does not exist",
    "private video",
    "this track is not available",
    "not available in your country",
    "no video formats found",
    "requested format is not available",
];

const NETWORK_MARKERS: &[&str] = &[
    "unable to download",
    "timed out",
    "connection",
    "network is unreachable",
    "temporary failure in name resolution",
    "name or service not known",
    "getaddrinfo failed",
    "http error 5",
    "http error 429",
    "ssl",
];

/// Maps a failed yt-dlp run onto the error taxonomy.
fn classify_failure(code: Option<i32>, stderr: &str) -> FetchError {
    let reason = stderr
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with("ERROR"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .unwrap_or("yt-dlp failed without output")
        .trim()
        .to_string();
    let lower = reason.to_lowercase();

    if UNSUPPORTED_MARKERS.iter().any(|m| lower.contains(m)) {
        FetchError::UnsupportedSource { reason }
    } else if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        FetchError::NotFound { reason }
    } else if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        FetchError::Network { reason }
    } else {
        FetchError::ToolFailed {
            code,
            stderr: reason,
        }
    }
}

/// Finds the media file (and thumbnail) yt-dlp wrote into `sink_dir`.
async fn locate_outputs(sink_dir: &Path) -> Result<FetchedMedia, FetchError> {
    let mut media = None;
    let mut thumbnail = None;
    let mut entries = tokio::fs::read_dir(sink_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let stem_matches = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s == OUTPUT_STEM)
            .unwrap_or(false);
        if !stem_matches {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if PARTIAL_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        if THUMBNAIL_EXTENSIONS.contains(&ext.as_str()) {
            // Prefer the converted jpg when both exist.
            if thumbnail.is_none() || ext == "jpg" {
                thumbnail = Some(path);
            }
        } else {
            media = Some(path);
        }
    }

    let media_path = media.ok_or_else(|| FetchError::Parse {
        reason: format!("no media file written to {}", sink_dir.display()),
    })?;
    Ok(FetchedMedia {
        media_path,
        thumbnail_path: thumbnail,
    })
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn resolve(&self, source: &SourceRef) -> Result<SourceMetadata, FetchError> {
        let args = self.build_resolve_args(source);
        let stdout = self.run_capture(&args).await?;

        let line = stdout
            .lines()
            .find(|l| l.trim_start().starts_with('{'))
            .ok_or_else(|| FetchError::not_found(format!("no results for {}", source)))?;
        parse_metadata(line)
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        on_progress: &ProgressCallback<'_>,
    ) -> Result<FetchedMedia, FetchError> {
        tokio::fs::create_dir_all(&request.sink_dir).await?;
        let args = self.build_fetch_args(request);
        debug!(?args, "Running yt-dlp download");

        let mut child = self.command(&args).spawn().map_err(|e| self.spawn_error(e))?;
        let stdout = child.stdout.take().ok_or_else(|| FetchError::Parse {
            reason: "yt-dlp stdout was not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| FetchError::Parse {
            reason: "yt-dlp stderr was not captured".to_string(),
        })?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            let Some(progress) = parse_progress_line(&line) else {
                continue;
            };
            if let Err(e) = on_progress(progress) {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(e);
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(classify_failure(status.code(), &stderr));
        }

        locate_outputs(&request.sink_dir).await
    }

    async fn search(
        &self,
        query: &str,
        provider: Provider,
        limit: usize,
    ) -> Result<Vec<SearchResult>, FetchError> {
        let args = self.build_search_args(query, provider, limit);
        let stdout = self.run_capture(&args).await?;

        let entries = stdout.lines().filter_map(|line| {
            match serde_json::from_str::<SearchEntry>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    if !line.trim().is_empty() {
                        warn!(error = %e, "Skipping unparseable search entry");
                    }
                    None
                }
            }
        });
        Ok(filter_entries(query, entries, provider, limit))
    }

    async fn validate(&self) -> Result<(), FetchError> {
        let output = self
            .command(&["--version".to_string()])
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        if output.status.success() {
            debug!(
                version = %String::from_utf8_lossy(&output.stdout).trim(),
                "yt-dlp available"
            );
            Ok(())
        } else {
            Err(classify_failure(
                output.status.code(),
                &String::from_utf8_lossy(&output.stderr),
            ))
        }
    }
}
