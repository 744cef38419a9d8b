//! Relevance filtering for flat search results.

use serde::Deserialize;

use super::types::{Provider, SearchResult};

/// Length of the normalized title prefix used to detect duplicates.
const DEDUP_KEY_CHARS: usize = 30;

/// One entry of `yt-dlp --flat-playlist --dump-json` output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Formats seconds as `m:ss`, or `--:--` when unknown.
pub fn format_duration(secs: Option<u64>) -> String {
    match secs {
        Some(secs) if secs > 0 => format!("{}:{:02}", secs / 60, secs % 60),
        _ => "--:--".to_string(),
    }
}

/// Title words that mark alternate versions. A word the query itself
/// mentions is not filtered.
fn skip_keywords(query: &str) -> Vec<&'static str> {
    let query = query.to_lowercase();
    let mut skip = Vec::new();
    if !query.contains("cover") {
        skip.push("cover");
    }
    if !query.contains("remix") {
        skip.push("remix");
    }
    if !query.contains("karaoke") {
        skip.extend(["karaoke", "instrumental"]);
    }
    if !query.contains("live") {
        skip.push("live");
    }
    skip
}

fn dedup_key(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(DEDUP_KEY_CHARS)
        .collect()
}

fn first_non_empty(candidates: &[&Option<String>]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|c| c.as_deref())
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Drops alternate versions and near-duplicate titles, keeping at most `limit`.
pub fn filter_entries(
    query: &str,
    entries: impl IntoIterator<Item = SearchEntry>,
    provider: Provider,
    limit: usize,
) -> Vec<SearchResult> {
    let skip = skip_keywords(query);
    let mut seen = std::collections::HashSet::new();
    let mut results = Vec::new();

    for entry in entries {
        if results.len() >= limit {
            break;
        }

        let title = entry
            .title
            .clone()
            .unwrap_or_else(|| "Unknown".to_string());
        let title_lower = title.to_lowercase();
        if skip.iter().any(|kw| title_lower.contains(kw)) {
            continue;
        }
        if !seen.insert(dedup_key(&title)) {
            continue;
        }

        let duration_secs = entry.duration.filter(|d| *d > 0.0).map(|d| d as u64);
        let artist = first_non_empty(&[
            &entry.artist,
            &entry.creator,
            &entry.uploader,
            &entry.channel,
        ])
        .unwrap_or_else(|| "Unknown".to_string());

        results.push(SearchResult {
            id: entry.id.clone().unwrap_or_default(),
            title,
            artist,
            duration_secs,
            duration: format_duration(duration_secs),
            url: first_non_empty(&[&entry.url, &entry.webpage_url]).unwrap_or_default(),
            thumbnail_url: entry.thumbnail.clone(),
            provider,
        });
    }

    results
}
