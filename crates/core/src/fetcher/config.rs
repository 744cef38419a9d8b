//! Configuration for the yt-dlp fetcher.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::types::Provider;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Path to the yt-dlp binary.
    #[serde(default = "default_yt_dlp_path")]
    pub yt_dlp_path: PathBuf,

    /// Passed as `--socket-timeout`.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_secs: u64,

    /// Passed as `--retries` and `--fragment-retries`.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Provider used for plain-text queries.
    #[serde(default)]
    pub default_provider: Provider,

    /// Upper bound for a single resolve or search call.
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: u64,
}

fn default_yt_dlp_path() -> PathBuf {
    PathBuf::from("yt-dlp")
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_resolve_timeout() -> u64 {
    120
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: default_yt_dlp_path(),
            socket_timeout_secs: default_socket_timeout(),
            retries: default_retries(),
            default_provider: Provider::default(),
            resolve_timeout_secs: default_resolve_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FetcherConfig::default();
        assert_eq!(config.yt_dlp_path, PathBuf::from("yt-dlp"));
        assert_eq!(config.socket_timeout_secs, 30);
        assert_eq!(config.retries, 3);
        assert_eq!(config.default_provider, Provider::SoundCloud);
    }

    #[test]
    fn test_partial_toml() {
        let config: FetcherConfig = toml::from_str(r#"default_provider = "youtube""#).unwrap();
        assert_eq!(config.default_provider, Provider::YouTube);
        assert_eq!(config.retries, 3);
    }
}
