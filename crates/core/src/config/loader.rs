use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix of environment overrides, e.g. `TONEFETCH_ENGINE__MAX_CONCURRENT_JOBS=4`.
pub const ENV_PREFIX: &str = "TONEFETCH_";

fn env_provider() -> Env {
    // Keys contain single underscores, so sections are split on `__`.
    Env::prefixed(ENV_PREFIX).split("__")
}

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::AudioFormat;
    use crate::fetcher::Provider;
    use crate::job::CollisionPolicy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[engine]
max_concurrent_jobs = 5

[engine.retry]
max_attempts = 4
initial_delay_ms = 250

[fetcher]
default_provider = "youtube"

[defaults]
format = "flac"
collision_policy = "skip"
create_artist_folders = true
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.engine.max_concurrent_jobs, 5);
        assert_eq!(config.engine.retry.max_attempts, 4);
        assert_eq!(config.engine.retry.initial_delay_ms, 250);
        assert_eq!(config.fetcher.default_provider, Provider::YouTube);
        assert_eq!(config.defaults.format, AudioFormat::Flac);
        assert_eq!(config.defaults.collision_policy, CollisionPolicy::Skip);
        assert!(config.defaults.create_artist_folders);
    }

    #[test]
    fn test_load_config_from_str_empty_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_config_from_str_bad_value() {
        let toml = r#"
[defaults]
format = "ogg"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[converter]
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"
timeout_secs = 90

[defaults]
bitrate_kbps = 192
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.converter.timeout_secs, 90);
        assert_eq!(
            config.converter.ffmpeg_path.to_string_lossy(),
            "/opt/ffmpeg/bin/ffmpeg"
        );
        assert_eq!(config.defaults.bitrate_kbps, 192);
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "tonefetch.toml",
                r#"
[engine]
max_concurrent_jobs = 2
"#,
            )?;
            jail.set_env("TONEFETCH_ENGINE__MAX_CONCURRENT_JOBS", "7");
            jail.set_env("TONEFETCH_DEFAULTS__FORMAT", "m4a");

            let config = load_config(Path::new("tonefetch.toml"))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.engine.max_concurrent_jobs, 7);
            assert_eq!(config.defaults.format, AudioFormat::M4a);
            Ok(())
        });
    }
}
