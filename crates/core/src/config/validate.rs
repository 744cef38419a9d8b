use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - At least one worker
/// - Retry policy makes at least one attempt and never shrinks delays
/// - Converter timeout is not 0
/// - The default output profile (bitrate, templates, cover)
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.engine.max_concurrent_jobs == 0 {
        return Err(ConfigError::ValidationError(
            "engine.max_concurrent_jobs must be at least 1".to_string(),
        ));
    }

    let retry = &config.engine.retry;
    if retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "engine.retry.max_attempts must be at least 1".to_string(),
        ));
    }
    if retry.backoff_multiplier.is_nan() || retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "engine.retry.backoff_multiplier must be >= 1.0".to_string(),
        ));
    }

    if config.converter.timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "converter.timeout_secs cannot be 0".to_string(),
        ));
    }

    config
        .defaults
        .validate()
        .map_err(|e| ConfigError::ValidationError(format!("defaults: {}", e)))?;

    Ok(())
}
