//! Settings validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::SchedulerConfig;

/// Longest accepted scheduling window, in hours
pub const MAX_WINDOW_HOURS: u64 = 24 * 365;

/// Longest accepted score half-life, in hours
pub const MAX_DECAY_HALF_LIFE_HOURS: f64 = 24.0 * 365.0;

/// Validate scheduler settings
pub fn validate_config(config: &SchedulerConfig) -> Result<()> {
    debug!("validating configuration");
    validate_scheduling(config)?;
    validate_backend(config)?;
    validate_repos(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn validate_scheduling(config: &SchedulerConfig) -> Result<()> {
    let scheduling = &config.scheduling;
    if scheduling.window_hours == 0 {
        return Err(invalid("scheduling.window_hours", "must be greater than zero").into());
    }
    if scheduling.window_hours > MAX_WINDOW_HOURS {
        return Err(invalid(
            "scheduling.window_hours",
            &format!("must be at most {} hours", MAX_WINDOW_HOURS),
        )
        .into());
    }

    if !scheduling.decay_half_life_hours.is_finite() || scheduling.decay_half_life_hours <= 0.0 {
        return Err(invalid(
            "scheduling.decay_half_life_hours",
            "must be a positive number of hours",
        )
        .into());
    }
    if scheduling.decay_half_life_hours > MAX_DECAY_HALF_LIFE_HOURS {
        return Err(invalid(
            "scheduling.decay_half_life_hours",
            &format!("must be at most {} hours", MAX_DECAY_HALF_LIFE_HOURS),
        )
        .into());
    }

    if scheduling.concurrency == 0 {
        return Err(invalid("scheduling.concurrency", "must be greater than zero").into());
    }

    Ok(())
}

fn validate_backend(config: &SchedulerConfig) -> Result<()> {
    let backend = &config.backend;
    let timeouts = [
        ("backend.expiration_secs", backend.expiration_secs),
        ("backend.execution_timeout_secs", backend.execution_timeout_secs),
        ("backend.io_timeout_secs", backend.io_timeout_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            return Err(invalid(field, "must be greater than zero").into());
        }
    }

    if backend.user.trim().is_empty() {
        return Err(invalid("backend.user", "user cannot be empty").into());
    }

    Ok(())
}

fn validate_repos(config: &SchedulerConfig) -> Result<()> {
    if !config.repos.is_empty() {
        debug!(count = config.repos.len(), "validating repos");
    }
    for (name, path) in &config.repos {
        if name.trim().is_empty() {
            return Err(invalid("repos", "repository name cannot be empty").into());
        }
        if path.as_os_str().is_empty() {
            return Err(invalid(&format!("repos.{}", name), "path cannot be empty").into());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        let config = SchedulerConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_window() {
        let mut config = SchedulerConfig::default();
        config.scheduling.window_hours = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_bad_half_life() {
        let mut config = SchedulerConfig::default();
        config.scheduling.decay_half_life_hours = f64::NAN;
        assert!(validate_config(&config).is_err());

        config.scheduling.decay_half_life_hours = -1.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_window_upper_bound() {
        let mut config = SchedulerConfig::default();
        config.scheduling.window_hours = MAX_WINDOW_HOURS;
        assert!(validate_config(&config).is_ok());

        config.scheduling.window_hours = MAX_WINDOW_HOURS + 1;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("scheduling.window_hours"));

        config.scheduling.window_hours = u64::MAX / 100;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_half_life_upper_bound() {
        let mut config = SchedulerConfig::default();
        config.scheduling.decay_half_life_hours = MAX_DECAY_HALF_LIFE_HOURS;
        assert!(validate_config(&config).is_ok());

        config.scheduling.decay_half_life_hours = 1e300;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("scheduling.decay_half_life_hours"));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = SchedulerConfig::default();
        config.backend.io_timeout_secs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("backend.io_timeout_secs"));
    }

    #[test]
    fn test_validate_empty_repo_path() {
        let mut config = SchedulerConfig::default();
        config.repos.insert("skia.git".to_string(), PathBuf::new());
        assert!(validate_config(&config).is_err());
    }
}
