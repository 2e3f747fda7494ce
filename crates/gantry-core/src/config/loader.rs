//! Settings loading

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};

use super::defaults::config_file_names;
use super::types::SchedulerConfig;
use super::validation::validate_config;

/// Load settings from a file
pub fn load_config(path: &Path) -> Result<SchedulerConfig> {
    let format = if path.extension().is_some_and(|e| e == "toml") {
        "TOML"
    } else {
        "YAML"
    };
    info!(path = %path.display(), format, "loading config");

    let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;

    let mut config: SchedulerConfig = if format == "TOML" {
        toml::from_str(&content).map_err(ConfigError::TomlError)?
    } else {
        serde_yaml::from_str(&content).map_err(ConfigError::YamlError)?
    };

    // Relative repository paths are relative to the settings file.
    if let Some(base) = path.parent() {
        for repo_path in config.repos.values_mut() {
            if repo_path.is_relative() {
                *repo_path = base.join(&*repo_path);
            }
        }
    }

    validate_config(&config)?;
    debug!(path = %path.display(), repos = config.repos.len(), "config loaded and validated");
    Ok(config)
}

/// Find a settings file in the directory or its parents.
///
/// At each directory level the search checks `<dir>/<name>` and then
/// `<dir>/.github/<name>`. The first match wins.
pub fn find_config(start_dir: &Path) -> Option<PathBuf> {
    debug!(start_dir = %start_dir.display(), "searching for config file");
    let mut current = start_dir.to_path_buf();

    loop {
        for name in config_file_names() {
            let config_path = current.join(name);
            if config_path.exists() {
                info!(path = %config_path.display(), "found config file");
                return Some(config_path);
            }

            let github_path = current.join(".github").join(name);
            if github_path.exists() {
                info!(path = %github_path.display(), "found config file in .github/");
                return Some(github_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    debug!("no config file found");
    None
}

/// Load settings from directory (searching parent directories)
pub fn load_config_from_dir(dir: &Path) -> Result<(SchedulerConfig, PathBuf)> {
    let config_path = find_config(dir).ok_or_else(|| ConfigError::NotFound(dir.to_path_buf()))?;

    let config = load_config(&config_path)?;
    Ok((config, config_path))
}

/// Load settings or use defaults
pub fn load_config_or_default(dir: &Path) -> (SchedulerConfig, Option<PathBuf>) {
    match load_config_from_dir(dir) {
        Ok((config, path)) => (config, Some(path)),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "no usable config found, using defaults");
            (SchedulerConfig::default(), None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_config_toml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.toml");
        std::fs::write(&config_path, "[scheduling]\nconcurrency = 4").unwrap();

        let found = find_config(temp.path());
        assert_eq!(found, Some(config_path));
    }

    #[test]
    fn test_find_config_prefers_toml_over_yaml() {
        let temp = TempDir::new().unwrap();
        let toml_path = temp.path().join("gantry.toml");
        let yaml_path = temp.path().join("gantry.yaml");
        std::fs::write(&toml_path, "[scheduling]\nconcurrency = 4").unwrap();
        std::fs::write(&yaml_path, "scheduling:\n  concurrency: 4").unwrap();

        let found = find_config(temp.path()).unwrap();
        assert_eq!(found, toml_path);
    }

    #[test]
    fn test_find_config_in_github_dir() {
        let temp = TempDir::new().unwrap();
        let github_dir = temp.path().join(".github");
        std::fs::create_dir_all(&github_dir).unwrap();
        let config_path = github_dir.join("gantry.toml");
        std::fs::write(&config_path, "[scheduling]\nconcurrency = 4").unwrap();

        assert_eq!(find_config(temp.path()), Some(config_path));
    }

    #[test]
    fn test_load_config_yaml() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.yaml");
        std::fs::write(
            &config_path,
            "scheduling:\n  window_hours: 48\nbackend:\n  user: ci-bot\n",
        )
        .unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.scheduling.window_hours, 48);
        assert_eq!(config.backend.user, "ci-bot");
    }

    #[test]
    fn test_relative_repo_paths_resolved() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.toml");
        std::fs::write(&config_path, "[repos]\n\"skia.git\" = \"checkouts/skia\"\n").unwrap();

        let config = load_config(&config_path).unwrap();
        assert_eq!(config.repos["skia.git"], temp.path().join("checkouts/skia"));
    }

    #[test]
    fn test_load_invalid_config_fails() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("gantry.toml");
        std::fs::write(&config_path, "[scheduling]\nconcurrency = 0\n").unwrap();

        assert!(load_config(&config_path).is_err());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let temp = TempDir::new().unwrap();
        let (config, path) = load_config_or_default(temp.path());
        assert!(path.is_none());
        assert_eq!(config.scheduling.concurrency, 8);
    }
}
