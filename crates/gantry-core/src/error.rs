//! Error types for Gantry

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using GantryError
pub type Result<T> = std::result::Result<T, GantryError>;

/// Main error type for Gantry operations
#[derive(Debug, Error)]
pub enum GantryError {
    /// Settings-related errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Repository-related errors
    #[error(transparent)]
    Git(#[from] GitError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Scheduler settings errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings file not found
    #[error("Configuration file not found at {0}")]
    NotFound(PathBuf),

    /// Failed to parse settings
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid settings value
    #[error("Invalid configuration: {field} - {message}")]
    InvalidValue { field: String, message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// IO error
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
}

/// Repository access errors
#[derive(Debug, Error)]
pub enum GitError {
    /// Repository not found
    #[error("Git repository not found at {0}")]
    RepositoryNotFound(PathBuf),

    /// Not a git repository
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    /// Failed to open repository
    #[error("Failed to open repository: {0}")]
    OpenFailed(String),

    /// Repository name is not configured
    #[error("Unknown repository: {0}")]
    UnknownRepo(String),

    /// Revision does not resolve to a commit
    #[error("Revision {revision} not found in {repo}")]
    RevisionNotFound { repo: String, revision: String },

    /// File contents are not valid UTF-8
    #[error("{path} at {revision} is not valid UTF-8")]
    InvalidUtf8 { revision: String, path: String },

    /// No commits found
    #[error("No commits found in repository")]
    NoCommits,

    /// Git2 library error
    #[error("Git error: {0}")]
    Git2(#[from] git2::Error),
}

impl GantryError {
    /// Create a new "other" error with a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: GantryError = ConfigError::InvalidValue {
            field: "scheduling.concurrency".to_string(),
            message: "must be greater than zero".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: scheduling.concurrency - must be greater than zero"
        );
    }

    #[test]
    fn test_revision_not_found_message() {
        let err = GitError::RevisionNotFound {
            repo: "skia.git".to_string(),
            revision: "abc123".to_string(),
        };
        assert_eq!(err.to_string(), "Revision abc123 not found in skia.git");
    }
}
