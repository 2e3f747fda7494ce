//! Named repositories served as a [`RepoSource`]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::debug;

use gantry_core::error::GitError;
use gantry_core::{CommitInfo, RepoSource, SchedulerConfig};

use crate::repository::{GitRepo, Result};

/// Maps repository identifiers to local checkouts.
///
/// Repositories are opened per call so the map can be shared across loader
/// threads.
#[derive(Debug, Clone, Default)]
pub struct RepoMap {
    repos: BTreeMap<String, PathBuf>,
}

impl RepoMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from the `repos` section of the scheduler settings
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            repos: config.repos.clone(),
        }
    }

    /// Register a repository
    pub fn with_repo(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.repos.insert(name.into(), path.into());
        self
    }

    /// Local path of a repository
    pub fn path(&self, name: &str) -> Option<&Path> {
        self.repos.get(name).map(PathBuf::as_path)
    }

    /// Open the named repository
    pub fn repo(&self, name: &str) -> Result<GitRepo> {
        let path = self
            .repos
            .get(name)
            .ok_or_else(|| GitError::UnknownRepo(name.to_string()))?;
        GitRepo::open(path)
    }
}

impl RepoSource for RepoMap {
    fn read_file(&self, repo: &str, revision: &str, path: &str) -> Result<Option<String>> {
        debug!(repo, revision, path, "reading file");
        self.repo(repo)?.read_file_at(revision, path)
    }

    fn commit_timestamp(&self, repo: &str, revision: &str) -> Result<DateTime<Utc>> {
        Ok(self.repo(repo)?.get_commit(revision)?.timestamp)
    }

    fn commits_since(&self, repo: &str, since: DateTime<Utc>) -> Result<Vec<CommitInfo>> {
        self.repo(repo)?.commits_since_time(since)
    }

    fn repos(&self) -> Vec<String> {
        self.repos.keys().cloned().collect()
    }
}
