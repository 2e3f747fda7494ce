//! Repository-content collaborator

use chrono::{DateTime, Utc};

use crate::error::GitError;
use crate::types::CommitInfo;

/// Read-only access to repository contents.
///
/// Implementations must be usable from several loader threads at once.
pub trait RepoSource: Send + Sync {
    /// Read the file at `path` as of `revision`. Returns `Ok(None)` when the
    /// file does not exist at that revision.
    fn read_file(&self, repo: &str, revision: &str, path: &str)
        -> Result<Option<String>, GitError>;

    /// Commit timestamp of `revision`
    fn commit_timestamp(&self, repo: &str, revision: &str) -> Result<DateTime<Utc>, GitError>;

    /// Commits reachable from the head of `repo` whose timestamp is at or
    /// after `since`, newest first
    fn commits_since(&self, repo: &str, since: DateTime<Utc>) -> Result<Vec<CommitInfo>, GitError>;

    /// Names of all repositories this source can serve
    fn repos(&self) -> Vec<String>;
}
