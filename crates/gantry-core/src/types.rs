//! Core types for Gantry

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An unlanded change applied on top of a revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Patch {
    /// Code review server
    pub server: String,
    /// Issue (change) number on the server
    pub issue: String,
    /// Patchset within the issue
    pub patchset: String,
}

impl Patch {
    /// Create a new patch identity
    pub fn new(
        server: impl Into<String>,
        issue: impl Into<String>,
        patchset: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            issue: issue.into(),
            patchset: patchset.into(),
        }
    }

    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.server.is_empty() && self.issue.is_empty() && self.patchset.is_empty()
    }
}

/// A repository at a specific revision, optionally with a patch applied.
///
/// This is the key for cached configs and part of every task's identity.
/// Two states that differ only in their patch are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoState {
    /// Repository identifier
    pub repo: String,
    /// Commit hash
    pub revision: String,
    /// Optional unlanded change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
}

impl RepoState {
    /// Create a repo state for a landed revision
    pub fn new(repo: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            revision: revision.into(),
            patch: None,
        }
    }

    /// Attach a patch
    pub fn with_patch(mut self, patch: Patch) -> Self {
        self.patch = if patch.is_empty() { None } else { Some(patch) };
        self
    }

    /// Whether this state carries an unlanded change
    pub fn is_try_job(&self) -> bool {
        self.patch.is_some()
    }
}

impl fmt::Display for RepoState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.revision)?;
        if let Some(patch) = &self.patch {
            write!(f, "+{}/{}/{}", patch.server, patch.issue, patch.patchset)?;
        }
        Ok(())
    }
}

/// Information about a git commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Commit hash (full)
    pub hash: String,
    /// Short hash (first 7 characters)
    pub short_hash: String,
    /// Commit message (first line)
    pub message: String,
    /// Author name
    pub author: String,
    /// Commit timestamp
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    /// Create a new CommitInfo
    pub fn new(
        hash: impl Into<String>,
        message: impl Into<String>,
        author: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let hash = hash.into();
        let short_hash = hash.chars().take(7).collect();

        Self {
            hash,
            short_hash,
            message: message.into(),
            author: author.into(),
            timestamp,
        }
    }
}
