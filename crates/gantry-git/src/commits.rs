//! Commit history operations

use chrono::{DateTime, TimeZone, Utc};
use git2::Sort;

use crate::repository::{GitRepo, Result};
use gantry_core::CommitInfo;

impl GitRepo {
    /// Commits reachable from HEAD with a timestamp at or after `since`,
    /// newest first
    pub fn commits_since_time(&self, since: DateTime<Utc>) -> Result<Vec<CommitInfo>> {
        let head = self.head_commit()?;

        let mut revwalk = self.repo.revwalk()?;
        revwalk.set_sorting(Sort::TIME)?;
        revwalk.push(head.id())?;

        let mut commits = Vec::new();

        for oid in revwalk {
            let oid = oid?;
            let commit = self.repo.find_commit(oid)?;
            let info = commit_to_info(&commit);
            if info.timestamp < since {
                break;
            }
            commits.push(info);
        }

        Ok(commits)
    }

    /// Get a specific commit by revision
    pub fn get_commit(&self, revision: &str) -> Result<CommitInfo> {
        let commit = self.resolve_commit(revision)?;
        Ok(commit_to_info(&commit))
    }
}

/// Convert a git2 Commit to CommitInfo
fn commit_to_info(commit: &git2::Commit<'_>) -> CommitInfo {
    let hash = commit.id().to_string();
    let author = commit.author();

    let message = commit.summary().unwrap_or("(no message)").to_string();

    let timestamp = Utc
        .timestamp_opt(commit.time().seconds(), 0)
        .single()
        .unwrap_or_else(Utc::now);

    CommitInfo::new(hash, message, author.name().unwrap_or("Unknown"), timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{commit_files, init_repo};

    #[test]
    fn test_commits_since_time() {
        let (temp, raw) = init_repo();
        commit_files(&raw, &[("a.txt", "a")], "old", 1_000);
        let middle = commit_files(&raw, &[("b.txt", "b")], "middle", 2_000);
        let newest = commit_files(&raw, &[("c.txt", "c")], "newest", 3_000);

        let repo = GitRepo::open(temp.path()).unwrap();
        let since = Utc.timestamp_opt(2_000, 0).unwrap();
        let hashes: Vec<String> = repo
            .commits_since_time(since)
            .unwrap()
            .into_iter()
            .map(|c| c.hash)
            .collect();
        assert_eq!(hashes, vec![newest, middle]);
    }

    #[test]
    fn test_get_commit_timestamp() {
        let (temp, raw) = init_repo();
        let hash = commit_files(&raw, &[("a.txt", "a")], "first", 1_234);

        let repo = GitRepo::open(temp.path()).unwrap();
        let info = repo.get_commit(&hash).unwrap();
        assert_eq!(info.timestamp, Utc.timestamp_opt(1_234, 0).unwrap());
        assert_eq!(info.author, "Test");
    }
}
