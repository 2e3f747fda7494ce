//! In-memory collaborators shared by the unit tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};

use gantry_core::error::GitError;
use gantry_core::{CommitInfo, RepoSource};

use crate::specs::TASKS_CFG_FILE;

pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

#[derive(Debug, Clone)]
struct FakeCommit {
    hash: String,
    timestamp: DateTime<Utc>,
    files: HashMap<String, String>,
}

/// Repositories held entirely in memory. Commits are stored oldest first.
#[derive(Debug, Default)]
pub(crate) struct FakeRepos {
    repos: Mutex<BTreeMap<String, Vec<FakeCommit>>>,
    reads: AtomicUsize,
}

impl FakeRepos {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_commit(&self, repo: &str, hash: &str, secs: i64, tasks_json: Option<&str>) {
        let mut files = HashMap::new();
        if let Some(contents) = tasks_json {
            files.insert(TASKS_CFG_FILE.to_string(), contents.to_string());
        }
        self.repos
            .lock()
            .unwrap()
            .entry(repo.to_string())
            .or_default()
            .push(FakeCommit {
                hash: hash.to_string(),
                timestamp: ts(secs),
                files,
            });
    }

    pub(crate) fn forget_commit(&self, repo: &str, hash: &str) {
        if let Some(commits) = self.repos.lock().unwrap().get_mut(repo) {
            commits.retain(|c| c.hash != hash);
        }
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn commit(&self, repo: &str, revision: &str) -> Result<FakeCommit, GitError> {
        let repos = self.repos.lock().unwrap();
        let commits = repos
            .get(repo)
            .ok_or_else(|| GitError::UnknownRepo(repo.to_string()))?;
        commits
            .iter()
            .find(|c| c.hash == revision)
            .cloned()
            .ok_or_else(|| GitError::RevisionNotFound {
                repo: repo.to_string(),
                revision: revision.to_string(),
            })
    }
}

impl RepoSource for FakeRepos {
    fn read_file(&self, repo: &str, revision: &str, path: &str) -> Result<Option<String>, GitError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.commit(repo, revision)?.files.get(path).cloned())
    }

    fn commit_timestamp(&self, repo: &str, revision: &str) -> Result<DateTime<Utc>, GitError> {
        Ok(self.commit(repo, revision)?.timestamp)
    }

    fn commits_since(&self, repo: &str, since: DateTime<Utc>) -> Result<Vec<CommitInfo>, GitError> {
        let repos = self.repos.lock().unwrap();
        let commits = repos
            .get(repo)
            .ok_or_else(|| GitError::UnknownRepo(repo.to_string()))?;
        Ok(commits
            .iter()
            .rev()
            .filter(|c| c.timestamp >= since)
            .map(|c| CommitInfo::new(c.hash.clone(), "commit", "Test", c.timestamp))
            .collect())
    }

    fn repos(&self) -> Vec<String> {
        self.repos.lock().unwrap().keys().cloned().collect()
    }
}

/// Tasks file with `A` and `B` (depending on `A`) under job `J`
pub(crate) const AB_TASKS_JSON: &str = r#"{
    "tasks": {
        "A": {"dimensions": ["os:Linux"], "isolate": "a.isolate", "priority": 0.8},
        "B": {"dependencies": ["A"], "dimensions": ["os:Linux"], "isolate": "b.isolate"}
    },
    "jobs": {
        "J": {"priority": 0.5, "tasks": ["B"]}
    }
}"#;
