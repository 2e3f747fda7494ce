//! Per-commit cache of parsed tasks files

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use gantry_core::error::GitError;
use gantry_core::{RepoSource, RepoState};

use crate::specs::{parse_tasks_cfg, JobSpec, SpecError, TaskSpec, TasksCfg, TASKS_CFG_FILE};

#[derive(Debug, Clone)]
enum CacheEntry {
    Valid(Arc<TasksCfg>),
    Rejected(SpecError),
}

impl CacheEntry {
    fn to_result(&self, rs: &RepoState) -> Result<Arc<TasksCfg>, CacheError> {
        match self {
            CacheEntry::Valid(cfg) => Ok(Arc::clone(cfg)),
            CacheEntry::Rejected(reason) => Err(CacheError::InvalidConfig {
                repo_state: rs.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Last time each commit and spec name was seen in a loaded config
#[derive(Debug, Default)]
struct RecentIndex {
    commits: HashMap<String, DateTime<Utc>>,
    task_specs: HashMap<String, DateTime<Utc>>,
    job_specs: HashMap<String, DateTime<Utc>>,
}

fn bump(map: &mut HashMap<String, DateTime<Utc>>, key: &str, ts: DateTime<Utc>) {
    match map.get_mut(key) {
        Some(existing) if *existing >= ts => {}
        Some(existing) => *existing = ts,
        None => {
            map.insert(key.to_string(), ts);
        }
    }
}

fn prune(map: &mut HashMap<String, DateTime<Utc>>, cutoff: DateTime<Utc>) -> usize {
    let before = map.len();
    map.retain(|_, ts| *ts >= cutoff);
    before - map.len()
}

fn sorted_keys(map: &HashMap<String, DateTime<Utc>>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

/// Snapshot of recently seen names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecentNames {
    /// Job spec names
    pub jobs: Vec<String>,
    /// Task spec names
    pub tasks: Vec<String>,
    /// Revisions
    pub commits: Vec<String>,
}

/// Statistics from a cleanup sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupStats {
    /// Cache entries removed
    pub entries_removed: usize,
    /// Cache entries kept
    pub entries_kept: usize,
    /// Recency entries removed, across commits, task and job names
    pub recent_removed: usize,
}

/// Lazily loads and memoizes the tasks file for each [`RepoState`].
///
/// Rejected configs are cached too, so a broken commit is only fetched once.
pub struct TaskCfgCache {
    source: Arc<dyn RepoSource>,
    cache: Mutex<HashMap<RepoState, CacheEntry>>,
    recent: RwLock<RecentIndex>,
}

impl TaskCfgCache {
    /// Create an empty cache reading through `source`
    pub fn new(source: Arc<dyn RepoSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(HashMap::new()),
            recent: RwLock::new(RecentIndex::default()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RepoState, CacheEntry>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of cached entries, valid or rejected
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the config for a repo state, loading it on a miss.
    ///
    /// A missing tasks file yields an empty config. Configs for patched
    /// states are read from the base revision but cached under the full key.
    pub fn get(&self, rs: &RepoState) -> Result<Arc<TasksCfg>, CacheError> {
        if let Some(entry) = self.entries().get(rs) {
            debug!(repo_state = %rs, "tasks cfg cache hit");
            return entry.to_result(rs);
        }

        debug!(repo_state = %rs, "tasks cfg cache miss");
        let (loaded, committed) = self.load(rs)?;

        let (entry, inserted) = {
            let mut cache = self.entries();
            match cache.get(rs) {
                Some(existing) => (existing.clone(), false),
                None => {
                    cache.insert(rs.clone(), loaded.clone());
                    (loaded, true)
                }
            }
        };

        match (&entry, committed) {
            (CacheEntry::Valid(cfg), Some(committed)) if inserted => {
                self.record_recent(&rs.revision, cfg, committed);
            }
            (CacheEntry::Rejected(reason), _) if inserted => {
                warn!(repo_state = %rs, error = %reason, "rejected tasks cfg");
            }
            _ => {}
        }

        entry.to_result(rs)
    }

    /// Fetch and parse the tasks file. Valid configs come back with their
    /// commit timestamp, so a failed lookup leaves nothing cached.
    fn load(&self, rs: &RepoState) -> Result<(CacheEntry, Option<DateTime<Utc>>), CacheError> {
        let cfg = match self.source.read_file(&rs.repo, &rs.revision, TASKS_CFG_FILE)? {
            Some(contents) => match parse_tasks_cfg(&contents) {
                Ok(cfg) => cfg,
                Err(e) => return Ok((CacheEntry::Rejected(e), None)),
            },
            None => {
                debug!(repo_state = %rs, "no tasks cfg at revision");
                TasksCfg::default()
            }
        };

        let committed = self.source.commit_timestamp(&rs.repo, &rs.revision)?;
        Ok((CacheEntry::Valid(Arc::new(cfg)), Some(committed)))
    }

    fn record_recent(&self, revision: &str, cfg: &TasksCfg, committed: DateTime<Utc>) {
        let mut recent = self.recent.write().unwrap_or_else(|e| e.into_inner());
        bump(&mut recent.commits, revision, committed);
        for name in cfg.tasks.keys() {
            bump(&mut recent.task_specs, name, committed);
        }
        for name in cfg.jobs.keys() {
            bump(&mut recent.job_specs, name, committed);
        }
    }

    /// Task specs for each of the given repo states, as owned copies
    pub fn task_specs_for_repo_states(
        &self,
        repo_states: &[RepoState],
    ) -> Result<HashMap<RepoState, BTreeMap<String, TaskSpec>>, CacheError> {
        let mut specs = HashMap::with_capacity(repo_states.len());
        for rs in repo_states {
            let cfg = self.get(rs)?;
            specs.insert(rs.clone(), cfg.tasks.clone());
        }
        Ok(specs)
    }

    /// A copy of one task spec
    pub fn task_spec(&self, rs: &RepoState, name: &str) -> Result<TaskSpec, CacheError> {
        self.get(rs)?
            .tasks
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::NoSuchTaskSpec {
                repo_state: rs.clone(),
                name: name.to_string(),
            })
    }

    /// A copy of one job spec
    pub fn job_spec(&self, rs: &RepoState, name: &str) -> Result<JobSpec, CacheError> {
        self.get(rs)?
            .jobs
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::NoSuchJobSpec {
                repo_state: rs.clone(),
                name: name.to_string(),
            })
    }

    /// Sorted names of recently seen jobs, tasks and commits
    pub fn recent_names(&self) -> RecentNames {
        let recent = self.recent.read().unwrap_or_else(|e| e.into_inner());
        RecentNames {
            jobs: sorted_keys(&recent.job_specs),
            tasks: sorted_keys(&recent.task_specs),
            commits: sorted_keys(&recent.commits),
        }
    }

    /// Drop everything older than `window` before now
    pub fn cleanup(&self, window: Duration) -> Result<CleanupStats, CacheError> {
        let window = chrono::Duration::from_std(window).map_err(|_| CacheError::InvalidWindow)?;
        self.cleanup_before(Utc::now() - window)
    }

    /// Drop cache and recency entries whose commit timestamp is strictly
    /// before `cutoff`.
    ///
    /// Entries whose commit can no longer be resolved are dropped as well.
    #[instrument(skip(self))]
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<CleanupStats, CacheError> {
        let mut stats = CleanupStats::default();
        let mut cache = self.entries();

        let mut expired = Vec::new();
        for rs in cache.keys() {
            match self.source.commit_timestamp(&rs.repo, &rs.revision) {
                Ok(ts) if ts < cutoff => expired.push(rs.clone()),
                Ok(_) => {}
                Err(e) => {
                    warn!(repo_state = %rs, error = %e, "cannot resolve commit, evicting");
                    expired.push(rs.clone());
                }
            }
        }
        for rs in &expired {
            cache.remove(rs);
        }
        stats.entries_removed = expired.len();
        stats.entries_kept = cache.len();

        {
            let mut recent = self.recent.write().unwrap_or_else(|e| e.into_inner());
            stats.recent_removed = prune(&mut recent.commits, cutoff)
                + prune(&mut recent.task_specs, cutoff)
                + prune(&mut recent.job_specs, cutoff);
        }
        drop(cache);

        info!(
            removed = stats.entries_removed,
            kept = stats.entries_kept,
            recent_removed = stats.recent_removed,
            "tasks cfg cache cleaned up"
        );
        Ok(stats)
    }
}

impl std::fmt::Debug for TaskCfgCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCfgCache")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

/// Config cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The tasks file at this state failed validation
    #[error("Invalid tasks cfg at {repo_state}: {reason}")]
    InvalidConfig {
        repo_state: RepoState,
        reason: SpecError,
    },

    /// Reading the repository failed
    #[error(transparent)]
    Source(#[from] GitError),

    /// Task spec not declared at this state
    #[error("No such task spec: {name} @ {repo_state}")]
    NoSuchTaskSpec { repo_state: RepoState, name: String },

    /// Job spec not declared at this state
    #[error("No such job spec: {name} @ {repo_state}")]
    NoSuchJobSpec { repo_state: RepoState, name: String },

    /// Cleanup window does not fit in a timestamp offset
    #[error("Cleanup window is out of range")]
    InvalidWindow,
}
