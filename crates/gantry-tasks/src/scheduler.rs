//! Scheduling pass: recent commits in, ranked candidates (and triggered tasks) out

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use gantry_core::{BackendConfig, RepoSource, RepoState, SchedulingConfig};

use crate::backend::ExecutionBackend;
use crate::cache::TaskCfgCache;
use crate::candidate::{sort_candidates, DepsStatus, TaskCandidate};
use crate::reporter::{SchedulerEvent, SchedulerReporter};
use crate::specs::TasksCfg;
use crate::store::{update_task_with_retries, DependencyIndex, StoreError, TaskStore};
use crate::task::{Task, TaskStatus};

/// Options for the task scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Only commits this recent are considered
    pub window: Duration,
    /// Candidate score halves every `decay_half_life` of commit age
    pub decay_half_life: Duration,
    /// Maximum configs loaded in parallel
    pub concurrency: usize,
    /// Maximum tasks triggered per pass
    pub max_tasks_per_pass: usize,
    /// Whether to trigger ready candidates on the backend
    pub submit: bool,
    /// Settings copied into every backend request
    pub backend: BackendConfig,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&SchedulingConfig::default(), &BackendConfig::default())
    }
}

impl SchedulerOptions {
    /// Options from the scheduler settings. Submission starts disabled.
    pub fn from_config(scheduling: &SchedulingConfig, backend: &BackendConfig) -> Self {
        Self {
            window: scheduling.window(),
            decay_half_life: scheduling.decay_half_life(),
            concurrency: scheduling.concurrency,
            max_tasks_per_pass: scheduling.max_tasks_per_pass,
            submit: false,
            backend: backend.clone(),
        }
    }
}

/// Counters for one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub repo_states: usize,
    pub configs_loaded: usize,
    pub configs_rejected: usize,
    pub candidates: usize,
    pub ready: usize,
    pub waiting: usize,
    /// Candidates whose commit already has a task
    pub skipped: usize,
    pub triggered: usize,
    pub trigger_failures: usize,
    /// Candidates deferred because the store failed
    pub store_errors: usize,
}

/// Result of a pass
#[derive(Debug, Clone)]
pub struct PassOutcome {
    pub summary: PassSummary,
    /// Ready candidates in scheduling order, including triggered ones
    pub ready: Vec<TaskCandidate>,
    /// Tasks created this pass
    pub triggered: Vec<Task>,
}

/// Builds, ranks and optionally submits task candidates
pub struct TaskScheduler {
    options: SchedulerOptions,
    source: Arc<dyn RepoSource>,
    cache: Arc<TaskCfgCache>,
    store: Arc<dyn TaskStore>,
    index: Arc<dyn DependencyIndex>,
    backend: Option<Arc<dyn ExecutionBackend>>,
    reporter: Arc<dyn SchedulerReporter>,
}

impl TaskScheduler {
    /// Create a new scheduler with its own config cache
    pub fn new(
        options: SchedulerOptions,
        source: Arc<dyn RepoSource>,
        store: Arc<dyn TaskStore>,
        index: Arc<dyn DependencyIndex>,
        reporter: Arc<dyn SchedulerReporter>,
    ) -> Self {
        let cache = Arc::new(TaskCfgCache::new(Arc::clone(&source)));
        Self {
            options,
            source,
            cache,
            store,
            index,
            backend: None,
            reporter,
        }
    }

    /// Trigger ready candidates through `backend`
    pub fn with_backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// The config cache used by this scheduler
    pub fn cache(&self) -> &Arc<TaskCfgCache> {
        &self.cache
    }

    /// Run one pass with `now` as the reference time
    #[instrument(skip(self))]
    pub async fn run_pass(&self, now: DateTime<Utc>) -> Result<PassOutcome, SchedulerError> {
        let start = Instant::now();
        let mut summary = PassSummary::default();

        let repo_states = self.recent_repo_states(now).await?;
        summary.repo_states = repo_states.len();
        self.reporter.report(&SchedulerEvent::PassStarted {
            repo_states: repo_states.len(),
        });

        let configs = self.load_configs(repo_states, &mut summary).await?;

        let mut ready = Vec::new();
        for (rs, committed, cfg) in &configs {
            for (name, spec) in &cfg.tasks {
                summary.candidates += 1;
                let mut candidate =
                    TaskCandidate::new(rs.clone(), name.clone(), spec.clone(), *committed);

                match self.check_existing(&mut candidate) {
                    Ok(true) => {}
                    Ok(false) => {
                        summary.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(candidate = %candidate.id(), error = %e, "deferring candidate");
                        summary.store_errors += 1;
                        continue;
                    }
                }

                candidate.compute_score(now, self.options.decay_half_life);

                match candidate.resolve_deps(self.index.as_ref()) {
                    Ok(DepsStatus::Ready { .. }) => {
                        self.reporter.report(&SchedulerEvent::CandidateReady {
                            candidate_id: candidate.id(),
                            score: candidate.score,
                        });
                        ready.push(candidate);
                    }
                    Ok(DepsStatus::Waiting { dependency, reason }) => {
                        summary.waiting += 1;
                        self.reporter.report(&SchedulerEvent::CandidateWaiting {
                            candidate_id: candidate.id(),
                            dependency,
                            reason,
                        });
                    }
                    Err(e) => {
                        warn!(candidate = %candidate.id(), error = %e, "deferring candidate");
                        summary.store_errors += 1;
                    }
                }
            }
        }

        sort_candidates(&mut ready);
        summary.ready = ready.len();

        let mut triggered = Vec::new();
        if self.options.submit {
            if let Some(backend) = &self.backend {
                for candidate in ready.iter().take(self.options.max_tasks_per_pass) {
                    match self.trigger(backend.as_ref(), candidate) {
                        Ok(task) => {
                            summary.triggered += 1;
                            self.reporter.report(&SchedulerEvent::TaskTriggered {
                                candidate_id: candidate.id(),
                                task_id: task.id.clone(),
                                backend_task_id: task.backend_task_id.clone(),
                            });
                            triggered.push(task);
                        }
                        Err(e) => {
                            summary.trigger_failures += 1;
                            self.reporter.report(&SchedulerEvent::TriggerFailed {
                                candidate_id: candidate.id(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
            } else {
                warn!("submission enabled without an execution backend");
            }
        }

        self.reporter.report(&SchedulerEvent::PassCompleted {
            candidates: summary.candidates,
            ready: summary.ready,
            triggered: summary.triggered,
            duration: start.elapsed(),
        });

        Ok(PassOutcome {
            summary,
            ready,
            triggered,
        })
    }

    /// Commits inside the window for every repository, newest first per repo
    async fn recent_repo_states(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(RepoState, DateTime<Utc>)>, SchedulerError> {
        let window = chrono::Duration::from_std(self.options.window)
            .map_err(|_| SchedulerError::InvalidWindow)?;
        let since = now - window;
        let source = Arc::clone(&self.source);

        let states = tokio::task::spawn_blocking(move || {
            let mut states = Vec::new();
            for repo in source.repos() {
                match source.commits_since(&repo, since) {
                    Ok(commits) => {
                        debug!(repo = %repo, commits = commits.len(), "listed recent commits");
                        states.extend(
                            commits
                                .into_iter()
                                .map(|c| (RepoState::new(repo.clone(), c.hash), c.timestamp)),
                        );
                    }
                    Err(e) => warn!(repo = %repo, error = %e, "skipping repository"),
                }
            }
            states
        })
        .await?;

        Ok(states)
    }

    /// Load every config in parallel, bounded by the concurrency option.
    /// States whose config fails to load are reported and dropped.
    async fn load_configs(
        &self,
        repo_states: Vec<(RepoState, DateTime<Utc>)>,
        summary: &mut PassSummary,
    ) -> Result<Vec<(RepoState, DateTime<Utc>, Arc<TasksCfg>)>, SchedulerError> {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut handles = Vec::with_capacity(repo_states.len());

        for (rs, committed) in repo_states {
            let permit = Arc::clone(&semaphore).acquire_owned().await?;
            let cache = Arc::clone(&self.cache);
            handles.push(tokio::task::spawn_blocking(move || {
                let result = cache.get(&rs);
                drop(permit);
                (rs, committed, result)
            }));
        }

        let mut configs = Vec::with_capacity(handles.len());
        for handle in handles {
            let (rs, committed, result) = handle.await?;
            match result {
                Ok(cfg) => {
                    summary.configs_loaded += 1;
                    self.reporter.report(&SchedulerEvent::ConfigLoaded {
                        repo_state: rs.clone(),
                        tasks: cfg.tasks.len(),
                    });
                    configs.push((rs, committed, cfg));
                }
                Err(e) => {
                    summary.configs_rejected += 1;
                    self.reporter.report(&SchedulerEvent::ConfigRejected {
                        repo_state: rs,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(configs)
    }

    /// Look for a task already covering the candidate's commit.
    ///
    /// Returns false when the commit is taken. A pending task at another
    /// revision is marked for stealing instead.
    fn check_existing(&self, candidate: &mut TaskCandidate) -> Result<bool, StoreError> {
        if candidate.repo_state.is_try_job() {
            return Ok(true);
        }

        let existing = self.index.task_for_commit(
            &candidate.repo_state.repo,
            &candidate.repo_state.revision,
            &candidate.name,
        )?;
        let Some(existing) = existing else {
            return Ok(true);
        };

        if existing.key.repo_state.revision != candidate.repo_state.revision
            && existing.status == TaskStatus::Pending
        {
            candidate.stealing_from_id = Some(existing.id);
            return Ok(true);
        }

        self.reporter.report(&SchedulerEvent::CandidateSkipped {
            candidate_id: candidate.id(),
            existing_task_id: existing.id,
        });
        Ok(false)
    }

    /// Create, submit and store the task for one candidate
    fn trigger(
        &self,
        backend: &dyn ExecutionBackend,
        candidate: &TaskCandidate,
    ) -> Result<Task, SchedulerError> {
        let mut task = candidate.make_task();
        self.store.assign_id(&mut task)?;

        let request = candidate.make_task_request(&task.id, &self.options.backend);
        let triggered = backend.trigger(&request)?;

        task.backend_task_id = triggered.backend_task_id;
        task.created = Some(triggered.created);
        if let Err(e) = self.store.put_task(&mut task) {
            // The backend is already running it; reports for it will not match a record
            error!(
                task_id = %task.id,
                backend_task_id = %task.backend_task_id,
                error = %e,
                "triggered task could not be stored"
            );
            return Err(e.into());
        }

        if let Some(stolen) = &candidate.stealing_from_id {
            let revisions = candidate.commits.clone();
            let stolen_update = update_task_with_retries(self.store.as_ref(), stolen, |t| {
                let before = t.commits.len();
                t.commits.retain(|c| !revisions.contains(c));
                Ok(t.commits.len() != before)
            });
            match stolen_update {
                Ok(_) => debug!(from = %stolen, to = %task.id, "stole commits"),
                Err(e) => {
                    warn!(from = %stolen, to = %task.id, error = %e, "failed to release stolen commits")
                }
            }
        }

        info!(task_id = %task.id, name = %task.key.name, repo_state = %task.key.repo_state, "triggered task");
        Ok(task)
    }
}

/// Errors that abort a whole pass or a single submission
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduling window is out of range")]
    InvalidWindow,

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Config loader closed: {0}")]
    Semaphore(#[from] tokio::sync::AcquireError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Backend(#[from] crate::backend::BackendError),
}
