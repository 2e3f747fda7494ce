//! Not-yet-scheduled tasks: scoring, dependency resolution and submission

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use gantry_core::{BackendConfig, RepoState};

use crate::backend::{tags_for_task, ExecutionRequest, TagInput};
use crate::specs::TaskSpec;
use crate::store::{DependencyIndex, StoreError};
use crate::task::{Task, TaskKey, TaskStatus};

const CANDIDATE_ID_PREFIX: &str = "taskCandidate";

/// Build the id of the candidate for `name` at `revision`
pub fn make_candidate_id(repo: &str, name: &str, revision: &str) -> String {
    format!("{}|{}|{}|{}", CANDIDATE_ID_PREFIX, repo, name, revision)
}

/// The parts of a candidate id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateId {
    pub repo: String,
    pub name: String,
    pub revision: String,
}

/// Inverse of [`make_candidate_id`]
pub fn parse_candidate_id(id: &str) -> Result<CandidateId, CandidateError> {
    let parts: Vec<&str> = id.split('|').collect();
    match parts.as_slice() {
        [prefix, repo, name, revision]
            if *prefix == CANDIDATE_ID_PREFIX
                && !repo.is_empty()
                && !name.is_empty()
                && !revision.is_empty() =>
        {
            Ok(CandidateId {
                repo: repo.to_string(),
                name: name.to_string(),
                revision: revision.to_string(),
            })
        }
        _ => Err(CandidateError::InvalidId(id.to_string())),
    }
}

/// Why a candidate cannot run yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitReason {
    /// No task for the dependency at this commit
    NoTask,
    /// The dependency task has not finished
    NotFinished,
    /// The dependency task finished without success
    NotSuccessful,
    /// The dependency task produced no output
    NoOutput,
}

impl fmt::Display for WaitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoTask => "no task",
            Self::NotFinished => "not finished",
            Self::NotSuccessful => "not successful",
            Self::NoOutput => "no output",
        };
        f.write_str(s)
    }
}

/// Outcome of checking a candidate's dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepsStatus {
    /// Every dependency succeeded; outputs and ids are in declaration order
    Ready {
        isolated_hashes: Vec<String>,
        parent_task_ids: Vec<String>,
    },
    /// The first unsatisfied dependency
    Waiting {
        dependency: String,
        reason: WaitReason,
    },
}

impl DepsStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// A task spec at a particular commit, considered for scheduling
#[derive(Debug, Clone, PartialEq)]
pub struct TaskCandidate {
    pub repo_state: RepoState,
    pub name: String,
    /// Revisions the task would cover
    pub commits: Vec<String>,
    pub commit_timestamp: DateTime<Utc>,
    pub score: f64,
    pub isolated_input: String,
    pub isolated_hashes: Vec<String>,
    pub parent_task_ids: Vec<String>,
    pub task_spec: TaskSpec,
    pub forced_job_id: Option<String>,
    /// Pending task whose commit this candidate takes over
    pub stealing_from_id: Option<String>,
}

impl TaskCandidate {
    /// Create a candidate covering just its own revision
    pub fn new(
        repo_state: RepoState,
        name: impl Into<String>,
        task_spec: TaskSpec,
        commit_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            commits: vec![repo_state.revision.clone()],
            isolated_input: task_spec.isolate.clone(),
            repo_state,
            name: name.into(),
            commit_timestamp,
            score: 0.0,
            isolated_hashes: Vec::new(),
            parent_task_ids: Vec::new(),
            task_spec,
            forced_job_id: None,
            stealing_from_id: None,
        }
    }

    /// Force the candidate on behalf of a job
    pub fn with_forced_job(mut self, job_id: impl Into<String>) -> Self {
        self.forced_job_id = Some(job_id.into());
        self
    }

    pub fn id(&self) -> String {
        make_candidate_id(&self.repo_state.repo, &self.name, &self.repo_state.revision)
    }

    /// Score decays by half every `half_life` of commit age at `now`.
    /// Commits dated after `now` count as age zero.
    pub fn compute_score(&mut self, now: DateTime<Utc>, half_life: Duration) -> f64 {
        let age = (now - self.commit_timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        let half_life = half_life.as_secs_f64();
        let decay = if half_life > 0.0 {
            0.5f64.powf(age / half_life)
        } else {
            1.0
        };
        self.score = self.task_spec.priority * decay;
        self.score
    }

    /// Check whether every dependency has a successful task with output at
    /// this commit. Waiting is not an error.
    pub fn all_deps_met(&self, index: &dyn DependencyIndex) -> Result<DepsStatus, StoreError> {
        let mut isolated_hashes = Vec::with_capacity(self.task_spec.dependencies.len());
        let mut parent_task_ids = Vec::with_capacity(self.task_spec.dependencies.len());

        for dep in &self.task_spec.dependencies {
            let waiting = |reason| DepsStatus::Waiting {
                dependency: dep.clone(),
                reason,
            };

            let Some(task) =
                index.task_for_commit(&self.repo_state.repo, &self.repo_state.revision, dep)?
            else {
                return Ok(waiting(WaitReason::NoTask));
            };
            if !task.done() {
                return Ok(waiting(WaitReason::NotFinished));
            }
            if !task.success() {
                return Ok(waiting(WaitReason::NotSuccessful));
            }
            if task.isolated_output.is_empty() {
                return Ok(waiting(WaitReason::NoOutput));
            }
            isolated_hashes.push(task.isolated_output);
            parent_task_ids.push(task.id);
        }

        Ok(DepsStatus::Ready {
            isolated_hashes,
            parent_task_ids,
        })
    }

    /// Run [`all_deps_met`](Self::all_deps_met) and record the resolved
    /// outputs on the candidate when ready
    pub fn resolve_deps(&mut self, index: &dyn DependencyIndex) -> Result<DepsStatus, StoreError> {
        let status = self.all_deps_met(index)?;
        if let DepsStatus::Ready {
            isolated_hashes,
            parent_task_ids,
        } = &status
        {
            self.isolated_hashes = isolated_hashes.clone();
            self.parent_task_ids = parent_task_ids.clone();
        }
        Ok(status)
    }

    /// A pending task record for this candidate. The store assigns the id.
    pub fn make_task(&self) -> Task {
        Task {
            key: TaskKey {
                repo_state: self.repo_state.clone(),
                name: self.name.clone(),
                forced_job_id: self.forced_job_id.clone(),
            },
            commits: self.commits.clone(),
            status: TaskStatus::Pending,
            parent_task_ids: self.parent_task_ids.clone(),
            ..Task::default()
        }
    }

    /// The backend request that runs this candidate as task `task_id`
    pub fn make_task_request(&self, task_id: &str, settings: &BackendConfig) -> ExecutionRequest {
        let priority = (self.task_spec.priority * 100.0).round() as i64;
        let dimensions = self.task_spec.dimension_pairs();
        let tags = tags_for_task(&TagInput {
            id: task_id,
            name: &self.name,
            repo: &self.repo_state.repo,
            revision: &self.repo_state.revision,
            priority,
            dimensions: &dimensions,
            parent_task_ids: &self.parent_task_ids,
            forced_job_id: self.forced_job_id.as_deref(),
            retry_of: None,
            patch: self.repo_state.patch.as_ref(),
        });

        ExecutionRequest {
            name: self.name.clone(),
            priority,
            dimensions,
            packages: self.task_spec.packages.clone(),
            environment: self.task_spec.environment.clone(),
            extra_args: self.task_spec.extra_args.clone(),
            isolated_input: self.isolated_input.clone(),
            isolated_hashes: self.isolated_hashes.clone(),
            expiration_secs: settings.expiration_secs,
            execution_timeout_secs: settings.execution_timeout_secs,
            io_timeout_secs: settings.io_timeout_secs,
            tags,
            user: settings.user.clone(),
        }
    }
}

/// Highest score first; equal scores by ascending id
pub fn compare_candidates(a: &TaskCandidate, b: &TaskCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.id().cmp(&b.id()))
}

/// Sort candidates into scheduling order
pub fn sort_candidates(candidates: &mut [TaskCandidate]) {
    candidates.sort_by(compare_candidates);
}

#[derive(Debug, thiserror::Error)]
pub enum CandidateError {
    #[error("Invalid candidate id {0:?}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ReportTags, TAG_ID, TAG_PARENT_TASK_ID, TAG_PRIORITY};
    use crate::specs::PackageSpec;
    use crate::store::{InMemoryTaskStore, TaskStore};
    use crate::testing::ts;
    use gantry_core::Patch;

    fn candidate(name: &str, spec: TaskSpec) -> TaskCandidate {
        TaskCandidate::new(RepoState::new("skia.git", "c1"), name, spec, ts(10_000))
    }

    fn put_dep(
        store: &InMemoryTaskStore,
        name: &str,
        status: TaskStatus,
        output: &str,
    ) -> Task {
        let mut task = Task {
            key: TaskKey::new(RepoState::new("skia.git", "c1"), name),
            commits: vec!["c1".to_string()],
            created: Some(ts(10_100)),
            status,
            isolated_output: output.to_string(),
            ..Task::default()
        };
        store.assign_id(&mut task).unwrap();
        store.put_task(&mut task).unwrap();
        task
    }

    #[test]
    fn test_candidate_id_round_trip() {
        let c = candidate("Build", TaskSpec::new("b.isolate"));
        assert_eq!(c.id(), "taskCandidate|skia.git|Build|c1");
        assert_eq!(
            parse_candidate_id(&c.id()).unwrap(),
            CandidateId {
                repo: "skia.git".to_string(),
                name: "Build".to_string(),
                revision: "c1".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_candidate_id_rejects_malformed() {
        for id in [
            "",
            "taskCandidate|skia.git|Build",
            "taskCandidate|skia.git|Build|c1|extra",
            "notACandidate|skia.git|Build|c1",
            "taskCandidate||Build|c1",
        ] {
            assert!(parse_candidate_id(id).is_err(), "{id:?}");
        }
    }

    #[test]
    fn test_score_decay() {
        let half_life = Duration::from_secs(3600);
        let mut c = candidate("Build", TaskSpec::new("b.isolate").with_priority(0.8));

        assert_eq!(c.compute_score(ts(10_000), half_life), 0.8);
        assert!((c.compute_score(ts(13_600), half_life) - 0.4).abs() < 1e-12);
        assert!((c.compute_score(ts(17_200), half_life) - 0.2).abs() < 1e-12);
        // Commit dated in the future
        assert_eq!(c.compute_score(ts(5_000), half_life), 0.8);
    }

    #[test]
    fn test_score_favors_recent_commits() {
        let half_life = Duration::from_secs(3600);
        let now = ts(20_000);
        let mut old = candidate("Build", TaskSpec::new("b.isolate"));
        let mut new = old.clone();
        new.commit_timestamp = ts(19_000);
        assert!(new.compute_score(now, half_life) > old.compute_score(now, half_life));
    }

    #[test]
    fn test_sort_candidates() {
        let mut a = candidate("A", TaskSpec::new("a.isolate"));
        a.score = 0.5;
        let mut b = candidate("B", TaskSpec::new("b.isolate"));
        b.score = 0.9;
        let mut c = candidate("C", TaskSpec::new("c.isolate"));
        c.score = 0.5;

        let mut all = vec![c, a, b];
        sort_candidates(&mut all);
        let names: Vec<&str> = all.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_no_dependencies_is_ready() {
        let store = InMemoryTaskStore::new();
        let c = candidate("A", TaskSpec::new("a.isolate"));
        assert_eq!(
            c.all_deps_met(&store).unwrap(),
            DepsStatus::Ready {
                isolated_hashes: vec![],
                parent_task_ids: vec![],
            }
        );
    }

    #[test]
    fn test_waiting_reasons() {
        let spec = TaskSpec::new("c.isolate").with_dependency("Dep");
        let c = candidate("C", spec);

        let cases = [
            (TaskStatus::Pending, "out", WaitReason::NotFinished),
            (TaskStatus::Running, "out", WaitReason::NotFinished),
            (TaskStatus::Failure, "out", WaitReason::NotSuccessful),
            (TaskStatus::Mishap, "out", WaitReason::NotSuccessful),
            (TaskStatus::Success, "", WaitReason::NoOutput),
        ];
        for (status, output, reason) in cases {
            let store = InMemoryTaskStore::new();
            put_dep(&store, "Dep", status, output);
            assert_eq!(
                c.all_deps_met(&store).unwrap(),
                DepsStatus::Waiting {
                    dependency: "Dep".to_string(),
                    reason,
                },
                "{status}"
            );
        }

        let store = InMemoryTaskStore::new();
        assert_eq!(
            c.all_deps_met(&store).unwrap(),
            DepsStatus::Waiting {
                dependency: "Dep".to_string(),
                reason: WaitReason::NoTask,
            }
        );
    }

    #[test]
    fn test_ready_in_declaration_order() {
        let store = InMemoryTaskStore::new();
        let a = put_dep(&store, "A", TaskStatus::Success, "hash-a");
        let b = put_dep(&store, "B", TaskStatus::Success, "hash-b");

        let spec = TaskSpec::new("c.isolate")
            .with_dependency("B")
            .with_dependency("A");
        let mut c = candidate("C", spec);

        let status = c.resolve_deps(&store).unwrap();
        assert!(status.is_ready());
        assert_eq!(c.isolated_hashes, vec!["hash-b".to_string(), "hash-a".to_string()]);
        assert_eq!(c.parent_task_ids, vec![b.id, a.id]);
    }

    #[test]
    fn test_one_unmet_dependency_blocks() {
        let store = InMemoryTaskStore::new();
        put_dep(&store, "A", TaskStatus::Success, "hash-a");
        put_dep(&store, "B", TaskStatus::Running, "");

        let spec = TaskSpec::new("c.isolate")
            .with_dependency("A")
            .with_dependency("B");
        let mut c = candidate("C", spec);
        let status = c.resolve_deps(&store).unwrap();
        assert!(!status.is_ready());
        assert!(c.isolated_hashes.is_empty());
    }

    #[test]
    fn test_make_task() {
        let mut c = candidate("Build", TaskSpec::new("b.isolate")).with_forced_job("job-1");
        c.parent_task_ids = vec!["p1".to_string()];

        let task = c.make_task();
        assert!(task.id.is_empty());
        assert_eq!(task.key.name, "Build");
        assert_eq!(task.key.forced_job_id.as_deref(), Some("job-1"));
        assert_eq!(task.commits, vec!["c1".to_string()]);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.parent_task_ids, vec!["p1".to_string()]);
    }

    #[test]
    fn test_make_task_request() {
        let spec = TaskSpec::new("build.isolate")
            .with_priority(0.8)
            .with_dimension("os:Ubuntu")
            .with_dimension("gpu:10de:1cb3")
            .with_package(PackageSpec::new("toolchain", "tc", "7"));
        let mut c = candidate("Build", spec);
        c.repo_state = c.repo_state.clone().with_patch(Patch::new("review", "12", "3"));
        c.isolated_hashes = vec!["dep-hash".to_string()];
        c.parent_task_ids = vec!["p1".to_string()];

        let settings = BackendConfig::default();
        let request = c.make_task_request("task-1", &settings);

        assert_eq!(request.name, "Build");
        assert_eq!(request.priority, 80);
        assert_eq!(request.isolated_input, "build.isolate");
        assert_eq!(request.isolated_hashes, vec!["dep-hash".to_string()]);
        assert_eq!(
            request.dimensions,
            vec![
                ("os".to_string(), "Ubuntu".to_string()),
                ("gpu".to_string(), "10de:1cb3".to_string())
            ]
        );
        assert_eq!(request.packages.len(), 1);
        assert_eq!(request.expiration_secs, 4 * 60 * 60);
        assert_eq!(request.execution_timeout_secs, 60 * 60);
        assert_eq!(request.io_timeout_secs, 20 * 60);
        assert_eq!(request.user, settings.user);

        let tags = ReportTags::parse(&request.tags).unwrap();
        assert_eq!(tags.single(TAG_ID).unwrap(), Some("task-1"));
        assert_eq!(tags.single(TAG_PRIORITY).unwrap(), Some("80"));
        assert_eq!(tags.single("sched_dim_os").unwrap(), Some("Ubuntu"));
        assert_eq!(tags.all(TAG_PARENT_TASK_ID), ["p1".to_string()]);
    }

    #[test]
    fn test_priority_rounding() {
        let c = candidate("Build", TaskSpec::new("b.isolate").with_priority(0.125));
        let request = c.make_task_request("t", &BackendConfig::default());
        assert_eq!(request.priority, 13);
    }
}
