//! Task storage and report ingestion

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::backend::{ReportTags, TaskReport, TAG_ID};
use crate::task::{ReportError, Task};

/// Attempts made by [`update_task_with_retries`] before giving up
pub const MAX_UPDATE_RETRIES: usize = 10;

/// Keyed storage of task records
pub trait TaskStore: Send + Sync {
    /// Give a new task its id
    fn assign_id(&self, task: &mut Task) -> Result<(), StoreError>;

    /// Insert or replace a task and stamp its `db_modified`.
    ///
    /// Fails with [`StoreError::ConcurrentUpdate`] when `task.db_modified` is
    /// not the value currently stored.
    fn put_task(&self, task: &mut Task) -> Result<(), StoreError>;

    fn get_task_by_id(&self, id: &str) -> Result<Option<Task>, StoreError>;
}

/// Dependency-aware lookups
pub trait DependencyIndex: Send + Sync {
    /// The most recently created non-try task named `name` in `repo` that
    /// covers `revision`
    fn task_for_commit(
        &self,
        repo: &str,
        revision: &str,
        name: &str,
    ) -> Result<Option<Task>, StoreError>;
}

#[derive(Debug, Default)]
struct StoreState {
    tasks: HashMap<String, Task>,
    next_seq: u64,
    last_modified: Option<DateTime<Utc>>,
}

/// A [`TaskStore`] held in memory
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of stored tasks
    pub fn len(&self) -> usize {
        self.state().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies of all stored tasks, ordered by id
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.state().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }
}

impl TaskStore for InMemoryTaskStore {
    fn assign_id(&self, task: &mut Task) -> Result<(), StoreError> {
        if !task.id.is_empty() {
            return Err(StoreError::IdAlreadyAssigned(task.id.clone()));
        }
        let mut state = self.state();
        state.next_seq += 1;
        task.id = format!(
            "{}_{:06}",
            Utc::now().format("%Y%m%dT%H%M%S%.6f"),
            state.next_seq
        );
        Ok(())
    }

    fn put_task(&self, task: &mut Task) -> Result<(), StoreError> {
        if task.id.is_empty() {
            return Err(StoreError::MissingId);
        }

        let mut state = self.state();
        let stored = state.tasks.get(&task.id).and_then(|t| t.db_modified);
        if stored != task.db_modified {
            return Err(StoreError::ConcurrentUpdate(task.id.clone()));
        }

        // Strictly increasing so a stale copy can never match
        let mut modified = Utc::now();
        if let Some(last) = state.last_modified {
            if modified <= last {
                modified = last + Duration::microseconds(1);
            }
        }
        state.last_modified = Some(modified);

        task.db_modified = Some(modified);
        state.tasks.insert(task.id.clone(), task.clone());
        debug!(id = %task.id, status = %task.status, "stored task");
        Ok(())
    }

    fn get_task_by_id(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.state().tasks.get(id).cloned())
    }
}

impl DependencyIndex for InMemoryTaskStore {
    fn task_for_commit(
        &self,
        repo: &str,
        revision: &str,
        name: &str,
    ) -> Result<Option<Task>, StoreError> {
        let state = self.state();
        Ok(state
            .tasks
            .values()
            .filter(|t| {
                t.key.name == name
                    && t.key.repo_state.repo == repo
                    && !t.key.repo_state.is_try_job()
                    && t.covers(revision)
            })
            .max_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }
}

/// Read, modify and write a task, retrying when another writer got there
/// first.
///
/// `update` returns whether it changed the task; unchanged tasks are not
/// written.
pub fn update_task_with_retries<F>(
    store: &dyn TaskStore,
    id: &str,
    mut update: F,
) -> Result<Task, StoreError>
where
    F: FnMut(&mut Task) -> Result<bool, StoreError>,
{
    for attempt in 1..=MAX_UPDATE_RETRIES {
        let mut task = store
            .get_task_by_id(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if !update(&mut task)? {
            return Ok(task);
        }

        match store.put_task(&mut task) {
            Ok(()) => return Ok(task),
            Err(StoreError::ConcurrentUpdate(_)) => {
                debug!(id, attempt, "concurrent update, retrying");
            }
            Err(e) => return Err(e),
        }
    }

    warn!(id, "giving up after {} attempts", MAX_UPDATE_RETRIES);
    Err(StoreError::TooManyRetries(id.to_string()))
}

/// Apply a backend report to the task it names and persist the result.
///
/// Returns whether the stored task changed.
pub fn update_store_from_report(
    store: &dyn TaskStore,
    report: &TaskReport,
) -> Result<bool, StoreError> {
    let tags = ReportTags::parse(&report.tags)?;
    let id = tags.single(TAG_ID)?.ok_or(ReportError::MissingId)?;

    let mut changed = false;
    let task = update_task_with_retries(store, id, |task| {
        changed = task.update_from_report(Some(report))?;
        Ok(changed)
    })?;

    if changed {
        info!(id, status = %task.status, backend_task_id = %task.backend_task_id, "task updated from report");
    }
    Ok(changed)
}

/// Task storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("No task with id {0}")]
    NotFound(String),

    #[error("Task has no id")]
    MissingId,

    #[error("Task already has id {0}")]
    IdAlreadyAssigned(String),

    /// The stored copy changed since it was read
    #[error("Concurrent update of task {0}")]
    ConcurrentUpdate(String),

    #[error("Gave up updating task {0} after repeated concurrent updates")]
    TooManyRetries(String),

    #[error(transparent)]
    Report(#[from] ReportError),

    /// Failure in an external store implementation
    #[error("Task store error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{format_timestamp, BackendState, TAG_NAME, TAG_REPO, TAG_REVISION};
    use crate::task::{TaskKey, TaskStatus};
    use crate::testing::ts;
    use gantry_core::{Patch, RepoState};
    use std::sync::Arc;

    fn new_task(store: &InMemoryTaskStore, name: &str, revision: &str) -> Task {
        let mut task = Task {
            key: TaskKey::new(RepoState::new("skia.git", revision), name),
            commits: vec![revision.to_string()],
            ..Task::default()
        };
        store.assign_id(&mut task).unwrap();
        task
    }

    fn report_for(task: &Task, state: BackendState) -> TaskReport {
        let mut report = TaskReport::new("backend-1", state);
        report.created_ts = format_timestamp(&ts(1_000));
        report.tags = vec![
            format!("{}:{}", TAG_ID, task.id),
            format!("{}:{}", TAG_NAME, task.key.name),
            format!("{}:{}", TAG_REPO, task.key.repo_state.repo),
            format!("{}:{}", TAG_REVISION, task.key.repo_state.revision),
        ];
        report
    }

    #[test]
    fn test_assign_id_unique() {
        let store = InMemoryTaskStore::new();
        let a = new_task(&store, "A", "c1");
        let b = new_task(&store, "A", "c1");
        assert!(!a.id.is_empty());
        assert_ne!(a.id, b.id);

        let mut again = a.clone();
        assert!(matches!(
            store.assign_id(&mut again),
            Err(StoreError::IdAlreadyAssigned(_))
        ));
    }

    #[test]
    fn test_put_and_get() {
        let store = InMemoryTaskStore::new();
        let mut task = new_task(&store, "A", "c1");
        store.put_task(&mut task).unwrap();
        assert!(task.db_modified.is_some());

        let stored = store.get_task_by_id(&task.id).unwrap().unwrap();
        assert_eq!(stored, task);
        assert!(store.get_task_by_id("missing").unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_without_id() {
        let store = InMemoryTaskStore::new();
        let mut task = Task::default();
        assert!(matches!(store.put_task(&mut task), Err(StoreError::MissingId)));
    }

    #[test]
    fn test_stale_put_rejected() {
        let store = InMemoryTaskStore::new();
        let mut task = new_task(&store, "A", "c1");
        store.put_task(&mut task).unwrap();

        let mut first = task.clone();
        let mut second = task.clone();
        first.status = TaskStatus::Running;
        store.put_task(&mut first).unwrap();

        second.status = TaskStatus::Success;
        assert!(matches!(
            store.put_task(&mut second),
            Err(StoreError::ConcurrentUpdate(_))
        ));
        assert_eq!(
            store.get_task_by_id(&task.id).unwrap().unwrap().status,
            TaskStatus::Running
        );
    }

    #[test]
    fn test_task_for_commit_picks_most_recent() {
        let store = InMemoryTaskStore::new();

        let mut old = new_task(&store, "Build", "c1");
        old.created = Some(ts(100));
        store.put_task(&mut old).unwrap();

        let mut newer = new_task(&store, "Build", "c2");
        newer.commits = vec!["c2".to_string(), "c1".to_string()];
        newer.created = Some(ts(200));
        store.put_task(&mut newer).unwrap();

        let mut other_name = new_task(&store, "Test", "c1");
        other_name.created = Some(ts(300));
        store.put_task(&mut other_name).unwrap();

        let mut try_job = new_task(&store, "Build", "c1");
        try_job.key.repo_state = try_job
            .key
            .repo_state
            .clone()
            .with_patch(Patch::new("review", "1", "1"));
        try_job.created = Some(ts(400));
        store.put_task(&mut try_job).unwrap();

        let found = store.task_for_commit("skia.git", "c1", "Build").unwrap().unwrap();
        assert_eq!(found.id, newer.id);
        assert!(store.task_for_commit("skia.git", "c3", "Build").unwrap().is_none());
        assert!(store.task_for_commit("other.git", "c1", "Build").unwrap().is_none());
    }

    #[test]
    fn test_update_store_from_report() {
        let store = InMemoryTaskStore::new();
        let mut task = new_task(&store, "A", "c1");
        store.put_task(&mut task).unwrap();

        let report = report_for(&task, BackendState::Running);
        assert!(update_store_from_report(&store, &report).unwrap());
        let stored = store.get_task_by_id(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(stored.backend_task_id, "backend-1");

        // Replay leaves the stored copy, including db_modified, untouched
        assert!(!update_store_from_report(&store, &report).unwrap());
        let replayed = store.get_task_by_id(&task.id).unwrap().unwrap();
        assert_eq!(replayed, stored);
    }

    #[test]
    fn test_update_store_from_report_errors() {
        let store = InMemoryTaskStore::new();
        let mut task = new_task(&store, "A", "c1");

        // Not yet stored
        let report = report_for(&task, BackendState::Running);
        assert!(matches!(
            update_store_from_report(&store, &report),
            Err(StoreError::NotFound(id)) if id == task.id
        ));

        store.put_task(&mut task).unwrap();
        let mut no_id = report.clone();
        no_id.tags.remove(0);
        assert!(matches!(
            update_store_from_report(&store, &no_id),
            Err(StoreError::Report(ReportError::MissingId))
        ));

        let mut wrong_name = report;
        wrong_name.tags[1] = format!("{}:Other", TAG_NAME);
        assert!(matches!(
            update_store_from_report(&store, &wrong_name),
            Err(StoreError::Report(ReportError::Mismatch { field: "Name", .. }))
        ));
        assert_eq!(store.get_task_by_id(&task.id).unwrap().unwrap(), task);
    }

    #[test]
    fn test_retry_on_concurrent_update() {
        let store = InMemoryTaskStore::new();
        let mut task = new_task(&store, "A", "c1");
        store.put_task(&mut task).unwrap();

        let mut calls = 0;
        let updated = update_task_with_retries(&store, &task.id, |t| {
            calls += 1;
            if calls == 1 {
                // Another writer sneaks in between our read and write
                let mut other = store.get_task_by_id(&t.id)?.unwrap();
                other.bot_id = "other-bot".to_string();
                store.put_task(&mut other)?;
            }
            t.status = TaskStatus::Running;
            Ok(true)
        })
        .unwrap();

        assert_eq!(calls, 2);
        assert_eq!(updated.status, TaskStatus::Running);
        assert_eq!(updated.bot_id, "other-bot");
    }

    #[test]
    fn test_concurrent_reports_apply_once() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = new_task(&store, "A", "c1");
        store.put_task(&mut task).unwrap();

        let mut report = report_for(&task, BackendState::Completed);
        report.started_ts = format_timestamp(&ts(1_100));
        report.completed_ts = format_timestamp(&ts(1_200));
        report.isolated_output = "out".to_string();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let report = report.clone();
                std::thread::spawn(move || update_store_from_report(store.as_ref(), &report).unwrap())
            })
            .collect();
        let changed: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|c| *c)
            .count();

        assert_eq!(changed, 1);
        let stored = store.get_task_by_id(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Success);
        assert_eq!(stored.finished, Some(ts(1_200)));
    }
}
