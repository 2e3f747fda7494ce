//! Task records and reconciliation against backend reports

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gantry_core::{Patch, RepoState};

use crate::backend::{
    parse_timestamp, BackendState, ReportTags, TaskReport, TAG_FORCED_JOB_ID, TAG_ID,
    TAG_ISSUE, TAG_ISSUE_SERVER, TAG_NAME, TAG_PARENT_TASK_ID, TAG_PATCHSET, TAG_REPO,
    TAG_REVISION,
};

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failure,
    /// Backend-side failure unrelated to the task's own logic
    Mishap,
}

impl TaskStatus {
    /// Whether the task has reached a terminal status
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Mishap)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Mishap => "MISHAP",
        };
        f.write_str(s)
    }
}

/// Identity of a task apart from its generated id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub repo_state: RepoState,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_job_id: Option<String>,
}

impl TaskKey {
    pub fn new(repo_state: RepoState, name: impl Into<String>) -> Self {
        Self {
            repo_state,
            name: name.into(),
            forced_job_id: None,
        }
    }

    /// Whether the task was triggered manually for a specific job
    pub fn is_forced(&self) -> bool {
        self.forced_job_id.is_some()
    }
}

impl Default for TaskKey {
    fn default() -> Self {
        Self::new(RepoState::new("", ""), "")
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.name, self.repo_state)?;
        if let Some(job) = &self.forced_job_id {
            write!(f, " (forced by {})", job)?;
        }
        Ok(())
    }
}

/// The durable record of a submitted task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned id; empty until assigned
    pub id: String,
    pub key: TaskKey,
    pub created: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    /// Last write to the store, maintained by the store
    pub db_modified: Option<DateTime<Utc>>,
    /// Revisions this task covers
    pub commits: Vec<String>,
    pub status: TaskStatus,
    pub backend_task_id: String,
    pub isolated_output: String,
    pub bot_id: String,
    pub parent_task_ids: Vec<String>,
    pub retry_of: Option<String>,
}

impl Task {
    /// Name of the task spec this task runs
    pub fn name(&self) -> &str {
        &self.key.name
    }

    pub fn repo_state(&self) -> &RepoState {
        &self.key.repo_state
    }

    pub fn done(&self) -> bool {
        self.status.is_done()
    }

    pub fn success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// Whether this task covers `revision`
    pub fn covers(&self, revision: &str) -> bool {
        self.key.repo_state.revision == revision || self.commits.iter().any(|c| c == revision)
    }

    /// Apply a backend status report.
    ///
    /// The report is applied to a copy which replaces `self` only when every
    /// check passes. Returns whether anything changed; replaying a report
    /// that was already applied returns `false`.
    pub fn update_from_report(&mut self, report: Option<&TaskReport>) -> Result<bool, ReportError> {
        let report = report.ok_or(ReportError::Missing)?;
        let tags = ReportTags::parse(&report.tags)?;

        let mut t = self.clone();

        reconcile("Id", &mut t.id, tags.single(TAG_ID)?)?;
        reconcile("Name", &mut t.key.name, tags.single(TAG_NAME)?)?;
        reconcile("Repo", &mut t.key.repo_state.repo, tags.single(TAG_REPO)?)?;
        reconcile(
            "Revision",
            &mut t.key.repo_state.revision,
            tags.single(TAG_REVISION)?,
        )?;

        if let Some(forced) = tags.single(TAG_FORCED_JOB_ID)? {
            let mut current = t.key.forced_job_id.take().unwrap_or_default();
            reconcile("ForcedJobId", &mut current, Some(forced))?;
            t.key.forced_job_id = Some(current);
        }

        let mut patch = t.key.repo_state.patch.take().unwrap_or_default();
        reconcile("Patch server", &mut patch.server, tags.single(TAG_ISSUE_SERVER)?)?;
        reconcile("Patch issue", &mut patch.issue, tags.single(TAG_ISSUE)?)?;
        reconcile("Patchset", &mut patch.patchset, tags.single(TAG_PATCHSET)?)?;
        t.key.repo_state.patch = if patch == Patch::default() { None } else { Some(patch) };

        let parents = tags.all(TAG_PARENT_TASK_ID);
        if !parents.is_empty() {
            if t.parent_task_ids.is_empty() {
                t.parent_task_ids = parents.to_vec();
            } else if t.parent_task_ids != parents {
                return Err(ReportError::Mismatch {
                    field: "Parent task ids",
                    expected: t.parent_task_ids.join(","),
                    actual: parents.join(","),
                });
            }
        }

        let created = parse_field("CreatedTs", &report.created_ts)?;
        match t.created {
            Some(existing) if Some(existing) != created => {
                return Err(ReportError::CreatedChanged {
                    expected: existing,
                    actual: created,
                })
            }
            _ => t.created = created,
        }

        reconcile(
            "Backend task id",
            &mut t.backend_task_id,
            Some(report.task_id.as_str()),
        )?;

        let started = optional_field("StartedTs", &report.started_ts)?;
        let completed = optional_field("CompletedTs", &report.completed_ts)?;
        let abandoned = optional_field("AbandonedTs", &report.abandoned_ts)?;

        t.started = started;
        t.finished = completed.or(abandoned);

        t.status = match report.state {
            BackendState::Pending => TaskStatus::Pending,
            BackendState::Running => TaskStatus::Running,
            BackendState::Completed if report.failure => TaskStatus::Failure,
            BackendState::Completed => TaskStatus::Success,
            BackendState::BotDied
            | BackendState::Canceled
            | BackendState::Expired
            | BackendState::TimedOut
            | BackendState::NoResource => TaskStatus::Mishap,
        };
        if completed.is_none() && abandoned.is_some() {
            t.status = TaskStatus::Mishap;
        }

        t.isolated_output = report.isolated_output.clone();
        t.bot_id = report.bot_id.clone();

        let changed = t != *self;
        if changed {
            *self = t;
        }
        Ok(changed)
    }
}

fn reconcile(
    field: &'static str,
    current: &mut String,
    reported: Option<&str>,
) -> Result<(), ReportError> {
    let Some(reported) = reported else {
        return Ok(());
    };
    if current.is_empty() {
        *current = reported.to_string();
        Ok(())
    } else if current != reported {
        Err(ReportError::Mismatch {
            field,
            expected: current.clone(),
            actual: reported.to_string(),
        })
    } else {
        Ok(())
    }
}

fn parse_field(field: &'static str, value: &str) -> Result<Option<DateTime<Utc>>, ReportError> {
    parse_timestamp(value)
        .map(Some)
        .map_err(|_| ReportError::Timestamp {
            field,
            value: value.to_string(),
        })
}

fn optional_field(field: &'static str, value: &str) -> Result<Option<DateTime<Utc>>, ReportError> {
    if value.is_empty() {
        Ok(None)
    } else {
        parse_field(field, value)
    }
}

/// Reasons a report is rejected. The task is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("Missing task report")]
    Missing,

    #[error("Invalid task tag {0:?}")]
    InvalidTag(String),

    #[error("Task tag {0:?} has more than one value")]
    DuplicateTag(String),

    #[error("Report carries no task id tag")]
    MissingId,

    #[error("{field} does not match: have {expected:?}, report has {actual:?}")]
    Mismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    #[error("Creation time has changed: have {expected}, report has {actual:?}")]
    CreatedChanged {
        expected: DateTime<Utc>,
        actual: Option<DateTime<Utc>>,
    },

    #[error("Unable to parse {field}: {value:?}")]
    Timestamp { field: &'static str, value: String },
}
