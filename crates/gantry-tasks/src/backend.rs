//! Execution backend wire types and the submission capability

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::specs::PackageSpec;
use crate::task::ReportError;

/// Timestamp format used by the backend, always UTC
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

pub const TAG_ID: &str = "sched_id";
pub const TAG_NAME: &str = "sched_name";
pub const TAG_REPO: &str = "sched_repo";
pub const TAG_REVISION: &str = "sched_revision";
pub const TAG_PRIORITY: &str = "sched_priority";
pub const TAG_DIMENSION_PREFIX: &str = "sched_dim_";
pub const TAG_PARENT_TASK_ID: &str = "sched_parent_task_id";
pub const TAG_FORCED_JOB_ID: &str = "sched_forced_job_id";
pub const TAG_RETRY_OF: &str = "sched_retry_of";
pub const TAG_ISSUE_SERVER: &str = "sched_issue_server";
pub const TAG_ISSUE: &str = "sched_issue";
pub const TAG_PATCHSET: &str = "sched_patchset";

/// Parse a backend timestamp
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).map(|naive| naive.and_utc())
}

/// Format a timestamp the way the backend reports it
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Identifying values carried in a task's tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagInput<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub repo: &'a str,
    pub revision: &'a str,
    pub priority: i64,
    pub dimensions: &'a [(String, String)],
    pub parent_task_ids: &'a [String],
    pub forced_job_id: Option<&'a str>,
    pub retry_of: Option<&'a str>,
    pub patch: Option<&'a gantry_core::Patch>,
}

/// Build the tag set submitted with a task
pub fn tags_for_task(input: &TagInput<'_>) -> Vec<String> {
    let mut tags = vec![
        format!("{}:{}", TAG_ID, input.id),
        format!("{}:{}", TAG_NAME, input.name),
        format!("{}:{}", TAG_REPO, input.repo),
        format!("{}:{}", TAG_REVISION, input.revision),
        format!("{}:{}", TAG_PRIORITY, input.priority),
    ];
    for (key, value) in input.dimensions {
        tags.push(format!("{}{}:{}", TAG_DIMENSION_PREFIX, key, value));
    }
    for parent in input.parent_task_ids {
        tags.push(format!("{}:{}", TAG_PARENT_TASK_ID, parent));
    }
    if let Some(forced) = input.forced_job_id {
        tags.push(format!("{}:{}", TAG_FORCED_JOB_ID, forced));
    }
    if let Some(retry_of) = input.retry_of {
        tags.push(format!("{}:{}", TAG_RETRY_OF, retry_of));
    }
    if let Some(patch) = input.patch {
        tags.push(format!("{}:{}", TAG_ISSUE_SERVER, patch.server));
        tags.push(format!("{}:{}", TAG_ISSUE, patch.issue));
        tags.push(format!("{}:{}", TAG_PATCHSET, patch.patchset));
    }
    tags
}

/// Decoded `key:value` tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportTags {
    values: HashMap<String, Vec<String>>,
}

impl ReportTags {
    /// Decode a tag list. Every tag must contain a `:` separator.
    pub fn parse(tags: &[String]) -> Result<Self, ReportError> {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for tag in tags {
            let (key, value) = tag
                .split_once(':')
                .ok_or_else(|| ReportError::InvalidTag(tag.clone()))?;
            values
                .entry(key.to_string())
                .or_default()
                .push(value.to_string());
        }
        Ok(Self { values })
    }

    /// A single-valued tag; more than one value is an error
    pub fn single(&self, key: &str) -> Result<Option<&str>, ReportError> {
        match self.values.get(key).map(Vec::as_slice) {
            None | Some([]) => Ok(None),
            Some([value]) => Ok(Some(value.as_str())),
            Some(_) => Err(ReportError::DuplicateTag(key.to_string())),
        }
    }

    /// All values of a multi-valued tag, in report order
    pub fn all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Lifecycle state reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendState {
    Pending,
    Running,
    Completed,
    BotDied,
    Canceled,
    Expired,
    TimedOut,
    NoResource,
}

/// Status report for one backend task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Backend-assigned task id
    pub task_id: String,
    /// Lifecycle timestamps in [`TIMESTAMP_FORMAT`]; empty when unset
    #[serde(default)]
    pub created_ts: String,
    #[serde(default)]
    pub started_ts: String,
    #[serde(default)]
    pub completed_ts: String,
    #[serde(default)]
    pub abandoned_ts: String,
    /// Current state
    pub state: BackendState,
    /// Whether the task itself failed
    #[serde(default)]
    pub failure: bool,
    /// Isolated output handle, empty when none
    #[serde(default)]
    pub isolated_output: String,
    /// Bot that ran the task
    #[serde(default)]
    pub bot_id: String,
    /// Tags as submitted
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TaskReport {
    /// A report in the given state with no timestamps set
    pub fn new(task_id: impl Into<String>, state: BackendState) -> Self {
        Self {
            task_id: task_id.into(),
            created_ts: String::new(),
            started_ts: String::new(),
            completed_ts: String::new(),
            abandoned_ts: String::new(),
            state,
            failure: false,
            isolated_output: String::new(),
            bot_id: String::new(),
            tags: Vec::new(),
        }
    }
}

/// A request to run one task on the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub name: String,
    /// Spec priority scaled to 0..=100
    pub priority: i64,
    pub dimensions: Vec<(String, String)>,
    pub packages: Vec<PackageSpec>,
    pub environment: BTreeMap<String, String>,
    pub extra_args: Vec<String>,
    /// Isolate manifest of the task itself
    pub isolated_input: String,
    /// Outputs of the dependencies, in declaration order
    pub isolated_hashes: Vec<String>,
    pub expiration_secs: u64,
    pub execution_timeout_secs: u64,
    pub io_timeout_secs: u64,
    pub tags: Vec<String>,
    pub user: String,
}

/// What the backend returns for an accepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredTask {
    pub backend_task_id: String,
    pub created: DateTime<Utc>,
}

/// Submits tasks for execution
pub trait ExecutionBackend: Send + Sync {
    fn trigger(&self, request: &ExecutionRequest) -> Result<TriggeredTask, BackendError>;
}

/// Errors from the execution backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend refused or failed to accept the request
    #[error("Failed to trigger {name}: {message}")]
    Trigger { name: String, message: String },
}
