//! Task and job specifications declared in a repository's tasks file

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Path of the tasks file within a repository
pub const TASKS_CFG_FILE: &str = "infra/bots/tasks.json";

fn default_priority() -> f64 {
    1.0
}

/// A package which must be installed on the bot before a task runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSpec {
    /// Package name
    pub name: String,
    /// Install location relative to the task's working directory
    pub path: String,
    /// Pinned version
    #[serde(default)]
    pub version: String,
}

impl PackageSpec {
    /// Create a new package spec
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            version: version.into(),
        }
    }
}

/// Describes one schedulable unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    /// Packages to install on the bot
    #[serde(default, alias = "cipd_packages")]
    pub packages: Vec<PackageSpec>,

    /// Names of tasks which must succeed at the same commit first
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Bot dimensions, as `key:value` strings
    #[serde(default)]
    pub dimensions: Vec<String>,

    /// Environment variables for the task
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Extra command-line arguments
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// Isolated-input manifest file
    #[serde(default)]
    pub isolate: String,

    /// Relative priority, 0 < p <= 1
    #[serde(default = "default_priority")]
    pub priority: f64,
}

impl TaskSpec {
    /// Create a new task spec using the given isolate manifest
    pub fn new(isolate: impl Into<String>) -> Self {
        Self {
            packages: Vec::new(),
            dependencies: Vec::new(),
            dimensions: Vec::new(),
            environment: BTreeMap::new(),
            extra_args: Vec::new(),
            isolate: isolate.into(),
            priority: default_priority(),
        }
    }

    /// Add a dependency
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.push(dep.into());
        self
    }

    /// Add a dimension
    pub fn with_dimension(mut self, dimension: impl Into<String>) -> Self {
        self.dimensions.push(dimension.into());
        self
    }

    /// Add a package
    pub fn with_package(mut self, package: PackageSpec) -> Self {
        self.packages.push(package);
        self
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = priority;
        self
    }

    /// Split dimensions into key/value pairs. Assumes the spec was validated.
    pub fn dimension_pairs(&self) -> Vec<(String, String)> {
        self.dimensions
            .iter()
            .filter_map(|d| d.split_once(':'))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Check the structural rules that apply to a single spec
    pub fn validate(&self, name: &str) -> Result<(), SpecError> {
        for p in &self.packages {
            if p.name.is_empty() || p.path.is_empty() {
                return Err(SpecError::InvalidPackage {
                    task: name.to_string(),
                });
            }
        }

        for d in &self.dimensions {
            match d.split_once(':') {
                Some((key, _)) if !key.is_empty() => {}
                _ => {
                    return Err(SpecError::InvalidDimension {
                        task: name.to_string(),
                        dimension: d.clone(),
                    })
                }
            }
        }

        if self.isolate.is_empty() {
            return Err(SpecError::MissingIsolate {
                task: name.to_string(),
            });
        }

        if !(self.priority > 0.0 && self.priority <= 1.0) {
            return Err(SpecError::InvalidPriority {
                task: name.to_string(),
                priority: self.priority,
            });
        }

        Ok(())
    }
}

/// A named set of tasks that together form a larger unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    /// Relative priority
    #[serde(default = "default_priority")]
    pub priority: f64,

    /// Names of the tasks in this job
    #[serde(rename = "tasks", default)]
    pub task_specs: Vec<String>,
}

impl JobSpec {
    /// Create a job over the given tasks
    pub fn new<I, S>(tasks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            priority: default_priority(),
            task_specs: tasks.into_iter().map(Into::into).collect(),
        }
    }
}

/// All tasks and jobs declared by a repository at one commit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TasksCfg {
    /// Job specs by name
    #[serde(default)]
    pub jobs: BTreeMap<String, JobSpec>,

    /// Task specs by name
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskSpec>,
}

impl TasksCfg {
    /// Whether the config declares nothing
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.tasks.is_empty()
    }

    /// Validate the whole config: every spec individually, then the graph
    pub fn validate(&self) -> Result<(), SpecError> {
        for (name, task) in &self.tasks {
            task.validate(name)?;
        }
        find_cycles(&self.tasks, &self.jobs)
    }
}

/// Parse and validate the contents of a tasks file
pub fn parse_tasks_cfg(contents: &str) -> Result<TasksCfg, SpecError> {
    let cfg: TasksCfg =
        serde_json::from_str(contents).map_err(|e| SpecError::Parse(e.to_string()))?;
    cfg.validate()?;
    debug!(
        tasks = cfg.tasks.len(),
        jobs = cfg.jobs.len(),
        "parsed tasks cfg"
    );
    Ok(cfg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first search for dependency cycles, starting at every job's tasks.
///
/// Also fails when a job or task names a task that does not exist, and when
/// a task cannot be reached from any job.
pub fn find_cycles(
    tasks: &BTreeMap<String, TaskSpec>,
    jobs: &BTreeMap<String, JobSpec>,
) -> Result<(), SpecError> {
    let mut state: HashMap<&str, VisitState> = tasks
        .keys()
        .map(|name| (name.as_str(), VisitState::Unvisited))
        .collect();

    for (job_name, job) in jobs {
        for task in &job.task_specs {
            match state.get(task.as_str()) {
                None => {
                    return Err(SpecError::UnknownJobTask {
                        job: job_name.clone(),
                        task: task.clone(),
                    })
                }
                Some(VisitState::Unvisited) => visit(task, tasks, &mut state)?,
                Some(_) => {}
            }
        }
    }

    if let Some((name, _)) = state
        .iter()
        .filter(|(_, s)| **s == VisitState::Unvisited)
        .min_by_key(|(name, _)| **name)
    {
        return Err(SpecError::Unreachable {
            task: name.to_string(),
        });
    }

    Ok(())
}

fn visit<'a>(
    name: &'a str,
    tasks: &'a BTreeMap<String, TaskSpec>,
    state: &mut HashMap<&'a str, VisitState>,
) -> Result<(), SpecError> {
    let Some(spec) = tasks.get(name) else {
        return Ok(());
    };
    state.insert(name, VisitState::InProgress);

    for dep in &spec.dependencies {
        match state.get(dep.as_str()) {
            None => {
                return Err(SpecError::UnknownDependency {
                    task: name.to_string(),
                    dependency: dep.clone(),
                })
            }
            Some(VisitState::Unvisited) => visit(dep, tasks, state)?,
            Some(VisitState::InProgress) => {
                return Err(SpecError::Cycle {
                    from: name.to_string(),
                    to: dep.clone(),
                })
            }
            Some(VisitState::Done) => {}
        }
    }

    state.insert(name, VisitState::Done);
    Ok(())
}

/// Errors in a tasks file
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpecError {
    /// The file is not valid JSON or has the wrong shape
    #[error("Failed to read tasks cfg: could not parse file: {0}")]
    Parse(String),

    /// A package is missing its name or path
    #[error("Task {task:?}: packages must have a name, path, and version")]
    InvalidPackage { task: String },

    /// A dimension is not `key:value`
    #[error("Task {task:?}: dimension {dimension:?} does not contain a colon")]
    InvalidDimension { task: String, dimension: String },

    /// No isolate manifest
    #[error("Task {task:?}: isolate file is required")]
    MissingIsolate { task: String },

    /// Priority outside (0, 1]
    #[error("Task {task:?}: priority {priority} is outside (0, 1]")]
    InvalidPriority { task: String, priority: f64 },

    /// A task depends on a task that is not declared
    #[error("Task {task:?} has unknown task {dependency:?} as a dependency")]
    UnknownDependency { task: String, dependency: String },

    /// A job lists a task that is not declared
    #[error("Job {job:?} has unknown task {task:?} as a dependency")]
    UnknownJobTask { job: String, task: String },

    /// Dependency cycle
    #[error("Found a circular dependency involving {from:?} and {to:?}")]
    Cycle { from: String, to: String },

    /// A task no job reaches
    #[error("Task {task:?} is not reachable by any job")]
    Unreachable { task: String },
}
