//! Gantry Tasks - Task scheduling engine
//!
//! This crate parses per-commit tasks files, caches them by repo state,
//! turns task specs into ranked candidates, reconciles task records with
//! backend reports and stores them with optimistic concurrency.

pub mod backend;
pub mod cache;
pub mod candidate;
pub mod dag;
pub mod reporter;
pub mod scheduler;
pub mod specs;
pub mod store;
pub mod task;

#[cfg(test)]
mod testing;

pub use backend::{BackendState, ExecutionBackend, ExecutionRequest, TaskReport, TriggeredTask};
pub use cache::{CacheError, TaskCfgCache};
pub use candidate::{DepsStatus, TaskCandidate, WaitReason};
pub use dag::{TaskDag, TaskNode};
pub use reporter::{CollectingReporter, SchedulerEvent, SchedulerReporter, TracingReporter};
pub use scheduler::{PassOutcome, PassSummary, SchedulerOptions, TaskScheduler};
pub use specs::{parse_tasks_cfg, JobSpec, TaskSpec, TasksCfg, TASKS_CFG_FILE};
pub use store::{DependencyIndex, InMemoryTaskStore, StoreError, TaskStore};
pub use task::{Task, TaskKey, TaskStatus};
