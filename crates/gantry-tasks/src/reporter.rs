//! Scheduling progress reporting

use std::time::Duration;

use gantry_core::RepoState;

use crate::candidate::WaitReason;

/// Events emitted during a scheduling pass
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    /// A pass is starting
    PassStarted { repo_states: usize },
    /// A tasks file was loaded
    ConfigLoaded { repo_state: RepoState, tasks: usize },
    /// A tasks file failed to load; this state is skipped
    ConfigRejected { repo_state: RepoState, error: String },
    /// A candidate is blocked on a dependency
    CandidateWaiting {
        candidate_id: String,
        dependency: String,
        reason: WaitReason,
    },
    /// A candidate could run now
    CandidateReady { candidate_id: String, score: f64 },
    /// A candidate was dropped because a task already covers its commit
    CandidateSkipped {
        candidate_id: String,
        existing_task_id: String,
    },
    /// A candidate was submitted to the backend
    TaskTriggered {
        candidate_id: String,
        task_id: String,
        backend_task_id: String,
    },
    /// Submitting a candidate failed; it is retried next pass
    TriggerFailed { candidate_id: String, error: String },
    /// The pass finished
    PassCompleted {
        candidates: usize,
        ready: usize,
        triggered: usize,
        duration: Duration,
    },
}

/// Trait for reporting scheduling progress
pub trait SchedulerReporter: Send + Sync {
    /// Handle a scheduler event
    fn report(&self, event: &SchedulerEvent);
}

/// Reporter that logs to tracing
#[derive(Debug, Default)]
pub struct TracingReporter;

impl SchedulerReporter for TracingReporter {
    fn report(&self, event: &SchedulerEvent) {
        match event {
            SchedulerEvent::PassStarted { repo_states } => {
                tracing::info!(repo_states, "scheduling pass started");
            }
            SchedulerEvent::ConfigLoaded { repo_state, tasks } => {
                tracing::debug!(repo_state = %repo_state, tasks, "tasks cfg loaded");
            }
            SchedulerEvent::ConfigRejected { repo_state, error } => {
                tracing::warn!(repo_state = %repo_state, error = %error, "skipping repo state");
            }
            SchedulerEvent::CandidateWaiting {
                candidate_id,
                dependency,
                reason,
            } => {
                tracing::debug!(candidate = %candidate_id, dependency = %dependency, reason = %reason, "candidate waiting");
            }
            SchedulerEvent::CandidateReady {
                candidate_id,
                score,
            } => {
                tracing::debug!(candidate = %candidate_id, score, "candidate ready");
            }
            SchedulerEvent::CandidateSkipped {
                candidate_id,
                existing_task_id,
            } => {
                tracing::debug!(candidate = %candidate_id, existing = %existing_task_id, "commit already covered");
            }
            SchedulerEvent::TaskTriggered {
                candidate_id,
                task_id,
                backend_task_id,
            } => {
                tracing::info!(candidate = %candidate_id, task_id = %task_id, backend_task_id = %backend_task_id, "task triggered");
            }
            SchedulerEvent::TriggerFailed {
                candidate_id,
                error,
            } => {
                tracing::error!(candidate = %candidate_id, error = %error, "failed to trigger task");
            }
            SchedulerEvent::PassCompleted {
                candidates,
                ready,
                triggered,
                duration,
            } => {
                tracing::info!(
                    "Scheduling pass complete: {} candidates, {} ready, {} triggered ({:.1}s)",
                    candidates,
                    ready,
                    triggered,
                    duration.as_secs_f64()
                );
            }
        }
    }
}

/// Reporter that collects events for later inspection
#[derive(Debug, Default)]
pub struct CollectingReporter {
    events: std::sync::Mutex<Vec<SchedulerEvent>>,
}

impl CollectingReporter {
    /// Get all collected events
    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SchedulerReporter for CollectingReporter {
    fn report(&self, event: &SchedulerEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
