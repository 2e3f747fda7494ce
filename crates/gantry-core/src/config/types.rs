//! Settings types

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main settings for the Gantry scheduler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Version of the settings schema
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Scheduling window and scoring
    pub scheduling: SchedulingConfig,

    /// Execution backend request settings
    pub backend: BackendConfig,

    /// Repositories to schedule, keyed by repository identifier
    pub repos: BTreeMap<String, PathBuf>,
}

/// Scheduling window, scoring and concurrency settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Commits older than this many hours fall out of the window
    pub window_hours: u64,

    /// Age at which a candidate's score has decayed by half
    pub decay_half_life_hours: f64,

    /// Maximum number of configs loaded in parallel
    pub concurrency: usize,

    /// Maximum number of tasks submitted in one pass
    pub max_tasks_per_pass: usize,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            window_hours: 4 * 24,
            decay_half_life_hours: 24.0,
            concurrency: 8,
            max_tasks_per_pass: 100,
        }
    }
}

impl SchedulingConfig {
    /// The scheduling window as a duration. Saturates at `Duration::MAX`.
    pub fn window(&self) -> Duration {
        self.window_hours
            .checked_mul(60 * 60)
            .map(Duration::from_secs)
            .unwrap_or(Duration::MAX)
    }

    /// The score decay half-life as a duration. Saturates at
    /// `Duration::MAX`; negative values count as zero.
    pub fn decay_half_life(&self) -> Duration {
        let secs = self.decay_half_life_hours.max(0.0) * 60.0 * 60.0;
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Execution backend request settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Seconds a request may stay pending before the backend expires it
    pub expiration_secs: u64,

    /// Hard execution timeout in seconds
    pub execution_timeout_secs: u64,

    /// Seconds without output before the backend kills the task
    pub io_timeout_secs: u64,

    /// User recorded on submitted requests
    pub user: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            expiration_secs: 4 * 60 * 60,
            execution_timeout_secs: 60 * 60,
            io_timeout_secs: 20 * 60,
            user: "gantry-scheduler".to_string(),
        }
    }
}
