//! Gantry Core - Shared foundation for the Gantry task scheduler
//!
//! This crate provides the error types, repository state keys, the
//! repository-content collaborator trait and the scheduler settings used by
//! the other Gantry crates.

pub mod config;
pub mod error;
pub mod source;
pub mod types;

pub use config::{BackendConfig, SchedulerConfig, SchedulingConfig};
pub use error::{ConfigError, GantryError, GitError, Result};
pub use source::RepoSource;
pub use types::{CommitInfo, Patch, RepoState};
