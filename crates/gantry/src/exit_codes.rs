//! Exit codes for the CLI

/// Settings file missing or invalid
pub const CONFIG_ERROR: i32 = 2;

/// Tasks file failed validation
pub const VALIDATION_ERROR: i32 = 5;
