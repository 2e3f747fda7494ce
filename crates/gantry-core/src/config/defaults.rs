//! Default settings values

use super::types::SchedulerConfig;

/// Default settings file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "gantry.toml";

/// Default settings file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "gantry.yaml";

/// Get list of settings file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".gantry.toml",
        ".gantry.yaml",
    ]
}

/// Generate default settings TOML
pub fn default_config_toml() -> String {
    let config = SchedulerConfig::default();
    toml::to_string_pretty(&config).unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default settings template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Gantry scheduler settings

[scheduling]
window_hours = 96
decay_half_life_hours = 24.0
concurrency = 8
max_tasks_per_pass = 100

[backend]
expiration_secs = 14400
execution_timeout_secs = 3600
io_timeout_secs = 1200
user = "gantry-scheduler"

[repos]
"#;
