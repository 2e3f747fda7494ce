//! Plan command

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::Args;
use console::style;
use serde::Serialize;
use tracing::{debug, info};

use gantry_core::config::{load_config_or_default, validation::validate_config};
use gantry_core::SchedulerConfig;
use gantry_git::RepoMap;
use gantry_tasks::backend::BackendError;
use gantry_tasks::{
    ExecutionBackend, ExecutionRequest, InMemoryTaskStore, PassOutcome, PassSummary,
    SchedulerOptions, TaskScheduler, TracingReporter, TriggeredTask,
};

use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Run one scheduling pass over the configured repositories
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Only consider this repository (repeatable)
    #[arg(long = "repo", value_name = "NAME")]
    pub repos: Vec<String>,

    /// Walk the submission step against a backend that runs nothing
    #[arg(long)]
    pub submit_none: bool,
}

/// Accepts every request without running it
#[derive(Debug, Default)]
struct NoneBackend;

impl ExecutionBackend for NoneBackend {
    fn trigger(&self, request: &ExecutionRequest) -> Result<TriggeredTask, BackendError> {
        debug!(name = %request.name, priority = request.priority, "not submitting");
        Ok(TriggeredTask {
            backend_task_id: String::new(),
            created: Utc::now(),
        })
    }
}

#[derive(Debug, Serialize)]
struct PlannedCandidate {
    id: String,
    repo: String,
    revision: String,
    name: String,
    score: f64,
    isolated_hashes: Vec<String>,
    stealing_from: Option<String>,
}

#[derive(Debug, Serialize)]
struct PlanReport {
    summary: PassSummary,
    ready: Vec<PlannedCandidate>,
    triggered: Vec<String>,
}

impl From<&PassOutcome> for PlanReport {
    fn from(outcome: &PassOutcome) -> Self {
        Self {
            summary: outcome.summary.clone(),
            ready: outcome
                .ready
                .iter()
                .map(|c| PlannedCandidate {
                    id: c.id(),
                    repo: c.repo_state.repo.clone(),
                    revision: c.repo_state.revision.clone(),
                    name: c.name.clone(),
                    score: c.score,
                    isolated_hashes: c.isolated_hashes.clone(),
                    stealing_from: c.stealing_from_id.clone(),
                })
                .collect(),
            triggered: outcome.triggered.iter().map(|t| t.id.clone()).collect(),
        }
    }
}

impl PlanCommand {
    /// Build the repository map, restricted to `--repo` when given
    fn repo_map(&self, config: &SchedulerConfig) -> anyhow::Result<RepoMap> {
        if self.repos.is_empty() {
            return Ok(RepoMap::from_config(config));
        }

        let mut map = RepoMap::new();
        for name in &self.repos {
            let path = config
                .repos
                .get(name)
                .with_context(|| format!("Repository '{}' is not configured", name))?;
            map = map.with_repo(name.clone(), path.clone());
        }
        Ok(map)
    }

    /// Execute the plan command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(repos = ?self.repos, submit_none = self.submit_none, "executing plan command");
        let cwd = std::env::current_dir()?;

        let (config, config_path) = load_config_or_default(&cwd);
        if let Err(e) = validate_config(&config) {
            output::error(&format!("Configuration validation: {}", e));
            std::process::exit(exit_codes::CONFIG_ERROR);
        }
        if config.repos.is_empty() {
            output::error("No repositories configured");
            std::process::exit(exit_codes::CONFIG_ERROR);
        }

        let source = Arc::new(self.repo_map(&config)?);
        let store = Arc::new(InMemoryTaskStore::new());
        let mut options = SchedulerOptions::from_config(&config.scheduling, &config.backend);
        options.submit = self.submit_none;

        let mut scheduler = TaskScheduler::new(
            options,
            source,
            store.clone(),
            store,
            Arc::new(TracingReporter),
        );
        if self.submit_none {
            scheduler = scheduler.with_backend(Arc::new(NoneBackend));
        }

        let rt = tokio::runtime::Runtime::new()?;
        let outcome = rt.block_on(scheduler.run_pass(Utc::now()))?;
        let report = PlanReport::from(&outcome);

        match cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Text => {
                if cli.quiet {
                    return Ok(());
                }
                println!("{}", output::header("Scheduling Plan"));
                println!();
                if let Some(path) = &config_path {
                    println!("{}", output::key_value("Config", &path.display().to_string()));
                } else {
                    println!("{}", output::key_value("Config", "defaults"));
                }
                let s = &report.summary;
                println!("{}", output::key_value("Commits", &s.repo_states.to_string()));
                println!(
                    "{}",
                    output::key_value(
                        "Configs",
                        &format!("{} loaded, {} rejected", s.configs_loaded, s.configs_rejected)
                    )
                );
                println!(
                    "{}",
                    output::key_value(
                        "Candidates",
                        &format!(
                            "{} total, {} ready, {} waiting, {} already covered",
                            s.candidates, s.ready, s.waiting, s.skipped
                        )
                    )
                );
                println!();

                if report.ready.is_empty() {
                    output::warning("Nothing ready to schedule");
                    return Ok(());
                }

                for c in &report.ready {
                    println!(
                        "  {} {} @ {}",
                        output::score_style().apply_to(format!("{:.4}", c.score)),
                        output::task_style().apply_to(&c.name),
                        output::revision_style().apply_to(format!("{}/{}", c.repo, short(&c.revision)))
                    );
                    if let Some(from) = &c.stealing_from {
                        println!("         {}", style(format!("takes commit from {}", from)).dim());
                    }
                }
                println!();

                if self.submit_none {
                    output::success(&format!(
                        "{} of {} ready candidates would be triggered",
                        report.triggered.len(),
                        report.ready.len()
                    ));
                }
            }
        }

        Ok(())
    }
}

fn short(revision: &str) -> &str {
    revision.get(..7).unwrap_or(revision)
}
