//! Validate command

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Args;
use console::style;
use serde::Serialize;
use tracing::info;

use gantry_tasks::{parse_tasks_cfg, TaskDag};

use crate::cli::{output, Cli, OutputFormat};
use crate::exit_codes;

/// Validate a tasks file and show its execution waves
#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Path to the tasks file
    pub file: PathBuf,
}

/// What validating a tasks file found
#[derive(Debug, Serialize)]
struct ValidationReport {
    valid: bool,
    tasks: usize,
    /// Tasks each job needs, in dependency order
    jobs: BTreeMap<String, Vec<String>>,
    waves: Vec<Vec<String>>,
    error: Option<String>,
    #[serde(skip)]
    plan: String,
}

impl ValidationReport {
    fn invalid(error: impl ToString) -> Self {
        Self {
            valid: false,
            tasks: 0,
            jobs: BTreeMap::new(),
            waves: Vec::new(),
            error: Some(error.to_string()),
            plan: String::new(),
        }
    }
}

fn check_tasks_file(contents: &str) -> ValidationReport {
    let cfg = match parse_tasks_cfg(contents) {
        Ok(cfg) => cfg,
        Err(e) => return ValidationReport::invalid(e),
    };
    let dag = match TaskDag::from_config(&cfg) {
        Ok(dag) => dag,
        Err(e) => return ValidationReport::invalid(e),
    };

    let mut jobs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for job in dag.job_names() {
        match dag.tasks_for_job(job) {
            Ok(tasks) => {
                jobs.insert(job.to_string(), tasks.into_iter().map(str::to_string).collect());
            }
            Err(e) => return ValidationReport::invalid(e),
        }
    }

    ValidationReport {
        valid: true,
        tasks: dag.len(),
        jobs,
        waves: dag.waves().to_vec(),
        error: None,
        plan: dag.execution_plan(),
    }
}

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<()> {
        info!(file = %self.file.display(), "executing validate command");

        let report = match std::fs::read_to_string(&self.file) {
            Ok(contents) => check_tasks_file(&contents),
            Err(e) => ValidationReport::invalid(format!("Failed to read {}: {}", self.file.display(), e)),
        };

        match cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Text => {
                if let Some(error) = &report.error {
                    output::error(error);
                } else if !cli.quiet {
                    println!("{}", output::header("Execution Plan"));
                    println!();
                    print!("{}", report.plan);
                    println!();
                    println!("{}", output::header("Jobs"));
                    for (job, tasks) in &report.jobs {
                        println!("{}", output::key_value(job, &tasks.join(", ")));
                    }
                    println!();
                    output::success(&format!(
                        "{} is valid: {} tasks in {} waves, {} jobs",
                        style(self.file.display()).cyan(),
                        report.tasks,
                        report.waves.len(),
                        report.jobs.len()
                    ));
                }
            }
        }

        if !report.valid {
            std::process::exit(exit_codes::VALIDATION_ERROR);
        }

        Ok(())
    }
}
