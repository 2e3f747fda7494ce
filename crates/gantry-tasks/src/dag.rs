//! Task graph construction and execution ordering

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::specs::{JobSpec, TaskSpec, TasksCfg};

/// A node in the task graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Task name
    pub name: String,
    /// The task spec
    pub spec: TaskSpec,
    /// Tasks that must succeed before this one
    pub dependencies: BTreeSet<String>,
    /// Tasks waiting on this one
    pub dependents: BTreeSet<String>,
    /// Execution wave (tasks in the same wave have no edges between them)
    pub wave: usize,
}

/// Directed acyclic graph of the tasks declared at one commit
#[derive(Debug, Clone)]
pub struct TaskDag {
    nodes: BTreeMap<String, TaskNode>,
    jobs: BTreeMap<String, JobSpec>,
    /// Tasks grouped by wave, wave 0 first
    waves: Vec<Vec<String>>,
    sorted_order: Vec<String>,
}

impl TaskDag {
    /// Build the graph for a tasks config.
    ///
    /// Fails on unknown dependencies and cycles. Reachability from jobs is
    /// not checked here; see [`TasksCfg::validate`].
    #[instrument(skip_all, fields(tasks = cfg.tasks.len(), jobs = cfg.jobs.len()))]
    pub fn from_config(cfg: &TasksCfg) -> Result<Self, DagError> {
        let mut nodes: BTreeMap<String, TaskNode> = BTreeMap::new();

        for (name, spec) in &cfg.tasks {
            let mut dependencies = BTreeSet::new();
            for dep in &spec.dependencies {
                if !cfg.tasks.contains_key(dep) {
                    return Err(DagError::TaskNotFound(dep.clone()));
                }
                dependencies.insert(dep.clone());
            }
            nodes.insert(
                name.clone(),
                TaskNode {
                    name: name.clone(),
                    spec: spec.clone(),
                    dependencies,
                    dependents: BTreeSet::new(),
                    wave: 0,
                },
            );
        }

        let all_deps: Vec<(String, BTreeSet<String>)> = nodes
            .iter()
            .map(|(name, node)| (name.clone(), node.dependencies.clone()))
            .collect();

        for (name, deps) in &all_deps {
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.insert(name.clone());
                }
            }
        }

        for job in cfg.jobs.values() {
            for task in &job.task_specs {
                if !nodes.contains_key(task) {
                    return Err(DagError::TaskNotFound(task.clone()));
                }
            }
        }

        let sorted_order = Self::topological_sort(&nodes)?;
        let waves = Self::compute_waves(&nodes, &sorted_order);

        for (wave_idx, wave_tasks) in waves.iter().enumerate() {
            for name in wave_tasks {
                if let Some(node) = nodes.get_mut(name) {
                    node.wave = wave_idx;
                }
            }
        }

        info!(
            task_count = nodes.len(),
            wave_count = waves.len(),
            "task graph built"
        );

        Ok(Self {
            nodes,
            jobs: cfg.jobs.clone(),
            waves,
            sorted_order,
        })
    }

    /// Topological sort using Kahn's algorithm. Dependencies come first.
    fn topological_sort(nodes: &BTreeMap<String, TaskNode>) -> Result<Vec<String>, DagError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut sorted: Vec<String> = Vec::new();

        for (name, node) in nodes {
            let degree = node.dependencies.len();
            in_degree.insert(name.as_str(), degree);
            if degree == 0 {
                queue.push_back(name.as_str());
            }
        }

        while let Some(name) = queue.pop_front() {
            sorted.push(name.to_string());

            if let Some(node) = nodes.get(name) {
                for dependent in &node.dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent.as_str());
                        }
                    }
                }
            }
        }

        if sorted.len() != nodes.len() {
            let in_sorted: HashSet<&String> = sorted.iter().collect();
            let cyclic: Vec<&str> = nodes
                .keys()
                .filter(|name| !in_sorted.contains(name))
                .map(String::as_str)
                .collect();
            return Err(DagError::CyclicDependency(cyclic.join(", ")));
        }

        Ok(sorted)
    }

    fn compute_waves(nodes: &BTreeMap<String, TaskNode>, sorted: &[String]) -> Vec<Vec<String>> {
        if sorted.is_empty() {
            return Vec::new();
        }

        let mut wave_map: HashMap<&str, usize> = HashMap::new();
        for name in sorted {
            if let Some(node) = nodes.get(name) {
                let wave = node
                    .dependencies
                    .iter()
                    .filter_map(|dep| wave_map.get(dep.as_str()))
                    .max()
                    .map(|w| w + 1)
                    .unwrap_or(0);
                wave_map.insert(name.as_str(), wave);
            }
        }

        let max_wave = wave_map.values().max().copied().unwrap_or(0);
        let mut waves: Vec<Vec<String>> = vec![Vec::new(); max_wave + 1];
        for name in sorted {
            if let Some(&wave) = wave_map.get(name.as_str()) {
                waves[wave].push(name.clone());
            }
        }
        for wave in &mut waves {
            wave.sort();
        }

        waves
    }

    /// All nodes, by task name
    pub fn nodes(&self) -> &BTreeMap<String, TaskNode> {
        &self.nodes
    }

    /// Look up a node
    pub fn get(&self, name: &str) -> Option<&TaskNode> {
        self.nodes.get(name)
    }

    /// Execution waves
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no tasks
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Tasks in dependency order
    pub fn sorted(&self) -> &[String] {
        &self.sorted_order
    }

    /// Declared job names, sorted
    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    /// Every task a job needs, directly or transitively, in dependency order
    pub fn tasks_for_job(&self, job: &str) -> Result<Vec<&str>, DagError> {
        let spec = self
            .jobs
            .get(job)
            .ok_or_else(|| DagError::JobNotFound(job.to_string()))?;

        let mut needed: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = spec.task_specs.iter().map(String::as_str).collect();
        while let Some(name) = queue.pop_front() {
            if !needed.insert(name) {
                continue;
            }
            if let Some(node) = self.nodes.get(name) {
                queue.extend(node.dependencies.iter().map(String::as_str));
            }
        }

        Ok(self
            .sorted_order
            .iter()
            .map(String::as_str)
            .filter(|name| needed.contains(name))
            .collect())
    }

    /// Human-readable summary of the execution plan
    pub fn execution_plan(&self) -> String {
        let mut plan = String::new();
        for (i, wave) in self.waves.iter().enumerate() {
            plan.push_str(&format!("Wave {} ({} tasks):\n", i, wave.len()));
            for name in wave {
                if let Some(node) = self.nodes.get(name) {
                    let deps: Vec<&str> = node.dependencies.iter().map(String::as_str).collect();
                    if deps.is_empty() {
                        plan.push_str(&format!("  {} -> {}\n", name, node.spec.isolate));
                    } else {
                        plan.push_str(&format!(
                            "  {} -> {} (after: {})\n",
                            name,
                            node.spec.isolate,
                            deps.join(", ")
                        ));
                    }
                }
            }
        }
        plan
    }
}

/// Errors during graph construction
#[derive(Debug, thiserror::Error)]
pub enum DagError {
    /// Cyclic dependency detected
    #[error("Cyclic dependency detected among tasks: {0}")]
    CyclicDependency(String),

    /// Task not declared
    #[error("Task '{0}' not found in tasks configuration")]
    TaskNotFound(String),

    /// Job not declared
    #[error("Job '{0}' not found in tasks configuration")]
    JobNotFound(String),
}
