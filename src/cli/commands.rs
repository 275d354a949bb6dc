//! CLI command definitions for devflow.
//!
//! `run` drives tasks through the workflow, `score` shows how the scheduler
//! would rank a task file right now, and `config` prints the effective
//! configuration.

use crate::agents::{LlmStageWorker, ScriptedWorker, StageWorker, StageWorkers};
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::metrics::{export_metrics, init_metrics};
use crate::pipeline::{
    failure_breakdown, Notifier, Orchestrator, TracingSink, WorkflowConfig, WorkflowStats,
};
use crate::scheduler::{rank, RankedTask};
use crate::task::{Task, TaskId, TaskState, DEFAULT_LANGUAGE, DEFAULT_PRIORITY};
use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Multi-stage development workflow runner.
#[derive(Parser)]
#[command(name = "devflow")]
#[command(about = "Drive development tasks through a validated multi-stage workflow")]
#[command(version)]
#[command(
    long_about = "devflow moves each task through decomposition, implementation, testing, quality assessment and integration.\n\nEvery stage's output is reviewed by the next stage's worker before the task advances; rejected output is regenerated with the reviewer's feedback.\n\nExample usage:\n  devflow run \"Add a /health endpoint\" --max-concurrency 2\n  devflow run --tasks-file tasks.yaml --output report.json"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run tasks through the workflow until each completes or fails.
    Run(RunArgs),

    /// Show the effective priority of every task in a task file.
    Score(ScoreArgs),

    /// Print the effective configuration as YAML.
    Config(ConfigArgs),
}

/// Arguments for the run command.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task descriptions. Each becomes a task with default priority.
    pub descriptions: Vec<String>,

    /// YAML or JSON file holding a list of task specs.
    #[arg(short = 't', long)]
    pub tasks_file: Option<PathBuf>,

    /// Configuration file (YAML). Environment variables override it.
    #[arg(short = 'c', long, env = "DEVFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the configured number of concurrent stages.
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Use deterministic local workers instead of an LLM.
    #[arg(long)]
    pub dry_run: bool,

    /// Write the final report here instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Write Prometheus metrics text here after the run.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
}

/// Arguments for the score command.
#[derive(Parser, Debug)]
pub struct ScoreArgs {
    /// YAML or JSON file holding a list of task specs.
    #[arg(short = 't', long)]
    pub tasks_file: PathBuf,

    /// Configuration file (YAML) supplying the scoring weights.
    #[arg(short = 'c', long, env = "DEVFLOW_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Arguments for the config command.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Configuration file (YAML). Environment variables override it.
    #[arg(short = 'c', long, env = "DEVFLOW_CONFIG")]
    pub config: Option<PathBuf>,
}

/// One entry of a task file.
///
/// `blocks` lists ids of other tasks in the same file that wait on this one.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub blocks: Vec<String>,
}

impl TaskSpec {
    fn into_task(self) -> Task {
        let mut task = Task::new(self.description)
            .with_language(self.language.unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()))
            .with_priority(self.priority.unwrap_or(i64::from(DEFAULT_PRIORITY)))
            .with_requirements(self.requirements);
        if let Some(id) = self.id {
            task = task.with_id(TaskId::from_string(id));
        }
        for blocked in self.blocks {
            task = task.blocks(TaskId::from_string(blocked));
        }
        task
    }
}

/// Read task specs from `path`. `.json` files are parsed as JSON, anything
/// else as YAML.
pub fn load_task_specs(path: &Path) -> anyhow::Result<Vec<TaskSpec>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tasks file {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let specs: Vec<TaskSpec> = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid YAML in {}", path.display()))?
    };
    Ok(specs)
}

/// Build the task list from a task file and loose descriptions, file first.
pub fn collect_tasks(
    descriptions: &[String],
    tasks_file: Option<&Path>,
) -> anyhow::Result<Vec<Task>> {
    let mut tasks = Vec::new();
    if let Some(path) = tasks_file {
        tasks.extend(load_task_specs(path)?.into_iter().map(TaskSpec::into_task));
    }
    tasks.extend(descriptions.iter().map(Task::new));

    let ids: HashSet<&TaskId> = tasks.iter().map(|task| &task.id).collect();
    for task in &tasks {
        for blocked in &task.blocking_tasks {
            if !ids.contains(blocked) {
                warn!(task_id = %task.id, blocked = %blocked, "Task blocks an unknown task id");
            }
        }
    }
    Ok(tasks)
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: String,
    pub tasks: Vec<TaskReport>,
    pub failures: BTreeMap<&'static str, usize>,
    pub stats: WorkflowStats,
}

/// Outcome of a single task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub description: String,
    pub state: TaskState,
    pub priority: u8,
    pub stages_completed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Output of the last stage that produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
}

impl TaskReport {
    fn from_task(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            description: task.description.clone(),
            state: task.state(),
            priority: task.priority(),
            stages_completed: task.metadata().len(),
            failure_code: task.failure_reason().map(|reason| reason.code()),
            failure: task.failure_reason().map(|reason| reason.explanation()),
            final_output: task
                .metadata()
                .values()
                .next_back()
                .map(|output| output.content.clone()),
        }
    }
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_workflow_command(args).await?,
        Commands::Score(args) => run_score_command(args)?,
        Commands::Config(args) => run_config_command(args)?,
    }
    Ok(())
}

fn build_workers(
    config: &WorkflowConfig,
    dry_run: bool,
) -> anyhow::Result<Vec<Arc<dyn StageWorker>>> {
    if dry_run {
        info!("Dry run: using scripted workers");
        return Ok(ScriptedWorker::all());
    }

    let client = LiteLlmClient::from_env().map_err(|e| {
        anyhow::anyhow!(
            "Failed to initialize LLM client: {}. Set LITELLM_API_BASE and LITELLM_API_KEY, or pass --dry-run.",
            e
        )
    })?;
    info!(
        api_base = %client.api_base(),
        model = %client.default_model(),
        "Using LiteLLM client from environment"
    );
    let llm: Arc<dyn LlmProvider> = Arc::new(client);

    Ok(LlmStageWorker::all(
        llm,
        config.model.as_deref().unwrap_or_default(),
        config.temperature,
        config.max_tokens,
    ))
}

async fn run_workflow_command(args: RunArgs) -> anyhow::Result<()> {
    let mut config = WorkflowConfig::load(args.config.as_deref())?;
    if let Some(max_concurrency) = args.max_concurrency {
        config = config.with_max_concurrency(max_concurrency);
        config.validate()?;
    }

    let tasks = collect_tasks(&args.descriptions, args.tasks_file.as_deref())?;
    if tasks.is_empty() {
        anyhow::bail!("No tasks given. Pass descriptions or --tasks-file.");
    }

    if args.metrics_out.is_some() {
        init_metrics()?;
    }

    let workers = StageWorkers::new(build_workers(&config, args.dry_run)?)?;
    let max_concurrency = config.max_concurrency;
    let orchestrator = Orchestrator::new(config, workers)?
        .with_notifier(Notifier::new().with_sink(Arc::new(TracingSink)));

    let finished = orchestrator.run(tasks, max_concurrency).await?;

    let failures = failure_breakdown(&finished);
    let status = if failures.is_empty() { "completed" } else { "partial" };
    let report = RunReport {
        status: status.to_string(),
        tasks: finished.iter().map(TaskReport::from_task).collect(),
        failures,
        stats: orchestrator.stats(),
    };

    info!(
        tasks = report.tasks.len(),
        failed = report.failures.values().sum::<usize>(),
        "Workflow run finished"
    );

    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            fs::write(path, json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{}", json),
    }

    if let Some(path) = &args.metrics_out {
        fs::write(path, export_metrics())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    Ok(())
}

fn run_score_command(args: ScoreArgs) -> anyhow::Result<()> {
    let config = WorkflowConfig::load(args.config.as_deref())?;
    let tasks = collect_tasks(&[], Some(args.tasks_file.as_path()))?;
    let ranked: Vec<RankedTask> = rank(&tasks, Utc::now(), &config.priority);
    println!("{}", serde_json::to_string_pretty(&ranked)?);
    Ok(())
}

fn run_config_command(args: ConfigArgs) -> anyhow::Result<()> {
    let config = WorkflowConfig::load(args.config.as_deref())?;
    print!("{}", config.to_yaml()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command_defaults() {
        let cli = Cli::try_parse_from(["devflow", "run", "Add a /health endpoint"])
            .expect("should parse");
        assert_eq!(cli.log_level, "info");

        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.descriptions, vec!["Add a /health endpoint".to_string()]);
                assert!(args.tasks_file.is_none());
                assert!(args.max_concurrency.is_none());
                assert!(!args.dry_run);
                assert!(args.output.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_command_with_options() {
        let cli = Cli::try_parse_from([
            "devflow",
            "run",
            "--tasks-file",
            "tasks.yaml",
            "--max-concurrency",
            "2",
            "--dry-run",
            "-o",
            "report.json",
            "--log-level",
            "debug",
        ])
        .expect("should parse");
        assert_eq!(cli.log_level, "debug");

        match cli.command {
            Commands::Run(args) => {
                assert!(args.descriptions.is_empty());
                assert_eq!(args.tasks_file, Some(PathBuf::from("tasks.yaml")));
                assert_eq!(args.max_concurrency, Some(2));
                assert!(args.dry_run);
                assert_eq!(args.output, Some(PathBuf::from("report.json")));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_score_requires_tasks_file() {
        assert!(Cli::try_parse_from(["devflow", "score"]).is_err());
    }

    #[test]
    fn test_collect_tasks_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
- id: TASK-schema
  description: Design the orders schema
  priority: 80
  blocks: [TASK-api]
- id: TASK-api
  description: Expose orders over HTTP
  language: rust
  requirements: ["paginate results"]
"#
        )
        .unwrap();

        let tasks = collect_tasks(&["Write a README".to_string()], Some(file.path())).unwrap();
        assert_eq!(tasks.len(), 3);

        assert_eq!(tasks[0].id.as_str(), "TASK-schema");
        assert_eq!(tasks[0].priority(), 80);
        assert!(tasks[0].blocking_tasks.contains(&TaskId::from_string("TASK-api")));

        assert_eq!(tasks[1].language, "rust");
        assert_eq!(tasks[1].requirements, vec!["paginate results".to_string()]);
        assert_eq!(tasks[1].priority(), DEFAULT_PRIORITY);

        assert_eq!(tasks[2].description, "Write a README");
        assert_eq!(tasks[2].state(), TaskState::Created);
    }

    #[test]
    fn test_collect_tasks_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"[{{"description": "Fix the login bug", "priority": 250}}]"#).unwrap();

        let tasks = collect_tasks(&[], Some(file.path())).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].priority(), 100);
    }

    #[test]
    fn test_task_file_rejects_unknown_fields() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "- description: x\n  owner: someone\n").unwrap();
        assert!(load_task_specs(file.path()).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("report.json");

        let cli = Cli::try_parse_from([
            "devflow",
            "run",
            "Add a /health endpoint",
            "Document the API",
            "--dry-run",
            "--max-concurrency",
            "2",
            "--output",
            output.to_str().unwrap(),
        ])
        .unwrap();
        run_with_cli(cli).await.unwrap();

        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(report["status"], "completed");
        let tasks = report["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 2);
        for task in tasks {
            assert_eq!(task["state"], "COMPLETED");
            assert_eq!(task["stages_completed"], 5);
        }
    }
}
