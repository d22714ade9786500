//! Command-line interface for etl-deploy.
//!
//! Provides commands for triggering the pipeline (by hand, from a change
//! event, or by watching the repository), invoking the launcher directly,
//! inspecting executions, and collecting expired ones.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use uuid::Uuid;

use crate::adapters::{
    GitRepository, HttpResultReporter, JobResult, JobResultReporter, JobToken, ProcessJobService,
    ReportError, SourceRepository,
};
use crate::config::ResolvedConfig;
use crate::core::{
    collect_garbage, ArtifactStore, ExecutionHandle, Invocation, LaunchOutcome, LauncherFunction,
    PipelineController, PipelineDefinition, RetentionPolicy,
};
use crate::domain::{Execution, ExecutionContext, ExecutionState, FailureDetails};
use crate::ingest::{read_change_event, BranchWatcher, WatcherConfig};

/// etl-deploy - Source-triggered ETL deployment pipeline
#[derive(Parser, Debug)]
#[command(name = "etl-deploy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Pipeline definition to use instead of the configured one
    #[arg(long, global = true, env = "ETL_DEPLOY_PIPELINE")]
    pub pipeline: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline once
    Run {
        /// Commit to deploy (defaults to the tracked branch head)
        #[arg(short, long)]
        revision: Option<String>,
    },

    /// Feed a repository change event through the event rule
    Event {
        /// Event JSON file, or - for stdin
        source: String,
    },

    /// Invoke the launcher function directly
    Launch {
        /// Invocation payload JSON file, or - for stdin
        payload: String,

        /// Post the result to this callback endpoint instead of printing it
        #[arg(long)]
        callback_url: Option<String>,
    },

    /// Check the status of an execution
    Status {
        /// Execution ID (UUID)
        execution_id: String,
    },

    /// List recent executions
    Executions {
        /// Maximum number of executions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Watch the repository and run the pipeline on every branch update
    Watch,

    /// Remove executions past the retention window
    Gc {
        /// Report what would be removed without removing it
        #[arg(long)]
        dry_run: bool,

        /// Override the configured retention window
        #[arg(long)]
        days: Option<u32>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let mut config = ResolvedConfig::load()?;
        if let Some(pipeline) = self.pipeline {
            config.pipeline_file = Some(pipeline);
        }

        match self.command {
            Commands::Run { revision } => run_pipeline(&config, revision).await,
            Commands::Event { source } => handle_event(&config, &source).await,
            Commands::Launch {
                payload,
                callback_url,
            } => launch(&config, &payload, callback_url).await,
            Commands::Status { execution_id } => show_status(&config, &execution_id).await,
            Commands::Executions { limit } => list_executions(&config, limit).await,
            Commands::Watch => watch(&config).await,
            Commands::Gc { dry_run, days } => gc(&config, dry_run, days).await,
            Commands::Config => show_config(&config),
        }
    }
}

/// Build the controller and its collaborators from configuration
pub fn build_controller(
    config: &ResolvedConfig,
    definition: PipelineDefinition,
) -> Result<PipelineController> {
    let repository = repository(config);
    let launcher = launcher(config, repository.clone());

    PipelineController::builder(definition, config.executions_dir(), repository)
        .function(config.function_name.clone(), launcher)
        .action_timeout(config.action_timeout)
        .build()
}

fn repository(config: &ResolvedConfig) -> Arc<GitRepository> {
    Arc::new(GitRepository::new(
        config.repository.name.clone(),
        config.repository.path.clone(),
    ))
}

fn launcher(config: &ResolvedConfig, repository: Arc<GitRepository>) -> LauncherFunction {
    let jobs = Arc::new(ProcessJobService::new(
        config.jobs_dir(),
        config.job.interpreter.clone(),
    ));
    LauncherFunction::new(repository, jobs, config.launcher.clone())
}

/// Run the pipeline by hand
async fn run_pipeline(config: &ResolvedConfig, revision: Option<String>) -> Result<()> {
    let controller = build_controller(config, config.pipeline_definition()?)?;
    let handle = controller.trigger(ExecutionContext::manual(revision)).await?;
    eprintln!("[Execution {} started]", handle.id);

    finish(handle).await
}

/// Run a change event through the rule
async fn handle_event(config: &ResolvedConfig, source: &str) -> Result<()> {
    let event = read_change_event(source).await?;
    let controller = build_controller(config, config.pipeline_definition()?)?;

    match config.event_rule().dispatch(&controller, &event).await? {
        Some(handle) => finish(handle).await,
        None => {
            eprintln!(
                "[Event {} on '{}' does not match the rule; nothing triggered]",
                event.detail.event, event.detail.reference_name
            );
            Ok(())
        }
    }
}

/// Wait for an execution and print its outcome
async fn finish(handle: ExecutionHandle) -> Result<()> {
    let execution = handle.wait().await?;
    print_execution(&execution);

    match &execution.state {
        ExecutionState::Succeeded => {
            eprintln!("\n[Execution {} succeeded]", execution.id);
        }
        ExecutionState::Failed { error } => {
            eprintln!("\n[Execution {} failed: {}]", execution.id, error);
            std::process::exit(1);
        }
        ExecutionState::InProgress => {
            eprintln!("\n[Execution {} still in progress]", execution.id);
        }
    }

    Ok(())
}

/// Launcher invocation payload
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LaunchPayload {
    function_name: String,

    /// JSON string, or an object that is serialized back to one
    user_parameters: serde_json::Value,

    #[serde(default)]
    input_artifacts: Vec<String>,

    /// Execution whose artifacts are the inputs
    execution_id: Option<Uuid>,

    /// Revision to read the entry point from
    source_ref: Option<String>,

    job_token: Option<Uuid>,
}

/// Prints the reported result as JSON on stdout
struct PrintReporter;

#[async_trait]
impl JobResultReporter for PrintReporter {
    async fn put_job_success_result(
        &self,
        token: JobToken,
        job_run_id: String,
    ) -> Result<(), ReportError> {
        print_result(&token, &JobResult::Success { job_run_id });
        Ok(())
    }

    async fn put_job_failure_result(
        &self,
        token: JobToken,
        failure: FailureDetails,
    ) -> Result<(), ReportError> {
        print_result(&token, &JobResult::Failure { failure });
        Ok(())
    }
}

fn print_result(token: &JobToken, result: &JobResult) {
    let body = serde_json::json!({ "job_token": token.to_string(), "outcome": result });
    println!("{}", body);
}

/// Invoke the launcher outside of a pipeline execution
async fn launch(config: &ResolvedConfig, payload: &str, callback_url: Option<String>) -> Result<()> {
    let content = if payload == "-" {
        use tokio::io::AsyncReadExt;
        let mut buffer = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buffer)
            .await
            .context("Failed to read payload from stdin")?;
        buffer
    } else {
        tokio::fs::read_to_string(payload)
            .await
            .with_context(|| format!("Failed to read payload file: {}", payload))?
    };
    let payload: LaunchPayload =
        serde_json::from_str(&content).context("Failed to parse launcher payload")?;

    let repository = repository(config);

    let mut input_artifacts = Vec::new();
    if let Some(execution_id) = payload.execution_id {
        let store = ArtifactStore::new(config.executions_dir());
        for name in &payload.input_artifacts {
            let artifact = store
                .describe(execution_id, name)
                .await?
                .with_context(|| format!("Artifact '{}' not found in {}", name, execution_id))?;
            input_artifacts.push(artifact);
        }
    }

    let source_ref = match payload
        .source_ref
        .or_else(|| input_artifacts.iter().find_map(|a| a.revision.clone()))
    {
        Some(revision) => revision,
        None => repository
            .resolve_branch(&config.repository.branch)
            .await
            .with_context(|| format!("Failed to resolve branch {}", config.repository.branch))?,
    };

    let user_parameters = match payload.user_parameters {
        serde_json::Value::String(raw) => raw,
        other => other.to_string(),
    };

    let invocation = Invocation {
        token: payload.job_token.map(JobToken::from_uuid).unwrap_or_default(),
        function_name: payload.function_name,
        user_parameters,
        input_artifacts,
        source_ref,
    };

    let launcher = launcher(config, repository);
    let outcome = match callback_url {
        Some(url) => {
            let reporter = HttpResultReporter::new(url, Duration::from_secs(30))?;
            launcher.handle(invocation, &reporter).await
        }
        None => launcher.handle(invocation, &PrintReporter).await,
    };

    if let LaunchOutcome::Failure(failure) = outcome {
        eprintln!("\n[Launch failed: {}]", failure);
        std::process::exit(1);
    }

    Ok(())
}

/// Show the status of an execution
async fn show_status(config: &ResolvedConfig, execution_id_str: &str) -> Result<()> {
    let execution_id = Uuid::parse_str(execution_id_str)
        .with_context(|| format!("Invalid execution ID: {}", execution_id_str))?;

    let execution = crate::core::EventStore::load(&config.executions_dir(), execution_id)
        .await?
        .with_context(|| format!("Execution {} not found", execution_id))?;

    print_execution(&execution);

    let artifacts = ArtifactStore::new(config.executions_dir())
        .list(execution_id)
        .await?;
    if !artifacts.is_empty() {
        println!("\nArtifacts:");
        for artifact in artifacts {
            println!(
                "  {} v{} ({} bytes, revision {})",
                artifact.name,
                artifact.version(),
                artifact.size_bytes,
                artifact.revision.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}

fn print_execution(execution: &Execution) {
    println!("Execution ID: {}", execution.id);
    println!("Pipeline: {}", execution.pipeline_name);
    println!("Trigger: {}", execution.trigger);
    println!("Revision: {}", execution.revision.as_deref().unwrap_or("-"));
    println!("State: {}", state_label(&execution.state));
    println!("Started: {}", execution.started_at);
    if let Some(completed) = execution.completed_at {
        println!("Completed: {}", completed);
    }

    println!("\nStages:");
    for stage in &execution.stages {
        println!("  {}: {:?}", stage.name, stage.status);
        for action in &stage.actions {
            let duration = action
                .duration_ms
                .map(|ms| format!(" ({}ms)", ms))
                .unwrap_or_default();
            println!("    {}: {:?}{}", action.name, action.status, duration);
            if let Some(failure) = &action.failure {
                println!("      {}", failure);
            }
        }
    }
}

fn state_label(state: &ExecutionState) -> &'static str {
    match state {
        ExecutionState::InProgress => "in-progress",
        ExecutionState::Succeeded => "succeeded",
        ExecutionState::Failed { .. } => "failed",
    }
}

/// List recent executions
async fn list_executions(config: &ResolvedConfig, limit: usize) -> Result<()> {
    let controller = build_controller(config, config.pipeline_definition()?)?;
    let executions = controller.list(limit).await?;

    if executions.is_empty() {
        println!("No executions found");
        return Ok(());
    }

    println!(
        "{:<38} {:<20} {:<13} {:<12} {}",
        "EXECUTION ID", "PIPELINE", "STATE", "REVISION", "TRIGGER"
    );
    println!("{}", "-".repeat(100));

    for execution in executions {
        let revision: String = execution
            .revision
            .as_deref()
            .unwrap_or("-")
            .chars()
            .take(10)
            .collect();
        println!(
            "{:<38} {:<20} {:<13} {:<12} {}",
            execution.id,
            execution.pipeline_name,
            state_label(&execution.state),
            revision,
            execution.trigger
        );
    }

    Ok(())
}

/// Watch the repository and dispatch every change through the rule
async fn watch(config: &ResolvedConfig) -> Result<()> {
    let controller = build_controller(config, config.pipeline_definition()?)?;
    let rule = config.event_rule();

    let repository = repository(config);
    let git_dir = repository.git_dir().await?;
    let watcher = BranchWatcher::new(
        repository,
        WatcherConfig::new(
            git_dir,
            config.repository.arn.clone(),
            config.repository.name.clone(),
            config.repository.branch.clone(),
        ),
    );

    let (events, handle) = watcher.watch().await?;
    eprintln!(
        "[Watching {} branch '{}'; Ctrl-C to stop]",
        config.repository.path.display(),
        config.repository.branch
    );

    let finished = rule
        .serve(&controller, events, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    eprintln!("[Stopped after {} execution(s)]", finished);

    handle.stop().await
}

/// Remove expired executions
async fn gc(config: &ResolvedConfig, dry_run: bool, days: Option<u32>) -> Result<()> {
    let policy = days
        .map(RetentionPolicy::days)
        .unwrap_or_else(|| config.retention_policy());

    let report = collect_garbage(&config.executions_dir(), policy, Utc::now(), dry_run).await?;

    let verb = if dry_run { "Would remove" } else { "Removed" };
    for id in &report.removed {
        println!("{} {}", verb, id);
    }
    eprintln!(
        "[{} {} execution(s), kept {}]",
        verb,
        report.removed.len(),
        report.kept
    );

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!("etl-deploy configuration");
    println!();
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:        {}", config.home.display());
    println!("  Executions:  {}", config.executions_dir().display());
    println!("  Jobs:        {}", config.jobs_dir().display());
    println!();
    println!("Repository:");
    println!("  Name:    {}", config.repository.name);
    println!("  Path:    {}", config.repository.path.display());
    println!("  ARN:     {}", config.repository.arn);
    println!("  Branch:  {}", config.repository.branch);
    println!();
    println!("Pipeline:");
    println!("  Name:        {}", config.pipeline_name);
    match &config.pipeline_file {
        Some(path) => println!("  Definition:  {}", path.display()),
        None => println!("  Definition:  (standard Source -> Deploy)"),
    }
    println!();
    println!("Launcher:");
    println!("  Function:     {}", config.function_name);
    println!("  Entry point:  {}", config.launcher.entry_point);
    println!("  Timeout:      {}s", config.action_timeout.as_secs());
    if config.launcher.passable_roles.is_empty() {
        println!("  Roles:        (any)");
    } else {
        println!("  Roles:        {}", config.launcher.passable_roles.join(", "));
    }
    println!();
    println!("Job:");
    println!("  Name:         {}", config.job.name);
    println!("  Role:         {}", config.job.execution_role);
    println!("  Interpreter:  {}", config.job.interpreter);
    println!();
    println!("Retention: {} days", config.retention_days);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_waits_for_the_execution() {
        let cli = Cli::try_parse_from(["etl-deploy", "run", "--revision", "c1"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run { revision: Some(ref r) } if r == "c1"
        ));

        // Returning early would drop the execution with the runtime
        assert!(Cli::try_parse_from(["etl-deploy", "run", "--detach"]).is_err());
    }

    #[test]
    fn test_gc_arguments() {
        let cli = Cli::try_parse_from(["etl-deploy", "gc", "--dry-run", "--days", "7"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Gc {
                dry_run: true,
                days: Some(7)
            }
        ));
    }
}
