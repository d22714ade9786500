//! Pipeline controller.
//!
//! Runs a pipeline execution as a sequential stage state machine:
//! - stages run strictly in declaration order
//! - actions within a stage run concurrently; the stage waits for all of them
//! - the first failed stage fails the execution and no later stage starts
//! - an action never starts before its declared input artifacts exist
//! - invoked actions must report within their timeout or they fail
//!
//! Every transition is appended to the execution's event log, which is the
//! source of truth for `status` and `list`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{JobResult, PendingResults, SourceError, SourceRepository};
use crate::domain::{
    ActionStatus, Event, EventType, Execution, ExecutionContext, FailureDetails, FailureKind,
};

use super::artifact_store::ArtifactStore;
use super::event_store::EventStore;
use super::launcher::{Invocation, LauncherFunction};
use super::pipeline::{ActionDeclaration, ActionKind, PipelineDefinition, StageDeclaration};

/// Default time an invoked action has to report
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Drives executions of one pipeline
#[derive(Clone)]
pub struct PipelineController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    definition: PipelineDefinition,
    executions_dir: PathBuf,
    artifacts: ArtifactStore,
    repository: Arc<dyn SourceRepository>,
    functions: HashMap<String, Arc<LauncherFunction>>,
    results: Arc<PendingResults>,
    action_timeout: Duration,
}

/// Handle to a triggered execution
pub struct ExecutionHandle {
    /// Id of the new execution
    pub id: Uuid,
    task: JoinHandle<Result<Execution>>,
}

impl ExecutionHandle {
    /// Wait for the execution to reach a terminal state
    pub async fn wait(self) -> Result<Execution> {
        self.task
            .await
            .with_context(|| format!("Execution {} task panicked", self.id))?
    }
}

/// What a successful action hands back to its stage
struct ActionSuccess {
    revision: Option<String>,
}

/// Configures a controller before it starts running executions
pub struct ControllerBuilder {
    definition: PipelineDefinition,
    executions_dir: PathBuf,
    repository: Arc<dyn SourceRepository>,
    functions: HashMap<String, Arc<LauncherFunction>>,
    action_timeout: Duration,
}

impl ControllerBuilder {
    /// Register a launcher under the function name Invoke actions refer to
    pub fn function(mut self, name: impl Into<String>, launcher: LauncherFunction) -> Self {
        self.functions.insert(name.into(), Arc::new(launcher));
        self
    }

    /// Set the default action timeout
    pub fn action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Validate the definition and build the controller
    pub fn build(self) -> Result<PipelineController> {
        self.definition.validate()?;

        for stage in &self.definition.stages {
            for action in &stage.actions {
                if let ActionKind::Invoke { function_name, .. } = &action.kind {
                    if !self.functions.contains_key(function_name) {
                        warn!(
                            action = %action.name,
                            function = %function_name,
                            "No launcher registered for function; the action will fail"
                        );
                    }
                }
            }
        }

        Ok(PipelineController {
            inner: Arc::new(ControllerInner {
                artifacts: ArtifactStore::new(&self.executions_dir),
                definition: self.definition,
                executions_dir: self.executions_dir,
                repository: self.repository,
                functions: self.functions,
                results: Arc::new(PendingResults::new()),
                action_timeout: self.action_timeout,
            }),
        })
    }
}

impl PipelineController {
    /// Start configuring a controller for a pipeline definition
    pub fn builder(
        definition: PipelineDefinition,
        executions_dir: impl Into<PathBuf>,
        repository: Arc<dyn SourceRepository>,
    ) -> ControllerBuilder {
        ControllerBuilder {
            definition,
            executions_dir: executions_dir.into(),
            repository,
            functions: HashMap::new(),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.inner.definition
    }

    pub fn executions_dir(&self) -> &Path {
        &self.inner.executions_dir
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.inner.artifacts
    }

    /// Start a new execution and return immediately.
    ///
    /// The `ExecutionStarted` event is written before this returns, so the
    /// execution is visible to `status` as soon as the id is known.
    #[instrument(skip(self, context), fields(pipeline = %self.inner.definition.name, trigger = %context.trigger))]
    pub async fn trigger(&self, context: ExecutionContext) -> Result<ExecutionHandle> {
        let execution_id = Uuid::new_v4();
        let store = Arc::new(EventStore::open(&self.inner.executions_dir, execution_id).await?);

        let started = Event::new(
            execution_id,
            EventType::ExecutionStarted,
            format!("Pipeline '{}' started", self.inner.definition.name),
            ActionStatus::InProgress,
        )
        .with_pipeline(self.inner.definition.name.clone(), context.trigger.to_string())
        .with_revision(context.revision.clone());
        store.append(&started).await?;

        info!(%execution_id, revision = ?context.revision, "Execution started");

        let controller = self.clone();
        let task = tokio::spawn(async move {
            controller
                .run_execution(store, execution_id, context.revision)
                .await
        });

        Ok(ExecutionHandle {
            id: execution_id,
            task,
        })
    }

    /// Trigger an execution and wait for it to finish
    pub async fn run(&self, context: ExecutionContext) -> Result<Execution> {
        self.trigger(context).await?.wait().await
    }

    /// Get status of an execution by ID
    pub async fn status(&self, execution_id: Uuid) -> Result<Execution> {
        EventStore::load(&self.inner.executions_dir, execution_id)
            .await?
            .with_context(|| format!("Execution {} not found", execution_id))
    }

    /// List recent executions, most recent first
    pub async fn list(&self, limit: usize) -> Result<Vec<Execution>> {
        let ids = EventStore::list_executions(&self.inner.executions_dir).await?;
        let mut executions = Vec::new();

        for id in ids {
            if let Ok(Some(execution)) = EventStore::load(&self.inner.executions_dir, id).await {
                executions.push(execution);
            }
        }

        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit);

        Ok(executions)
    }

    /// Drive an execution to a terminal state.
    ///
    /// Store errors abort the stage loop; the execution is then failed with
    /// an internal error so its log never ends in progress.
    #[instrument(skip_all, fields(execution_id = %execution_id))]
    async fn run_execution(
        &self,
        store: Arc<EventStore>,
        execution_id: Uuid,
        revision: Option<String>,
    ) -> Result<Execution> {
        if let Err(e) = self.run_stages(&store, execution_id, revision).await {
            error!("Execution aborted: {:#}", e);
            let event = Event::new(
                execution_id,
                EventType::ExecutionFailed,
                "Execution aborted",
                ActionStatus::Failed,
            )
            .with_failure(FailureDetails::internal(format!("{e:#}")));
            store
                .append(&event)
                .await
                .with_context(|| format!("Execution {} aborted: {:#}", execution_id, e))?;
        }

        self.finish(&store, execution_id).await
    }

    /// Run the stages in order and append the terminal event
    async fn run_stages(
        &self,
        store: &Arc<EventStore>,
        execution_id: Uuid,
        mut revision: Option<String>,
    ) -> Result<()> {
        for stage in &self.inner.definition.stages {
            match self
                .run_stage(store, execution_id, stage, revision.clone())
                .await?
            {
                Ok(resolved) => {
                    if revision.is_none() {
                        revision = resolved;
                    }
                }
                Err(failure) => {
                    error!(stage = %stage.name, %failure, "Execution failed");
                    let event = Event::new(
                        execution_id,
                        EventType::ExecutionFailed,
                        format!("Stage '{}' failed", stage.name),
                        ActionStatus::Failed,
                    )
                    .in_stage(stage.name.clone())
                    .with_failure(failure);
                    return store.append(&event).await;
                }
            }
        }

        info!("Execution succeeded");
        let event = Event::new(
            execution_id,
            EventType::ExecutionSucceeded,
            format!("Pipeline '{}' succeeded", self.inner.definition.name),
            ActionStatus::Succeeded,
        )
        .with_revision(revision);
        store.append(&event).await
    }

    async fn finish(&self, store: &EventStore, execution_id: Uuid) -> Result<Execution> {
        store
            .execution()
            .await?
            .with_context(|| format!("Execution {} has no events", execution_id))
    }

    /// Run every action of a stage concurrently and wait for all of them.
    ///
    /// The outer `Result` carries store errors; the inner one is the stage
    /// outcome (revision resolved by a source action, or the first failure).
    async fn run_stage(
        &self,
        store: &Arc<EventStore>,
        execution_id: Uuid,
        stage: &StageDeclaration,
        revision: Option<String>,
    ) -> Result<Result<Option<String>, FailureDetails>> {
        store
            .append(
                &Event::new(
                    execution_id,
                    EventType::StageStarted,
                    format!("Stage '{}' started", stage.name),
                    ActionStatus::InProgress,
                )
                .in_stage(stage.name.clone()),
            )
            .await?;

        let mut tasks: JoinSet<Result<Result<ActionSuccess, FailureDetails>>> = JoinSet::new();

        for action in &stage.actions {
            let controller = self.clone();
            let store = store.clone();
            let stage_name = stage.name.clone();
            let action = action.clone();
            let revision = revision.clone();

            tasks.spawn(async move {
                controller
                    .run_action(&store, execution_id, &stage_name, &action, revision)
                    .await
            });
        }

        let mut resolved = None;
        let mut failures = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Ok(success))) => {
                    if success.revision.is_some() {
                        resolved = success.revision;
                    }
                }
                Ok(Ok(Err(failure))) => failures.push(failure),
                Ok(Err(e)) => return Err(e),
                Err(join_error) => {
                    failures.push(FailureDetails::internal(format!(
                        "action task aborted: {join_error}"
                    )));
                }
            }
        }

        let (event_type, status, summary) = if failures.is_empty() {
            (
                EventType::StageSucceeded,
                ActionStatus::Succeeded,
                format!("Stage '{}' succeeded", stage.name),
            )
        } else {
            (
                EventType::StageFailed,
                ActionStatus::Failed,
                format!(
                    "Stage '{}' failed ({} of {} actions)",
                    stage.name,
                    failures.len(),
                    stage.actions.len()
                ),
            )
        };

        let mut event = Event::new(execution_id, event_type, summary, status)
            .in_stage(stage.name.clone());
        if let Some(first) = failures.first() {
            event = event.with_failure(first.clone());
        }
        store.append(&event).await?;

        match failures.into_iter().next() {
            Some(failure) => Ok(Err(failure)),
            None => Ok(Ok(resolved)),
        }
    }

    #[instrument(skip_all, fields(stage = %stage_name, action = %action.name))]
    async fn run_action(
        &self,
        store: &EventStore,
        execution_id: Uuid,
        stage_name: &str,
        action: &ActionDeclaration,
        revision: Option<String>,
    ) -> Result<Result<ActionSuccess, FailureDetails>> {
        let started = Instant::now();

        store
            .append(
                &Event::new(
                    execution_id,
                    EventType::ActionStarted,
                    format!("Action '{}' started", action.name),
                    ActionStatus::InProgress,
                )
                .in_stage(stage_name)
                .for_action(action.name.clone()),
            )
            .await?;

        let outcome = match self.check_inputs(execution_id, action).await? {
            Err(failure) => Err(failure),
            Ok(()) => match &action.kind {
                ActionKind::Source { branch } => {
                    self.run_source(execution_id, action, branch, revision).await?
                }
                ActionKind::Invoke {
                    function_name,
                    user_parameters,
                } => {
                    self.run_invoke(execution_id, action, function_name, user_parameters, revision)
                        .await?
                }
            },
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        let event = match &outcome {
            Ok(success) => {
                debug!(duration_ms, "Action succeeded");
                Event::new(
                    execution_id,
                    EventType::ActionSucceeded,
                    format!("Action '{}' succeeded in {}ms", action.name, duration_ms),
                    ActionStatus::Succeeded,
                )
                .with_revision(success.revision.clone())
                .with_artifacts(action.output_artifacts.clone())
            }
            Err(failure) => {
                warn!(duration_ms, %failure, "Action failed");
                Event::new(
                    execution_id,
                    EventType::ActionFailed,
                    format!("Action '{}' failed: {}", action.name, failure),
                    ActionStatus::Failed,
                )
                .with_failure(failure.clone())
            }
        };

        store
            .append(
                &event
                    .in_stage(stage_name)
                    .for_action(action.name.clone())
                    .with_duration(duration_ms),
            )
            .await?;

        Ok(outcome)
    }

    /// Every declared input must exist before the action starts work
    async fn check_inputs(
        &self,
        execution_id: Uuid,
        action: &ActionDeclaration,
    ) -> Result<Result<(), FailureDetails>> {
        for input in &action.input_artifacts {
            if !self.inner.artifacts.contains(execution_id, input).await? {
                return Ok(Err(FailureDetails::new(
                    FailureKind::MissingArtifact,
                    "missing input artifact",
                    format!("artifact '{}' does not exist", input),
                )));
            }
        }
        Ok(Ok(()))
    }

    /// Snapshot the repository into the action's output artifacts
    async fn run_source(
        &self,
        execution_id: Uuid,
        action: &ActionDeclaration,
        branch: &str,
        revision: Option<String>,
    ) -> Result<Result<ActionSuccess, FailureDetails>> {
        let repository = &self.inner.repository;

        let revision = match revision {
            Some(revision) => revision,
            None => match repository.resolve_branch(branch).await {
                Ok(head) => head,
                Err(e) => return Ok(Err(source_failure(e))),
            },
        };

        let snapshot = match repository.archive(&revision).await {
            Ok(snapshot) => snapshot,
            Err(e) => return Ok(Err(source_failure(e))),
        };

        for output in &action.output_artifacts {
            let artifact = self
                .inner
                .artifacts
                .put(
                    execution_id,
                    output,
                    &action.name,
                    Some(revision.clone()),
                    &snapshot,
                )
                .await?;
            info!(
                artifact = %artifact.name,
                version = artifact.version(),
                %revision,
                "Source artifact stored"
            );
        }

        Ok(Ok(ActionSuccess {
            revision: Some(revision),
        }))
    }

    /// Invoke a launcher and wait for its reported result
    async fn run_invoke(
        &self,
        execution_id: Uuid,
        action: &ActionDeclaration,
        function_name: &str,
        user_parameters: &serde_json::Value,
        revision: Option<String>,
    ) -> Result<Result<ActionSuccess, FailureDetails>> {
        let Some(launcher) = self.inner.functions.get(function_name) else {
            return Ok(Err(FailureDetails::internal(format!(
                "function '{}' is not registered",
                function_name
            ))));
        };

        let mut input_artifacts = Vec::new();
        for input in &action.input_artifacts {
            if let Some(artifact) = self.inner.artifacts.describe(execution_id, input).await? {
                input_artifacts.push(artifact);
            }
        }

        // The revision the inputs were built from wins over the trigger's.
        let source_ref = input_artifacts
            .iter()
            .find_map(|a| a.revision.clone())
            .or(revision);
        let Some(source_ref) = source_ref else {
            return Ok(Err(FailureDetails::new(
                FailureKind::SourceFetch,
                "source fetch error",
                "no source revision is known for this execution",
            )));
        };

        let (token, result_rx) = self.inner.results.register();
        let token_id = token.id();
        let invocation = Invocation {
            token,
            function_name: function_name.to_string(),
            user_parameters: user_parameters.to_string(),
            input_artifacts,
            source_ref,
        };

        let limit = action.timeout(self.inner.action_timeout);
        let reporter = self.inner.results.clone();
        let launcher = launcher.clone();

        let invoked = tokio::time::timeout(limit, async move {
            launcher.handle(invocation, reporter.as_ref()).await;
            result_rx.await
        })
        .await;

        let outcome = match invoked {
            Ok(Ok(JobResult::Success { job_run_id })) => {
                info!(%job_run_id, "Launcher reported success");
                Ok(ActionSuccess { revision: None })
            }
            Ok(Ok(JobResult::Failure { failure })) => Err(failure),
            Ok(Err(_)) => Err(FailureDetails::internal(
                "launcher finished without reporting a result",
            )),
            Err(_) => {
                self.inner.results.cancel(token_id);
                Err(FailureDetails::timeout(limit.as_secs()))
            }
        };

        Ok(outcome)
    }
}

fn source_failure(error: SourceError) -> FailureDetails {
    let kind = match error {
        SourceError::PermissionDenied(_) => FailureKind::PermissionDenied,
        _ => FailureKind::SourceFetch,
    };
    FailureDetails::new(kind, "source fetch error", error.to_string())
}
