//! Launcher function invoked by the Deploy stage.
//!
//! The launcher is stateless and safe to invoke concurrently. For each
//! invocation it:
//! 1. parses the user parameters (`job_name`, `execution_role`)
//! 2. reads the entry-point file from the repository at the source revision
//! 3. creates the job if absent and starts a new run
//! 4. reports exactly one terminal result for the invocation's token
//!
//! Submission is fire-and-forget: success is reported as soon as the job
//! service accepts the run. The job itself is never awaited, so a deployment
//! succeeds even if the job later fails. There are no retries; the first
//! failure is reported as-is.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::adapters::{
    JobDefinition, JobResultReporter, JobRunRequest, JobService, JobServiceError, JobToken,
    SourceError, SourceRepository,
};
use crate::domain::{Artifact, FailureDetails, FailureKind};

/// Default entry-point file fetched from the repository root
pub const DEFAULT_ENTRY_POINT: &str = "etl.py";

/// Static launcher settings
#[derive(Debug, Clone)]
pub struct LauncherSettings {
    /// File fetched from the repository root
    pub entry_point: String,

    /// Roles the launcher may hand to a job; empty allows any
    pub passable_roles: Vec<String>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            passable_roles: Vec::new(),
        }
    }
}

impl LauncherSettings {
    fn may_pass(&self, role: &str) -> bool {
        self.passable_roles.is_empty() || self.passable_roles.iter().any(|r| r == role)
    }

    /// File name the job runs; the entry point may sit in a subdirectory
    fn script_name(&self) -> String {
        Path::new(&self.entry_point)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.entry_point.clone())
    }
}

/// User parameters of a Deploy action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchParameters {
    #[serde(alias = "glue_job_name")]
    pub job_name: String,

    #[serde(alias = "glue_role")]
    pub execution_role: String,
}

impl LaunchParameters {
    /// Parse the JSON string passed as `UserParameters`
    pub fn parse(user_parameters: &str) -> Result<Self, LaunchError> {
        let params: Self = serde_json::from_str(user_parameters)
            .map_err(|e| LaunchError::InvalidParameters(e.to_string()))?;

        if params.job_name.trim().is_empty() {
            return Err(LaunchError::InvalidParameters("job_name is empty".to_string()));
        }
        if params.execution_role.trim().is_empty() {
            return Err(LaunchError::InvalidParameters(
                "execution_role is empty".to_string(),
            ));
        }

        Ok(params)
    }
}

/// One invocation of the launcher
#[derive(Debug)]
pub struct Invocation {
    /// Execution token; consumed by the single result report
    pub token: JobToken,

    /// `FunctionName` the pipeline invoked
    pub function_name: String,

    /// `UserParameters` as a JSON string
    pub user_parameters: String,

    /// Input artifacts (`InputArtifacts`)
    pub input_artifacts: Vec<Artifact>,

    /// Revision to read the entry point from
    pub source_ref: String,
}

/// Why a launch failed
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Invalid user parameters: {0}")]
    InvalidParameters(String),

    #[error("Failed to fetch entry point: {0}")]
    SourceFetch(#[from] SourceError),

    #[error("Role '{0}' may not be passed to jobs")]
    RoleNotPassable(String),

    #[error("Failed to submit job: {0}")]
    JobSubmission(#[from] JobServiceError),
}

impl LaunchError {
    /// Stable reason string reported to the pipeline
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidParameters(_) => "invalid user parameters",
            Self::SourceFetch(_) => "source fetch error",
            Self::RoleNotPassable(_) | Self::JobSubmission(_) => "job submission error",
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InvalidParameters(_) => FailureKind::InvalidParameters,
            Self::SourceFetch(SourceError::PermissionDenied(_)) => FailureKind::PermissionDenied,
            Self::SourceFetch(_) => FailureKind::SourceFetch,
            Self::RoleNotPassable(_) => FailureKind::PermissionDenied,
            Self::JobSubmission(JobServiceError::PermissionDenied(_)) => {
                FailureKind::PermissionDenied
            }
            Self::JobSubmission(_) => FailureKind::JobSubmission,
        }
    }

    pub fn to_failure(&self) -> FailureDetails {
        FailureDetails::new(self.kind(), self.reason(), self.to_string())
    }
}

/// Terminal outcome of an invocation (`Pending → Success | Failure`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Success { job_run_id: String },
    Failure(FailureDetails),
}

impl LaunchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Stateless handler that starts batch jobs for a pipeline
pub struct LauncherFunction {
    repository: Arc<dyn SourceRepository>,
    jobs: Arc<dyn JobService>,
    settings: LauncherSettings,
}

impl LauncherFunction {
    pub fn new(
        repository: Arc<dyn SourceRepository>,
        jobs: Arc<dyn JobService>,
        settings: LauncherSettings,
    ) -> Self {
        Self {
            repository,
            jobs,
            settings,
        }
    }

    pub fn settings(&self) -> &LauncherSettings {
        &self.settings
    }

    /// Handle one invocation and report its result.
    ///
    /// Exactly one of `put_job_success_result` / `put_job_failure_result` is
    /// called. A failure to deliver the report is logged; the returned
    /// outcome is unaffected.
    #[instrument(
        skip(self, invocation, reporter),
        fields(function = %invocation.function_name, token = %invocation.token, revision = %invocation.source_ref)
    )]
    pub async fn handle(
        &self,
        invocation: Invocation,
        reporter: &dyn JobResultReporter,
    ) -> LaunchOutcome {
        let Invocation {
            token,
            user_parameters,
            input_artifacts,
            source_ref,
            ..
        } = invocation;

        if !input_artifacts.is_empty() {
            let names: Vec<&str> = input_artifacts.iter().map(|a| a.name.as_str()).collect();
            info!(inputs = ?names, "Launcher invoked");
        }

        let outcome = match self.launch(&user_parameters, &source_ref).await {
            Ok(job_run_id) => {
                info!(%job_run_id, "Job run submitted");
                LaunchOutcome::Success { job_run_id }
            }
            Err(e) => {
                error!(reason = e.reason(), error = %e, "Launch failed");
                LaunchOutcome::Failure(e.to_failure())
            }
        };

        let reported = match &outcome {
            LaunchOutcome::Success { job_run_id } => {
                reporter
                    .put_job_success_result(token, job_run_id.clone())
                    .await
            }
            LaunchOutcome::Failure(failure) => {
                reporter.put_job_failure_result(token, failure.clone()).await
            }
        };

        if let Err(e) = reported {
            warn!(error = %e, "Failed to report launch result");
        }

        outcome
    }

    async fn launch(&self, user_parameters: &str, source_ref: &str) -> Result<String, LaunchError> {
        let params = LaunchParameters::parse(user_parameters)?;

        // Nothing is submitted unless the entry point could be read.
        let script = self
            .repository
            .get_file(source_ref, &self.settings.entry_point)
            .await?;

        if !self.settings.may_pass(&params.execution_role) {
            return Err(LaunchError::RoleNotPassable(params.execution_role));
        }

        self.submit(&params, script, source_ref).await
    }

    async fn submit(
        &self,
        params: &LaunchParameters,
        script: Vec<u8>,
        source_ref: &str,
    ) -> Result<String, LaunchError> {
        if self.jobs.get_job(&params.job_name).await?.is_none() {
            let definition = JobDefinition {
                name: params.job_name.clone(),
                role: params.execution_role.clone(),
                script_name: self.settings.script_name(),
                created_at: Utc::now(),
            };

            match self.jobs.create_job(definition).await {
                Ok(()) => info!(job = %params.job_name, "Job created"),
                // Another execution created it first
                Err(JobServiceError::AlreadyExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let run_id = self
            .jobs
            .start_job_run(JobRunRequest {
                job_name: params.job_name.clone(),
                script_name: self.settings.script_name(),
                script,
                revision: source_ref.to_string(),
            })
            .await?;

        Ok(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parameters() {
        let params =
            LaunchParameters::parse(r#"{"job_name": "myjob", "execution_role": "etl-role"}"#)
                .unwrap();
        assert_eq!(params.job_name, "myjob");
        assert_eq!(params.execution_role, "etl-role");
    }

    #[test]
    fn test_parse_legacy_parameter_names() {
        let params = LaunchParameters::parse(
            r#"{"glue_job_name": "codepipeline-glue-deploy", "glue_role": "GlueRole"}"#,
        )
        .unwrap();
        assert_eq!(params.job_name, "codepipeline-glue-deploy");
        assert_eq!(params.execution_role, "GlueRole");
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        let err = LaunchParameters::parse(r#"{"job_name": "myjob"}"#).unwrap_err();
        assert_eq!(err.reason(), "invalid user parameters");

        let err = LaunchParameters::parse(r#"{"job_name": " ", "execution_role": "r"}"#)
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::InvalidParameters);
    }

    #[test]
    fn test_error_classification() {
        let missing = LaunchError::SourceFetch(SourceError::FileNotFound {
            revision: "abc".to_string(),
            path: "etl.py".to_string(),
        });
        assert_eq!(missing.reason(), "source fetch error");
        assert_eq!(missing.kind(), FailureKind::SourceFetch);

        let denied = LaunchError::SourceFetch(SourceError::PermissionDenied("repo".to_string()));
        assert_eq!(denied.reason(), "source fetch error");
        assert_eq!(denied.kind(), FailureKind::PermissionDenied);

        let rejected = LaunchError::JobSubmission(JobServiceError::Rejected("quota".to_string()));
        assert_eq!(rejected.reason(), "job submission error");
        assert_eq!(rejected.kind(), FailureKind::JobSubmission);

        let role = LaunchError::RoleNotPassable("admin".to_string());
        assert_eq!(role.reason(), "job submission error");
        assert_eq!(role.kind(), FailureKind::PermissionDenied);
    }

    #[test]
    fn test_role_allow_list() {
        let open = LauncherSettings::default();
        assert!(open.may_pass("anything"));

        let restricted = LauncherSettings {
            passable_roles: vec!["etl-role".to_string()],
            ..Default::default()
        };
        assert!(restricted.may_pass("etl-role"));
        assert!(!restricted.may_pass("admin"));
    }

    #[test]
    fn test_script_name_from_entry_point() {
        assert_eq!(LauncherSettings::default().script_name(), "etl.py");

        let nested = LauncherSettings {
            entry_point: "jobs/main.py".to_string(),
            ..Default::default()
        };
        assert_eq!(nested.script_name(), "main.py");
    }
}
