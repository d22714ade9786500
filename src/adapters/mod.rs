//! Adapter interfaces for external systems.
//!
//! The controller talks to three collaborators it does not own:
//! - a source repository (read branches, files and snapshots)
//! - a batch-job service (create jobs, start runs)
//! - a result reporter (terminal result of an invoked action)

pub mod git;
pub mod jobs;
pub mod reporter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::FailureDetails;

pub use git::GitRepository;
pub use jobs::ProcessJobService;
pub use reporter::{HttpResultReporter, JobResult, JobToken, PendingResults, ReportError};

/// Errors reading from a source repository
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("'{path}' does not exist at revision {revision}")]
    FileNotFound { revision: String, path: String },

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Revision not found: {0}")]
    RevisionNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Repository unavailable: {0}")]
    Unavailable(String),
}

/// Read access to a version-control repository
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Human-readable repository name
    fn name(&self) -> &str;

    /// Resolve a branch name to its head commit id
    async fn resolve_branch(&self, branch: &str) -> Result<String, SourceError>;

    /// Read one file at a revision
    async fn get_file(&self, revision: &str, path: &str) -> Result<Vec<u8>, SourceError>;

    /// Snapshot of the whole tree at a revision (tar archive)
    async fn archive(&self, revision: &str) -> Result<Vec<u8>, SourceError>;
}

/// Errors from the batch-job service
#[derive(Debug, Error)]
pub enum JobServiceError {
    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A named batch job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,

    /// Role the job runs as
    pub role: String,

    /// Entry-point file name the job runs
    pub script_name: String,

    pub created_at: DateTime<Utc>,
}

/// Request to start one run of a job
#[derive(Debug, Clone)]
pub struct JobRunRequest {
    pub job_name: String,
    pub script_name: String,
    pub script: Vec<u8>,
    pub revision: String,
}

/// Batch-job backend
///
/// `start_job_run` returns once the run is accepted. Callers never wait for
/// the job itself to finish.
#[async_trait]
pub trait JobService: Send + Sync {
    async fn get_job(&self, name: &str) -> Result<Option<JobDefinition>, JobServiceError>;

    async fn create_job(&self, definition: JobDefinition) -> Result<(), JobServiceError>;

    /// Start a run and return its run id
    async fn start_job_run(&self, request: JobRunRequest) -> Result<String, JobServiceError>;
}

/// Receiver of an invoked action's terminal result
///
/// Both methods consume the token, so a handler can report at most once.
#[async_trait]
pub trait JobResultReporter: Send + Sync {
    /// `PutJobSuccessResult`
    async fn put_job_success_result(&self, token: JobToken, job_run_id: String)
        -> Result<(), ReportError>;

    /// `PutJobFailureResult`
    async fn put_job_failure_result(
        &self,
        token: JobToken,
        failure: FailureDetails,
    ) -> Result<(), ReportError>;
}
