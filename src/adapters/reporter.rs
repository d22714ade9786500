//! Result reporters for invoked actions.
//!
//! `PendingResults` is the in-process callback endpoint used by the
//! controller: it hands out a receiver per job token and completes it when
//! the launcher reports. `HttpResultReporter` posts the same results to a
//! remote callback URL for launchers running in another process.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::JobResultReporter;
use crate::domain::FailureDetails;

/// Execution token identifying one action invocation.
///
/// Not `Clone`: reporting a result consumes it.
#[derive(Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobToken(Uuid);

impl JobToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for JobToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Terminal result of an invoked action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum JobResult {
    Success { job_run_id: String },
    Failure { failure: FailureDetails },
}

/// Errors delivering a result
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("No invocation is waiting for token {0}")]
    UnknownToken(Uuid),

    #[error("Callback request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Callback rejected with status {0}")]
    Rejected(u16),
}

/// In-process callback endpoint keyed by job token
#[derive(Debug, Default)]
pub struct PendingResults {
    waiting: Mutex<HashMap<Uuid, oneshot::Sender<JobResult>>>,
}

impl PendingResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token and return the receiver its result lands on
    pub fn register(&self) -> (JobToken, oneshot::Receiver<JobResult>) {
        let token = JobToken::new();
        let (tx, rx) = oneshot::channel();
        self.lock().insert(token.id(), tx);
        (token, rx)
    }

    /// Forget a token whose invocation was abandoned (e.g. timed out)
    pub fn cancel(&self, token_id: Uuid) {
        self.lock().remove(&token_id);
    }

    /// Number of invocations still waiting for a result
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn complete(&self, token: JobToken, result: JobResult) -> Result<(), ReportError> {
        let sender = self
            .lock()
            .remove(&token.id())
            .ok_or(ReportError::UnknownToken(token.id()))?;

        // The receiver may already be gone if the controller gave up.
        let _ = sender.send(result);
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, oneshot::Sender<JobResult>>> {
        self.waiting
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl JobResultReporter for PendingResults {
    async fn put_job_success_result(
        &self,
        token: JobToken,
        job_run_id: String,
    ) -> Result<(), ReportError> {
        self.complete(token, JobResult::Success { job_run_id })
    }

    async fn put_job_failure_result(
        &self,
        token: JobToken,
        failure: FailureDetails,
    ) -> Result<(), ReportError> {
        self.complete(token, JobResult::Failure { failure })
    }
}

/// Posts results to `{base_url}/jobs/{token}/success` or `/failure`
pub struct HttpResultReporter {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResultReporter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, token: &JobToken, outcome: &str) -> String {
        format!("{}/jobs/{}/{}", self.base_url, token, outcome)
    }

    async fn post(&self, url: String, result: &JobResult) -> Result<(), ReportError> {
        let response = self.client.post(&url).json(result).send().await?;

        if !response.status().is_success() {
            return Err(ReportError::Rejected(response.status().as_u16()));
        }

        tracing::debug!(%url, "Result delivered");
        Ok(())
    }
}

#[async_trait]
impl JobResultReporter for HttpResultReporter {
    async fn put_job_success_result(
        &self,
        token: JobToken,
        job_run_id: String,
    ) -> Result<(), ReportError> {
        let url = self.url(&token, "success");
        self.post(url, &JobResult::Success { job_run_id }).await
    }

    async fn put_job_failure_result(
        &self,
        token: JobToken,
        failure: FailureDetails,
    ) -> Result<(), ReportError> {
        let url = self.url(&token, "failure");
        self.post(url, &JobResult::Failure { failure }).await
    }
}
