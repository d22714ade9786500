//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use etl_deploy::adapters::{
    JobDefinition, JobResultReporter, JobRunRequest, JobService, JobServiceError, JobToken,
    ReportError, SourceError, SourceRepository,
};
use etl_deploy::domain::FailureDetails;

/// Repository with branches and per-commit file trees held in memory
#[derive(Default)]
pub struct InMemoryRepository {
    branches: Mutex<HashMap<String, String>>,
    commits: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    denied: bool,
    occupy_artifacts_in: Option<PathBuf>,
    pub get_file_calls: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository that refuses every read
    pub fn denied() -> Self {
        Self {
            denied: true,
            ..Self::default()
        }
    }

    /// While archiving, put a plain file where each execution's artifacts
    /// directory belongs, so storing the snapshot fails
    pub fn occupying_artifacts(self, executions_dir: impl Into<PathBuf>) -> Self {
        Self {
            occupy_artifacts_in: Some(executions_dir.into()),
            ..self
        }
    }

    /// Add a commit with the given files and move the branch to it
    pub fn commit(self, branch: &str, commit_id: &str, files: &[(&str, &str)]) -> Self {
        self.push(branch, commit_id, files);
        self
    }

    pub fn push(&self, branch: &str, commit_id: &str, files: &[(&str, &str)]) {
        let tree = files
            .iter()
            .map(|(path, content)| (path.to_string(), content.as_bytes().to_vec()))
            .collect();
        self.commits
            .lock()
            .unwrap()
            .insert(commit_id.to_string(), tree);
        self.branches
            .lock()
            .unwrap()
            .insert(branch.to_string(), commit_id.to_string());
    }

    fn tree(&self, revision: &str) -> Result<HashMap<String, Vec<u8>>, SourceError> {
        if self.denied {
            return Err(SourceError::PermissionDenied("repository".to_string()));
        }
        self.commits
            .lock()
            .unwrap()
            .get(revision)
            .cloned()
            .ok_or_else(|| SourceError::RevisionNotFound(revision.to_string()))
    }
}

#[async_trait]
impl SourceRepository for InMemoryRepository {
    fn name(&self) -> &str {
        "etl"
    }

    async fn resolve_branch(&self, branch: &str) -> Result<String, SourceError> {
        self.branches
            .lock()
            .unwrap()
            .get(branch)
            .cloned()
            .ok_or_else(|| SourceError::BranchNotFound(branch.to_string()))
    }

    async fn get_file(&self, revision: &str, path: &str) -> Result<Vec<u8>, SourceError> {
        self.get_file_calls.fetch_add(1, Ordering::SeqCst);
        self.tree(revision)?
            .remove(path)
            .ok_or_else(|| SourceError::FileNotFound {
                revision: revision.to_string(),
                path: path.to_string(),
            })
    }

    async fn archive(&self, revision: &str) -> Result<Vec<u8>, SourceError> {
        if let Some(executions_dir) = &self.occupy_artifacts_in {
            for entry in std::fs::read_dir(executions_dir).unwrap() {
                let artifacts = entry.unwrap().path().join("artifacts");
                if !artifacts.exists() {
                    std::fs::write(&artifacts, b"in the way").unwrap();
                }
            }
        }

        let mut entries: Vec<_> = self.tree(revision)?.into_iter().collect();
        entries.sort();

        let mut snapshot = Vec::new();
        for (path, content) in entries {
            snapshot.extend_from_slice(path.as_bytes());
            snapshot.push(0);
            snapshot.extend_from_slice(&content);
        }
        Ok(snapshot)
    }
}

/// Job service that records every call
#[derive(Default)]
pub struct RecordingJobService {
    jobs: Mutex<HashMap<String, JobDefinition>>,
    runs: Mutex<Vec<JobRunRequest>>,
    pub create_calls: AtomicUsize,
    /// Delay before a run is acknowledged
    pub start_delay: Option<Duration>,
    /// Reject every run with this message
    pub reject: Option<String>,
}

impl RecordingJobService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            start_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn rejecting(message: &str) -> Self {
        Self {
            reject: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_job(self, definition: JobDefinition) -> Self {
        self.jobs
            .lock()
            .unwrap()
            .insert(definition.name.clone(), definition);
        self
    }

    pub fn runs(&self) -> Vec<JobRunRequest> {
        self.runs.lock().unwrap().clone()
    }

    pub fn job(&self, name: &str) -> Option<JobDefinition> {
        self.jobs.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl JobService for RecordingJobService {
    async fn get_job(&self, name: &str) -> Result<Option<JobDefinition>, JobServiceError> {
        Ok(self.jobs.lock().unwrap().get(name).cloned())
    }

    async fn create_job(&self, definition: JobDefinition) -> Result<(), JobServiceError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&definition.name) {
            return Err(JobServiceError::AlreadyExists(definition.name));
        }
        jobs.insert(definition.name.clone(), definition);
        Ok(())
    }

    async fn start_job_run(&self, request: JobRunRequest) -> Result<String, JobServiceError> {
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.reject {
            return Err(JobServiceError::Rejected(message.clone()));
        }

        let mut runs = self.runs.lock().unwrap();
        runs.push(request);
        Ok(format!("jr_{}", runs.len()))
    }
}

/// Reporter that counts what it is told
#[derive(Default)]
pub struct CountingReporter {
    pub successes: Mutex<Vec<String>>,
    pub failures: Mutex<Vec<FailureDetails>>,
}

impl CountingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> usize {
        self.successes.lock().unwrap().len() + self.failures.lock().unwrap().len()
    }
}

#[async_trait]
impl JobResultReporter for CountingReporter {
    async fn put_job_success_result(
        &self,
        _token: JobToken,
        job_run_id: String,
    ) -> Result<(), ReportError> {
        self.successes.lock().unwrap().push(job_run_id);
        Ok(())
    }

    async fn put_job_failure_result(
        &self,
        _token: JobToken,
        failure: FailureDetails,
    ) -> Result<(), ReportError> {
        self.failures.lock().unwrap().push(failure);
        Ok(())
    }
}
