//! Process-backed batch-job service.
//!
//! Job definitions live under `<root>/<job>/job.json`. Each run gets its own
//! directory `<root>/<job>/runs/<run_id>/` holding the entry-point script, a
//! `run.json` record and the process logs. Runs are started as detached
//! processes: `start_job_run` returns as soon as the process is spawned.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::process::Command;
use uuid::Uuid;

use super::{JobDefinition, JobRunRequest, JobService, JobServiceError};

/// Record of a started run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRunRecord {
    pub run_id: String,
    pub job_name: String,
    pub revision: String,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
}

/// Job service that runs each job run as a local process
pub struct ProcessJobService {
    /// Directory holding job definitions and runs
    root: PathBuf,

    /// Program that executes the entry-point script (default: "python3")
    interpreter: String,
}

impl ProcessJobService {
    pub fn new(root: impl Into<PathBuf>, interpreter: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            interpreter: interpreter.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, name: &str) -> Result<PathBuf, JobServiceError> {
        validate_job_name(name)?;
        Ok(self.root.join(name))
    }

    /// Load the record of a started run
    pub async fn run_record(
        &self,
        job_name: &str,
        run_id: &str,
    ) -> Result<Option<JobRunRecord>, JobServiceError> {
        let path = self
            .job_dir(job_name)?
            .join("runs")
            .join(run_id)
            .join("run.json");

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let record = serde_json::from_str(&content)
            .map_err(|e| JobServiceError::Rejected(format!("corrupt run record: {e}")))?;
        Ok(Some(record))
    }
}

/// Job names become directory names
fn validate_job_name(name: &str) -> Result<(), JobServiceError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name.len() <= 255
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(JobServiceError::Rejected(format!("invalid job name '{name}'")))
    }
}

/// Script names must be plain file names
fn validate_script_name(name: &str) -> Result<(), JobServiceError> {
    let plain = Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if plain && !name.starts_with('.') {
        Ok(())
    } else {
        Err(JobServiceError::Rejected(format!("invalid script name '{name}'")))
    }
}

fn map_io(err: std::io::Error) -> JobServiceError {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => JobServiceError::PermissionDenied(err.to_string()),
        _ => JobServiceError::Io(err),
    }
}

#[async_trait]
impl JobService for ProcessJobService {
    async fn get_job(&self, name: &str) -> Result<Option<JobDefinition>, JobServiceError> {
        let path = self.job_dir(name)?.join("job.json");

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await.map_err(map_io)?;
        let definition = serde_json::from_str(&content)
            .map_err(|e| JobServiceError::Rejected(format!("corrupt job definition: {e}")))?;
        Ok(Some(definition))
    }

    async fn create_job(&self, definition: JobDefinition) -> Result<(), JobServiceError> {
        validate_script_name(&definition.script_name)?;
        let job_dir = self.job_dir(&definition.name)?;
        let root = self.root.clone();

        // Check-and-create under an exclusive lock so concurrent executions
        // cannot both create the same job.
        tokio::task::spawn_blocking(move || -> Result<(), JobServiceError> {
            std::fs::create_dir_all(&root).map_err(map_io)?;

            let lock_file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(root.join(".lock"))
                .map_err(map_io)?;
            lock_file.lock_exclusive().map_err(map_io)?;

            let job_path = job_dir.join("job.json");
            let result = if job_path.exists() {
                Err(JobServiceError::AlreadyExists(definition.name.clone()))
            } else {
                let json = serde_json::to_string_pretty(&definition)
                    .map_err(|e| JobServiceError::Rejected(e.to_string()))?;
                std::fs::create_dir_all(job_dir.join("runs"))
                    .and_then(|()| std::fs::write(&job_path, json))
                    .map_err(map_io)
            };

            let _ = fs2::FileExt::unlock(&lock_file);
            result
        })
        .await
        .map_err(|e| JobServiceError::Rejected(format!("job creation task failed: {e}")))?
    }

    async fn start_job_run(&self, request: JobRunRequest) -> Result<String, JobServiceError> {
        validate_script_name(&request.script_name)?;
        let definition = self
            .get_job(&request.job_name)
            .await?
            .ok_or_else(|| JobServiceError::NotFound(request.job_name.clone()))?;

        let run_id = format!("jr_{}", Uuid::new_v4().simple());
        let run_dir = self.job_dir(&definition.name)?.join("runs").join(&run_id);
        fs::create_dir_all(&run_dir).await.map_err(map_io)?;

        let script_path = run_dir.join(&request.script_name);
        fs::write(&script_path, &request.script).await.map_err(map_io)?;

        let stdout = fs::File::create(run_dir.join("stdout.log"))
            .await
            .map_err(map_io)?
            .into_std()
            .await;
        let stderr = fs::File::create(run_dir.join("stderr.log"))
            .await
            .map_err(map_io)?
            .into_std()
            .await;

        let child = Command::new(&self.interpreter)
            .arg(&request.script_name)
            .current_dir(&run_dir)
            .env("JOB_NAME", &definition.name)
            .env("JOB_RUN_ID", &run_id)
            .env("JOB_ROLE", &definition.role)
            .env("SOURCE_REVISION", &request.revision)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|e| {
                JobServiceError::Rejected(format!("failed to start {}: {}", self.interpreter, e))
            })?;

        let record = JobRunRecord {
            run_id: run_id.clone(),
            job_name: definition.name.clone(),
            revision: request.revision,
            started_at: Utc::now(),
            pid: child.id(),
        };
        let json = serde_json::to_string_pretty(&record)
            .map_err(|e| JobServiceError::Rejected(e.to_string()))?;
        fs::write(run_dir.join("run.json"), json).await.map_err(map_io)?;

        tracing::info!(
            job = %definition.name,
            %run_id,
            pid = ?record.pid,
            "Job run started"
        );

        // Dropping the handle leaves the process running.
        drop(child);

        Ok(run_id)
    }
}
