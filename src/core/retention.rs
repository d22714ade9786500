//! Retention of finished executions.
//!
//! An execution owns its event log and artifacts. Once it has been terminal
//! for longer than the retention window, its directory is removed. An
//! execution still in progress is only collected once its log has been
//! silent for longer than the window; such a run was abandoned by a process
//! that exited mid-way. Unreadable logs are kept and reported.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::event_store::EventStore;

/// How long finished executions are kept
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub window: Duration,
}

impl RetentionPolicy {
    pub fn days(days: u32) -> Self {
        Self {
            window: Duration::days(i64::from(days)),
        }
    }

    fn expired(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        at + self.window < now
    }
}

/// Result of a collection pass
#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    /// Executions removed (or that would be removed on a dry run)
    pub removed: Vec<Uuid>,

    /// Executions kept
    pub kept: usize,
}

/// Remove executions whose retention window has expired
pub async fn collect_garbage(
    executions_dir: &Path,
    policy: RetentionPolicy,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<CollectionReport> {
    let mut report = CollectionReport::default();

    for id in EventStore::list_executions(executions_dir).await? {
        let dir = executions_dir.join(id.to_string());

        let finished_at = match EventStore::load(executions_dir, id).await {
            Ok(Some(execution)) if execution.is_in_progress() => Some(execution.last_event_at),
            Ok(Some(execution)) => execution.completed_at,
            // No events at all: the execution never got going
            Ok(None) => Some(modified_at(&dir).await?),
            Err(e) => {
                warn!(execution_id = %id, "Keeping unreadable execution: {:#}", e);
                None
            }
        };

        match finished_at {
            Some(at) if policy.expired(at, now) => {
                if !dry_run {
                    fs::remove_dir_all(&dir)
                        .await
                        .with_context(|| format!("Failed to remove {}", dir.display()))?;
                }
                debug!(execution_id = %id, finished_at = %at, dry_run, "Execution expired");
                report.removed.push(id);
            }
            _ => report.kept += 1,
        }
    }

    info!(
        removed = report.removed.len(),
        kept = report.kept,
        dry_run,
        "Retention pass finished"
    );

    Ok(report)
}

async fn modified_at(dir: &Path) -> Result<DateTime<Utc>> {
    let metadata = fs::metadata(dir)
        .await
        .with_context(|| format!("Failed to stat {}", dir.display()))?;
    let modified = metadata
        .modified()
        .with_context(|| format!("No modification time for {}", dir.display()))?;
    Ok(DateTime::<Utc>::from(modified))
}
