//! Append-only event store with file-based persistence.
//!
//! Each execution owns a directory `<executions>/<execution_id>/` with an
//! `events.jsonl` log (newline-delimited JSON) next to its artifacts.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Event, Execution};

/// File-based event store for one execution using JSONL format
pub struct EventStore {
    /// Directory containing the execution
    execution_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Serializes appends from concurrently running actions
    append_lock: Mutex<()>,
}

impl EventStore {
    /// Create or open the event store of an execution
    pub async fn open(executions_dir: &Path, execution_id: Uuid) -> Result<Self> {
        let execution_dir = executions_dir.join(execution_id.to_string());

        fs::create_dir_all(&execution_dir).await.with_context(|| {
            format!(
                "Failed to create execution directory: {}",
                execution_dir.display()
            )
        })?;

        let events_path = execution_dir.join("events.jsonl");

        Ok(Self {
            execution_dir,
            events_path,
            append_lock: Mutex::new(()),
        })
    }

    /// Get the path to the events file
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Get the execution directory
    pub fn execution_dir(&self) -> &Path {
        &self.execution_dir
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;

        let _guard = self.append_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!("Failed to open events file: {}", self.events_path.display())
            })?;

        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        replay_file(&self.events_path).await
    }

    /// Rebuild the execution from its log
    pub async fn execution(&self) -> Result<Option<Execution>> {
        Ok(Execution::from_events(&self.replay().await?))
    }

    /// List all execution IDs in a directory
    pub async fn list_executions(executions_dir: &Path) -> Result<Vec<Uuid>> {
        if !executions_dir.exists() {
            return Ok(Vec::new());
        }

        let mut executions = Vec::new();
        let mut entries = fs::read_dir(executions_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    if let Ok(uuid) = Uuid::parse_str(name) {
                        executions.push(uuid);
                    }
                }
            }
        }

        Ok(executions)
    }

    /// Load an execution without creating its directory
    pub async fn load(executions_dir: &Path, execution_id: Uuid) -> Result<Option<Execution>> {
        let events_path = executions_dir
            .join(execution_id.to_string())
            .join("events.jsonl");
        let events = replay_file(&events_path).await?;
        Ok(Execution::from_events(&events))
    }
}

async fn replay_file(events_path: &Path) -> Result<Vec<Event>> {
    if !events_path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(events_path)
        .await
        .with_context(|| format!("Failed to open events file: {}", events_path.display()))?;

    let reader = BufReader::new(file);
    let mut lines = reader.lines();
    let mut events = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse event: {}", line))?;
        events.push(event);
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionStatus, EventType};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_event_append_and_replay() {
        let temp = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let store = EventStore::open(temp.path(), id).await.unwrap();

        let started = Event::new(
            id,
            EventType::ExecutionStarted,
            "Execution started",
            ActionStatus::InProgress,
        );
        let stage = Event::new(id, EventType::StageStarted, "Source", ActionStatus::InProgress)
            .in_stage("Source");

        store.append(&started).await.unwrap();
        store.append(&stage).await.unwrap();

        let events = store.replay().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::ExecutionStarted);
        assert_eq!(events[1].event_type, EventType::StageStarted);
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_every_line() {
        let temp = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let store = Arc::new(EventStore::open(temp.path(), id).await.unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let store = store.clone();
            tasks.spawn(async move {
                let event = Event::new(
                    id,
                    EventType::ActionStarted,
                    format!("action {i}"),
                    ActionStatus::InProgress,
                )
                .in_stage("Deploy")
                .for_action(format!("a{i}"));
                store.append(&event).await.unwrap();
            });
        }
        while tasks.join_next().await.is_some() {}

        assert_eq!(store.replay().await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_list_and_load() {
        let temp = TempDir::new().unwrap();
        let id = Uuid::new_v4();
        let store = EventStore::open(temp.path(), id).await.unwrap();
        store
            .append(&Event::new(
                id,
                EventType::ExecutionStarted,
                "started",
                ActionStatus::InProgress,
            ))
            .await
            .unwrap();

        // Stray directories are ignored
        std::fs::create_dir_all(temp.path().join("not-a-uuid")).unwrap();

        let ids = EventStore::list_executions(temp.path()).await.unwrap();
        assert_eq!(ids, vec![id]);

        let execution = EventStore::load(temp.path(), id).await.unwrap().unwrap();
        assert!(execution.is_in_progress());

        assert!(EventStore::load(temp.path(), Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }
}
