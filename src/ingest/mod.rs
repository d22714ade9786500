//! Ingestion of repository change events.
//!
//! Change events reach the event rule from two places:
//!
//! 1. **Files / stdin**: JSON envelopes delivered by an external bus
//! 2. **Watcher**: ref changes observed in a local clone
//!
//! ```text
//! event.json ─┐
//!             ├→ EventRule → PipelineController
//! Watcher ────┘
//! ```

pub mod watcher;

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;

use crate::domain::RepositoryChangeEvent;

pub use watcher::{head_change, BranchWatcher, WatchHandle, WatcherConfig, WatcherError};

/// Read one change event from a file, or from stdin when the path is `-`
pub async fn read_change_event(source: &str) -> Result<RepositoryChangeEvent> {
    let content = if source == "-" {
        let mut buffer = String::new();
        tokio::io::stdin()
            .read_to_string(&mut buffer)
            .await
            .context("Failed to read change event from stdin")?;
        buffer
    } else {
        tokio::fs::read_to_string(Path::new(source))
            .await
            .with_context(|| format!("Failed to read change event file: {}", source))?
    };

    RepositoryChangeEvent::from_json(&content).context("Failed to parse change event")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReferenceEvent;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_change_event_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("event.json");
        tokio::fs::write(
            &path,
            r#"{
                "source": "aws.codecommit",
                "detail-type": "CodeCommit Repository State Change",
                "resources": ["arn:aws:codecommit:eu-west-1:123456789012:etl"],
                "detail": {
                    "event": "referenceCreated",
                    "referenceType": "branch",
                    "referenceName": "master",
                    "commitId": "abc123"
                }
            }"#,
        )
        .await
        .unwrap();

        let event = read_change_event(path.to_str().unwrap()).await.unwrap();
        assert_eq!(event.detail.event, ReferenceEvent::ReferenceCreated);
        assert_eq!(event.detail.commit_id.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_read_change_event_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("event.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        assert!(read_change_event(path.to_str().unwrap()).await.is_err());
    }
}
