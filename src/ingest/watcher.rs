//! Branch watcher for a local repository.
//!
//! Watches the repository's ref files and emits a change event whenever the
//! tracked branch head moves. Git writes refs through lock files and renames,
//! so raw notifications are debounced before the branch is re-resolved.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::adapters::{SourceError, SourceRepository};
use crate::domain::{ReferenceEvent, RepositoryChangeEvent};

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Git directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),
}

/// Configuration for the watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Git directory to watch (`.git` or a bare repository)
    pub git_dir: PathBuf,

    /// ARN placed in emitted events
    pub repository_arn: String,

    pub repository_name: String,

    /// Tracked branch
    pub branch: String,

    /// Quiet period before a burst of notifications is handled
    pub debounce: Duration,
}

impl WatcherConfig {
    pub fn new(
        git_dir: impl Into<PathBuf>,
        repository_arn: impl Into<String>,
        repository_name: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            git_dir: git_dir.into(),
            repository_arn: repository_arn.into(),
            repository_name: repository_name.into(),
            branch: branch.into(),
            debounce: Duration::from_millis(500),
        }
    }

    /// Check if the git directory exists
    pub fn validate(&self) -> Result<(), WatcherError> {
        if !self.git_dir.is_dir() {
            return Err(WatcherError::DirectoryNotFound(self.git_dir.clone()));
        }
        Ok(())
    }

    fn change_event(
        &self,
        event: ReferenceEvent,
        previous: Option<&str>,
        current: Option<&str>,
    ) -> RepositoryChangeEvent {
        RepositoryChangeEvent::branch_change(
            self.repository_arn.clone(),
            self.repository_name.clone(),
            event,
            self.branch.clone(),
            current.map(str::to_string),
            previous.map(str::to_string),
        )
    }
}

/// Watches one branch of a repository
pub struct BranchWatcher {
    repository: Arc<dyn SourceRepository>,
    config: WatcherConfig,
}

impl BranchWatcher {
    pub fn new(repository: Arc<dyn SourceRepository>, config: WatcherConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Start watching. Events arrive on the returned channel until the
    /// handle is stopped.
    pub async fn watch(&self) -> Result<(mpsc::Receiver<RepositoryChangeEvent>, WatchHandle)> {
        self.config.validate()?;

        // The current head is the baseline; only later moves are reported
        let initial = current_head(self.repository.as_ref(), &self.config.branch).await?;
        tracing::info!(
            branch = %self.config.branch,
            head = ?initial,
            "Watching {}",
            self.config.git_dir.display()
        );

        let (event_tx, event_rx) = mpsc::channel::<RepositoryChangeEvent>(100);
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);

        let repository = self.repository.clone();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            if let Err(e) = run_watcher(repository, config, initial, event_tx, stop_rx).await {
                tracing::error!("Watcher error: {}", e);
            }
        });

        Ok((event_rx, WatchHandle { stop_tx, task }))
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watcher
    pub async fn stop(self) -> Result<()> {
        let _ = self.stop_tx.send(()).await;
        self.task.await?;
        Ok(())
    }
}

/// How the branch head changed between two observations
pub fn head_change(previous: Option<&str>, current: Option<&str>) -> Option<ReferenceEvent> {
    match (previous, current) {
        (None, Some(_)) => Some(ReferenceEvent::ReferenceCreated),
        (Some(prev), Some(cur)) if prev != cur => Some(ReferenceEvent::ReferenceUpdated),
        (Some(_), None) => Some(ReferenceEvent::ReferenceDeleted),
        _ => None,
    }
}

/// Only ref updates can move a branch; object writes are noise
fn is_ref_path(path: &Path) -> bool {
    let in_objects = path
        .components()
        .any(|c| c == Component::Normal(OsStr::new("objects")));
    if in_objects {
        return false;
    }

    path.components()
        .any(|c| c == Component::Normal(OsStr::new("refs")))
        || path.file_name() == Some(OsStr::new("packed-refs"))
}

async fn current_head(
    repository: &dyn SourceRepository,
    branch: &str,
) -> Result<Option<String>, SourceError> {
    match repository.resolve_branch(branch).await {
        Ok(head) => Ok(Some(head)),
        Err(SourceError::BranchNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Internal watcher loop
async fn run_watcher(
    repository: Arc<dyn SourceRepository>,
    config: WatcherConfig,
    mut head: Option<String>,
    event_tx: mpsc::Sender<RepositoryChangeEvent>,
    mut stop_rx: mpsc::Receiver<()>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let mut debouncer = new_debouncer(config.debounce, move |result: DebounceEventResult| {
        let _ = tx.send(result);
    })?;

    debouncer
        .watcher()
        .watch(&config.git_dir, RecursiveMode::Recursive)?;

    loop {
        let batch = tokio::select! {
            _ = stop_rx.recv() => {
                tracing::info!("Watcher stopping...");
                break;
            }
            batch = rx.recv() => batch,
        };

        let events = match batch {
            Some(Ok(events)) => events,
            Some(Err(e)) => {
                tracing::warn!("Watcher error: {:?}", e);
                continue;
            }
            None => {
                tracing::error!("Watcher channel disconnected");
                break;
            }
        };

        if !events.iter().any(|event| is_ref_path(&event.path)) {
            continue;
        }

        let current = match current_head(repository.as_ref(), &config.branch).await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(branch = %config.branch, "Failed to resolve branch: {}", e);
                continue;
            }
        };

        if let Some(kind) = head_change(head.as_deref(), current.as_deref()) {
            tracing::info!(
                branch = %config.branch,
                event = %kind,
                from = ?head,
                to = ?current,
                "Branch head moved"
            );
            let event = config.change_event(kind, head.as_deref(), current.as_deref());
            if event_tx.send(event).await.is_err() {
                // Receiver dropped; nobody is listening any more
                break;
            }
            head = current;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_head_change() {
        assert_eq!(head_change(None, None), None);
        assert_eq!(head_change(None, Some("a1")), Some(ReferenceEvent::ReferenceCreated));
        assert_eq!(head_change(Some("a1"), Some("a1")), None);
        assert_eq!(
            head_change(Some("a1"), Some("b2")),
            Some(ReferenceEvent::ReferenceUpdated)
        );
        assert_eq!(head_change(Some("a1"), None), Some(ReferenceEvent::ReferenceDeleted));
    }

    #[test]
    fn test_ref_paths() {
        assert!(is_ref_path(Path::new("/repo/.git/refs/heads/master")));
        assert!(is_ref_path(Path::new("/repo/.git/refs/heads/master.lock")));
        assert!(is_ref_path(Path::new("/srv/etl.git/packed-refs")));
        assert!(!is_ref_path(Path::new("/repo/.git/objects/2f/a7a1c0")));
        assert!(!is_ref_path(Path::new("/repo/.git/index")));
    }

    #[test]
    fn test_change_event_carries_both_heads() {
        let config = WatcherConfig::new(
            "/repo/.git",
            "arn:aws:codecommit:local:000000000000:etl",
            "etl",
            "master",
        );
        let event = config.change_event(ReferenceEvent::ReferenceUpdated, Some("a1"), Some("b2"));

        assert_eq!(event.detail.commit_id.as_deref(), Some("b2"));
        assert_eq!(event.detail.old_commit_id.as_deref(), Some("a1"));
        assert_eq!(event.detail.reference_name, "master");
        assert_eq!(event.resources, vec!["arn:aws:codecommit:local:000000000000:etl"]);
    }

    #[test]
    fn test_validate_missing_dir() {
        let temp = TempDir::new().unwrap();
        let config = WatcherConfig::new(temp.path().join("missing"), "arn", "etl", "master");
        assert!(matches!(
            config.validate(),
            Err(WatcherError::DirectoryNotFound(_))
        ));
    }
}
