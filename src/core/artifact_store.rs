//! Artifact store keyed by (execution id, artifact name).
//!
//! Layout: `<executions>/<execution_id>/artifacts/<name>.bin` holds the blob
//! and `<name>.json` its metadata. Metadata is written last, so an artifact
//! exists once its metadata file does. Writing the same key again overwrites.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs;
use uuid::Uuid;

use crate::domain::Artifact;

/// File-based artifact store shared by all executions
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    executions_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(executions_dir: impl Into<PathBuf>) -> Self {
        Self {
            executions_dir: executions_dir.into(),
        }
    }

    /// Artifacts directory of an execution
    pub fn artifacts_dir(&self, execution_id: Uuid) -> PathBuf {
        self.executions_dir
            .join(execution_id.to_string())
            .join("artifacts")
    }

    fn paths(&self, execution_id: Uuid, name: &str) -> Result<(PathBuf, PathBuf)> {
        validate_name(name)?;
        let dir = self.artifacts_dir(execution_id);
        Ok((
            dir.join(format!("{}.bin", name)),
            dir.join(format!("{}.json", name)),
        ))
    }

    /// Store an artifact, replacing any previous version under the same key
    pub async fn put(
        &self,
        execution_id: Uuid,
        name: &str,
        produced_by: &str,
        revision: Option<String>,
        content: &[u8],
    ) -> Result<Artifact> {
        let (blob_path, meta_path) = self.paths(execution_id, name)?;
        let dir = self.artifacts_dir(execution_id);

        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create artifacts directory: {}", dir.display()))?;

        let artifact = Artifact::describe(name, produced_by, revision, content);

        fs::write(&blob_path, content)
            .await
            .with_context(|| format!("Failed to write artifact: {}", blob_path.display()))?;

        let json = serde_json::to_string_pretty(&artifact).context("Failed to serialize artifact")?;
        fs::write(&meta_path, json)
            .await
            .with_context(|| format!("Failed to write artifact metadata: {}", meta_path.display()))?;

        tracing::debug!(
            %execution_id,
            artifact = name,
            version = artifact.version(),
            size_bytes = artifact.size_bytes,
            "Artifact stored"
        );

        Ok(artifact)
    }

    /// Load artifact metadata
    pub async fn describe(&self, execution_id: Uuid, name: &str) -> Result<Option<Artifact>> {
        let (_, meta_path) = self.paths(execution_id, name)?;

        if !meta_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&meta_path)
            .await
            .with_context(|| format!("Failed to read artifact metadata: {}", meta_path.display()))?;

        let artifact = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact metadata: {}", meta_path.display()))?;

        Ok(Some(artifact))
    }

    /// Load artifact metadata and content
    pub async fn get(&self, execution_id: Uuid, name: &str) -> Result<Option<(Artifact, Vec<u8>)>> {
        let Some(artifact) = self.describe(execution_id, name).await? else {
            return Ok(None);
        };

        let (blob_path, _) = self.paths(execution_id, name)?;
        let content = fs::read(&blob_path)
            .await
            .with_context(|| format!("Failed to read artifact: {}", blob_path.display()))?;

        Ok(Some((artifact, content)))
    }

    /// Whether an artifact exists for this execution
    pub async fn contains(&self, execution_id: Uuid, name: &str) -> Result<bool> {
        let (_, meta_path) = self.paths(execution_id, name)?;
        fs::try_exists(&meta_path)
            .await
            .with_context(|| format!("Failed to check artifact: {}", meta_path.display()))
    }

    /// List all artifacts of an execution
    pub async fn list(&self, execution_id: Uuid) -> Result<Vec<Artifact>> {
        let dir = self.artifacts_dir(execution_id);
        let mut artifacts = Vec::new();

        if !dir.exists() {
            return Ok(artifacts);
        }

        let mut entries = fs::read_dir(&dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                if let Some(artifact) = self.describe(execution_id, name).await? {
                    artifacts.push(artifact);
                }
            }
        }

        artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(artifacts)
    }
}

/// Artifact names become file names
pub(crate) fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));

    if !valid {
        anyhow::bail!("Invalid artifact name '{}'", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());
        let id = Uuid::new_v4();

        assert!(!store.contains(id, "SourceCode").await.unwrap());

        let first = store
            .put(id, "SourceCode", "Source", Some("c1".to_string()), b"v1")
            .await
            .unwrap();
        assert!(store.contains(id, "SourceCode").await.unwrap());

        let second = store
            .put(id, "SourceCode", "Source", Some("c2".to_string()), b"v2")
            .await
            .unwrap();
        assert_ne!(first.digest, second.digest);

        let (artifact, content) = store.get(id, "SourceCode").await.unwrap().unwrap();
        assert_eq!(content, b"v2");
        assert_eq!(artifact.revision.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_executions_do_not_interfere() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        store.put(a, "SourceCode", "Source", None, b"a").await.unwrap();

        assert!(store.contains(a, "SourceCode").await.unwrap());
        assert!(!store.contains(b, "SourceCode").await.unwrap());
        assert_eq!(store.list(a).await.unwrap().len(), 1);
        assert!(store.list(b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());

        let result = store.put(Uuid::new_v4(), "../x", "Source", None, b"").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_contains_reports_io_errors() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::new(temp.path());
        let id = Uuid::new_v4();

        // A file where the artifacts directory should be
        let execution_dir = temp.path().join(id.to_string());
        std::fs::create_dir_all(&execution_dir).unwrap();
        std::fs::write(execution_dir.join("artifacts"), b"").unwrap();

        let err = store.contains(id, "SourceCode").await.unwrap_err();
        assert!(err.to_string().contains("Failed to check artifact"));
    }
}
