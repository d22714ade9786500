//! Git-backed source repository.
//!
//! Shells out to the `git` CLI against a local clone (bare or not).

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;

use super::{SourceError, SourceRepository};

/// Source repository backed by a local git repository
pub struct GitRepository {
    /// Repository name (used in change events)
    name: String,

    /// Path to the working tree or bare repository
    path: PathBuf,

    /// Path to the git binary (default: "git")
    binary_path: String,
}

impl GitRepository {
    /// Open a repository at a path using `git` from PATH
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            binary_path: "git".to_string(),
        }
    }

    /// Use a custom git binary
    pub fn with_binary_path(mut self, binary_path: impl Into<String>) -> Self {
        self.binary_path = binary_path.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute path of the git directory (`.git` or the bare repo itself)
    pub async fn git_dir(&self) -> Result<PathBuf, SourceError> {
        let output = self.git(&["rev-parse", "--absolute-git-dir"]).await?;
        if !output.status.success() {
            return Err(classify_failure(&output, || {
                SourceError::Unavailable(self.path.display().to_string())
            }));
        }

        let dir = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(PathBuf::from(dir))
    }

    async fn git(&self, args: &[&str]) -> Result<Output, SourceError> {
        Command::new(&self.binary_path)
            .arg("-C")
            .arg(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => {
                    SourceError::PermissionDenied(e.to_string())
                }
                _ => SourceError::Unavailable(format!(
                    "failed to run {}: {}",
                    self.binary_path, e
                )),
            })
    }
}

/// Reject revisions git would read as an option
fn check_revision(revision: &str) -> Result<(), SourceError> {
    if revision.is_empty() || revision.starts_with('-') {
        return Err(SourceError::RevisionNotFound(revision.to_string()));
    }
    Ok(())
}

/// Map a failed git invocation onto a source error
fn classify_failure(output: &Output, not_found: impl FnOnce() -> SourceError) -> SourceError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lowered = stderr.to_lowercase();

    if lowered.contains("permission denied") {
        SourceError::PermissionDenied(stderr.trim().to_string())
    } else if lowered.contains("does not exist")
        || lowered.contains("exists on disk, but not in")
        || lowered.contains("invalid object name")
        || lowered.contains("not a valid object name")
        || lowered.contains("bad revision")
        || lowered.contains("unknown revision")
    {
        not_found()
    } else if lowered.contains("not a git repository") {
        SourceError::Unavailable(stderr.trim().to_string())
    } else {
        let exit_code = output.status.code().unwrap_or(-1);
        SourceError::Unavailable(format!("git exited with {}: {}", exit_code, stderr.trim()))
    }
}

#[async_trait]
impl SourceRepository for GitRepository {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve_branch(&self, branch: &str) -> Result<String, SourceError> {
        if branch.is_empty() || branch.starts_with('-') {
            return Err(SourceError::BranchNotFound(branch.to_string()));
        }

        let reference = format!("refs/heads/{}^{{commit}}", branch);
        let output = self
            .git(&["rev-parse", "--verify", "--quiet", &reference])
            .await?;

        if !output.status.success() {
            // --quiet exits 1 without output when the ref is missing
            if output.stderr.is_empty() {
                return Err(SourceError::BranchNotFound(branch.to_string()));
            }
            return Err(classify_failure(&output, || {
                SourceError::BranchNotFound(branch.to_string())
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn get_file(&self, revision: &str, path: &str) -> Result<Vec<u8>, SourceError> {
        check_revision(revision)?;

        let object = format!("{}:{}", revision, path.trim_start_matches('/'));
        let output = self.git(&["show", &object]).await?;

        if !output.status.success() {
            return Err(classify_failure(&output, || SourceError::FileNotFound {
                revision: revision.to_string(),
                path: path.to_string(),
            }));
        }

        Ok(output.stdout)
    }

    async fn archive(&self, revision: &str) -> Result<Vec<u8>, SourceError> {
        check_revision(revision)?;

        let output = self.git(&["archive", "--format=tar", revision]).await?;

        if !output.status.success() {
            return Err(classify_failure(&output, || {
                SourceError::RevisionNotFound(revision.to_string())
            }));
        }

        Ok(output.stdout)
    }
}
