//! Artifacts passed between pipeline stages.
//!
//! An artifact is an opaque blob identified by (execution id, name). Its
//! version is the SHA-256 digest of the content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Name of the artifact the standard Source stage produces
pub const SOURCE_ARTIFACT: &str = "SourceCode";

/// Metadata of a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact name, unique within an execution
    pub name: String,

    /// Action that produced this artifact
    pub produced_by: String,

    /// Source revision the content was built from
    pub revision: Option<String>,

    /// Hex SHA-256 of the content
    pub digest: String,

    /// Size in bytes
    pub size_bytes: u64,

    /// When the artifact was written
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Describe a blob about to be stored
    pub fn describe(
        name: impl Into<String>,
        produced_by: impl Into<String>,
        revision: Option<String>,
        content: &[u8],
    ) -> Self {
        Self {
            name: name.into(),
            produced_by: produced_by.into(),
            revision,
            digest: content_digest(content),
            size_bytes: content.len() as u64,
            created_at: Utc::now(),
        }
    }

    /// Short version identifier (first 16 hex chars of the digest)
    pub fn version(&self) -> &str {
        &self.digest[..self.digest.len().min(16)]
    }
}

/// Hex SHA-256 of a blob
pub fn content_digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
