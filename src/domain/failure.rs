//! Failure kinds surfaced by pipeline actions.
//!
//! Every failure ends up as a failed action. Nothing is retried.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Category of an action failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Reading from the source repository failed
    SourceFetch,

    /// The batch-job service rejected or failed the submission
    JobSubmission,

    /// The action did not report within its time limit
    Timeout,

    /// A permission check failed (repository read or role pass)
    PermissionDenied,

    /// The action's user parameters could not be parsed
    InvalidParameters,

    /// A declared input artifact does not exist
    MissingArtifact,

    /// Controller-side failure (unknown function, lost report, panic)
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SourceFetch => "source_fetch",
            Self::JobSubmission => "job_submission",
            Self::Timeout => "timeout",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidParameters => "invalid_parameters",
            Self::MissingArtifact => "missing_artifact",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Payload of a failure report (`PutJobFailureResult`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetails {
    pub kind: FailureKind,

    /// Short, stable reason, e.g. "source fetch error"
    pub reason: String,

    /// Free-form detail for operators
    pub message: String,
}

impl FailureDetails {
    pub fn new(kind: FailureKind, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn timeout(limit_seconds: u64) -> Self {
        Self::new(
            FailureKind::Timeout,
            "timeout",
            format!("action did not report within {limit_seconds}s"),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, "internal error", message)
    }
}

impl fmt::Display for FailureDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}
