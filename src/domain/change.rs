//! Repository change events and execution contexts.
//!
//! Change events use the repository state-change envelope published on the
//! event bus:
//!
//! ```json
//! {
//!   "source": "aws.codecommit",
//!   "detail-type": "CodeCommit Repository State Change",
//!   "resources": ["arn:aws:codecommit:eu-west-1:123456789012:etl"],
//!   "detail": {
//!     "event": "referenceUpdated",
//!     "referenceType": "branch",
//!     "referenceName": "master",
//!     "commitId": "2fa7a1c0..."
//!   }
//! }
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event source of repository state changes
pub const CHANGE_EVENT_SOURCE: &str = "aws.codecommit";

/// Detail type of repository state changes
pub const CHANGE_EVENT_DETAIL_TYPE: &str = "CodeCommit Repository State Change";

/// A repository state-change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryChangeEvent {
    pub source: String,

    #[serde(rename = "detail-type")]
    pub detail_type: String,

    /// ARNs of the repositories this event concerns
    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    pub detail: ChangeDetail,
}

impl RepositoryChangeEvent {
    /// Build a branch reference event for a repository
    pub fn branch_change(
        repository_arn: impl Into<String>,
        repository_name: impl Into<String>,
        event: ReferenceEvent,
        branch: impl Into<String>,
        commit_id: Option<String>,
        old_commit_id: Option<String>,
    ) -> Self {
        Self {
            source: CHANGE_EVENT_SOURCE.to_string(),
            detail_type: CHANGE_EVENT_DETAIL_TYPE.to_string(),
            resources: vec![repository_arn.into()],
            time: Some(Utc::now()),
            detail: ChangeDetail {
                event,
                reference_type: ReferenceType::Branch,
                reference_name: branch.into(),
                commit_id,
                old_commit_id,
                repository_name: Some(repository_name.into()),
            },
        }
    }

    /// Parse an event from JSON
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

/// The `detail` block of a change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDetail {
    pub event: ReferenceEvent,

    pub reference_type: ReferenceType,

    pub reference_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_commit_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_name: Option<String>,
}

/// What happened to the reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceEvent {
    ReferenceCreated,
    ReferenceUpdated,
    ReferenceDeleted,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ReferenceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReferenceCreated => "referenceCreated",
            Self::ReferenceUpdated => "referenceUpdated",
            Self::ReferenceDeleted => "referenceDeleted",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Kind of reference that changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceType {
    Branch,
    Tag,
    #[serde(other)]
    Other,
}

/// What started an execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSource {
    /// A matching repository change event
    ChangeEvent {
        event: ReferenceEvent,
        reference: String,
    },

    /// Started by hand (CLI `run`)
    Manual,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChangeEvent { event, reference } => write!(f, "{event} {reference}"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Input to `PipelineController::trigger`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub trigger: TriggerSource,

    /// Commit to build; `None` resolves the tracked branch head
    pub revision: Option<String>,
}

impl ExecutionContext {
    pub fn manual(revision: Option<String>) -> Self {
        Self {
            trigger: TriggerSource::Manual,
            revision,
        }
    }

    pub fn from_change(event: &RepositoryChangeEvent) -> Self {
        Self {
            trigger: TriggerSource::ChangeEvent {
                event: event.detail.event,
                reference: event.detail.reference_name.clone(),
            },
            revision: event.detail.commit_id.clone(),
        }
    }
}
