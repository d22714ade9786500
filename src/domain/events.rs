//! Event types for the event-sourced pipeline controller.
//!
//! Every state change of a pipeline execution is recorded as an immutable
//! event in an append-only log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::failure::FailureDetails;

/// A single event in an execution's append-only log.
///
/// Events are the source of truth for execution state. The current state of
/// any execution can be reconstructed by replaying its events in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The execution this event belongs to
    pub execution_id: Uuid,

    /// Type of event
    pub event_type: EventType,

    /// Stage name (for stage and action events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    /// Action name (for action events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Human-readable summary
    pub summary: String,

    /// Status carried by this event
    pub status: ActionStatus,

    /// Pipeline name (set on `ExecutionStarted`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,

    /// How the execution was triggered (set on `ExecutionStarted`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,

    /// Source revision (commit id) known at the time of the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,

    /// Artifacts written by a successful action
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,

    /// Time taken in milliseconds (for finished actions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Failure details if something failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetails>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        execution_id: Uuid,
        event_type: EventType,
        summary: impl Into<String>,
        status: ActionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            execution_id,
            event_type,
            stage: None,
            action: None,
            summary: summary.into(),
            status,
            pipeline: None,
            trigger: None,
            revision: None,
            artifacts: Vec::new(),
            duration_ms: None,
            failure: None,
        }
    }

    /// Attach the stage this event belongs to
    pub fn in_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Attach the action this event belongs to
    pub fn for_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>, trigger: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self.trigger = Some(trigger.into());
        self
    }

    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<String>) -> Self {
        self.artifacts = artifacts;
        self
    }

    /// Create an event with duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Create an event with failure information
    pub fn with_failure(mut self, failure: FailureDetails) -> Self {
        self.failure = Some(failure);
        self
    }
}

/// Types of events that can occur during a pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new execution was created by a trigger
    ExecutionStarted,

    /// Every stage succeeded
    ExecutionSucceeded,

    /// A stage failed; no later stage will start
    ExecutionFailed,

    /// A stage has started
    StageStarted,

    /// All actions of a stage succeeded
    StageSucceeded,

    /// At least one action of a stage failed
    StageFailed,

    /// An action has started
    ActionStarted,

    /// An action reported success
    ActionSucceeded,

    /// An action reported failure (never retried)
    ActionFailed,
}

/// Status of an action, stage or execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Not yet started
    #[default]
    Pending,

    /// Currently executing
    InProgress,

    /// Finished successfully
    Succeeded,

    /// Finished with a failure
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::failure::FailureKind;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            Uuid::new_v4(),
            EventType::ActionStarted,
            "Starting Source",
            ActionStatus::InProgress,
        )
        .in_stage("Source")
        .for_action("Source");

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::ActionStarted);
        assert_eq!(parsed.status, ActionStatus::InProgress);
        assert_eq!(parsed.stage.as_deref(), Some("Source"));
        assert!(!json.contains("failure"));
    }

    #[test]
    fn test_event_with_failure() {
        let event = Event::new(
            Uuid::new_v4(),
            EventType::ActionFailed,
            "Deploy failed",
            ActionStatus::Failed,
        )
        .with_duration(1500)
        .with_failure(FailureDetails::new(
            FailureKind::SourceFetch,
            "source fetch error",
            "etl.py not found",
        ));

        assert_eq!(event.duration_ms, Some(1500));
        assert_eq!(event.failure.unwrap().reason, "source fetch error");
    }
}
