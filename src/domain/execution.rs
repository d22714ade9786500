//! Execution state and reconstruction from events.
//!
//! An Execution represents a single run of the pipeline, started by a trigger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{ActionStatus, Event, EventType};
use super::failure::FailureDetails;

/// A pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier for this execution
    pub id: Uuid,

    /// Name of the pipeline being executed
    pub pipeline_name: String,

    /// How the execution was triggered
    pub trigger: String,

    /// Source revision, once known
    pub revision: Option<String>,

    /// Current state of the execution
    pub state: ExecutionState,

    /// When the execution started
    pub started_at: DateTime<Utc>,

    /// When the execution reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    /// Time of the most recent event
    pub last_event_at: DateTime<Utc>,

    /// Stages in the order they started
    pub stages: Vec<StageResult>,
}

impl Execution {
    /// Reconstruct execution state from a sequence of events
    pub fn from_events(events: &[Event]) -> Option<Self> {
        let first_event = events.first()?;

        let mut execution = Self {
            id: first_event.execution_id,
            pipeline_name: String::new(),
            trigger: String::new(),
            revision: None,
            state: ExecutionState::InProgress,
            started_at: first_event.timestamp,
            completed_at: None,
            last_event_at: first_event.timestamp,
            stages: Vec::new(),
        };

        for event in events {
            execution.apply_event(event);
        }

        Some(execution)
    }

    /// Apply a single event to update execution state
    pub fn apply_event(&mut self, event: &Event) {
        self.last_event_at = self.last_event_at.max(event.timestamp);
        if self.revision.is_none() {
            self.revision.clone_from(&event.revision);
        }

        match event.event_type {
            EventType::ExecutionStarted => {
                self.state = ExecutionState::InProgress;
                self.started_at = event.timestamp;
                if let Some(ref pipeline) = event.pipeline {
                    self.pipeline_name.clone_from(pipeline);
                }
                if let Some(ref trigger) = event.trigger {
                    self.trigger.clone_from(trigger);
                }
            }
            EventType::ExecutionSucceeded => {
                self.state = ExecutionState::Succeeded;
                self.completed_at = Some(event.timestamp);
            }
            EventType::ExecutionFailed => {
                self.state = ExecutionState::Failed {
                    error: event
                        .failure
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| event.summary.clone()),
                };
                self.completed_at = Some(event.timestamp);
            }
            EventType::StageStarted => {
                if let Some(ref stage) = event.stage {
                    self.stages.push(StageResult {
                        name: stage.clone(),
                        status: ActionStatus::InProgress,
                        actions: Vec::new(),
                    });
                }
            }
            EventType::StageSucceeded | EventType::StageFailed => {
                if let Some(stage) = self.stage_mut(event) {
                    stage.status = event.status;
                }
            }
            EventType::ActionStarted => {
                if let (Some(stage), Some(action)) = (self.stage_mut(event), &event.action) {
                    stage.actions.push(ActionResult {
                        name: action.clone(),
                        status: ActionStatus::InProgress,
                        started_at: event.timestamp,
                        duration_ms: None,
                        artifacts: Vec::new(),
                        failure: None,
                    });
                }
            }
            EventType::ActionSucceeded | EventType::ActionFailed => {
                if let Some(action) = self.action_mut(event) {
                    action.status = event.status;
                    action.duration_ms = event.duration_ms;
                    action.artifacts.clone_from(&event.artifacts);
                    action.failure.clone_from(&event.failure);
                }
            }
        }
    }

    fn stage_mut(&mut self, event: &Event) -> Option<&mut StageResult> {
        let name = event.stage.as_deref()?;
        self.stages.iter_mut().rev().find(|s| s.name == name)
    }

    fn action_mut(&mut self, event: &Event) -> Option<&mut ActionResult> {
        let action = event.action.clone()?;
        self.stage_mut(event)?
            .actions
            .iter_mut()
            .rev()
            .find(|a| a.name == action)
    }

    /// Check if the execution is still in progress
    pub fn is_in_progress(&self) -> bool {
        matches!(self.state, ExecutionState::InProgress)
    }

    /// Check if the execution reached a terminal state
    pub fn is_finished(&self) -> bool {
        !self.is_in_progress()
    }

    /// Look up a stage by name
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// State of a pipeline execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ExecutionState {
    /// Stages are still running
    #[default]
    InProgress,

    /// Every stage succeeded
    Succeeded,

    /// A stage failed
    Failed { error: String },
}

/// Outcome of one stage within an execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub status: ActionStatus,
    pub actions: Vec<ActionResult>,
}

impl StageResult {
    pub fn failed_actions(&self) -> impl Iterator<Item = &ActionResult> {
        self.actions
            .iter()
            .filter(|a| a.status == ActionStatus::Failed)
    }
}

/// Outcome of one action within a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub name: String,
    pub status: ActionStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub artifacts: Vec<String>,
    pub failure: Option<FailureDetails>,
}
