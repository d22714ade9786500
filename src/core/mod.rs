//! Core deployment logic.
//!
//! This module contains:
//! - EventStore: Append-only execution logs
//! - ArtifactStore: Versioned artifacts per execution
//! - Pipeline: Pipeline definitions and loading
//! - Controller: Stage state machine driving executions
//! - Launcher: Handler that turns a Deploy action into a job run
//! - Rule: Change-event filter that triggers executions
//! - Retention: Removal of expired executions

pub mod artifact_store;
pub mod controller;
pub mod event_store;
pub mod launcher;
pub mod pipeline;
pub mod retention;
pub mod rule;

// Re-export commonly used types
pub use artifact_store::ArtifactStore;
pub use controller::{ControllerBuilder, ExecutionHandle, PipelineController, DEFAULT_ACTION_TIMEOUT};
pub use event_store::EventStore;
pub use launcher::{
    Invocation, LaunchError, LaunchOutcome, LaunchParameters, LauncherFunction, LauncherSettings,
};
pub use pipeline::{ActionDeclaration, ActionKind, PipelineDefinition, StageDeclaration};
pub use retention::{collect_garbage, CollectionReport, RetentionPolicy};
pub use rule::EventRule;
