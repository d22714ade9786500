//! Domain types for the pipeline controller.
//!
//! This module contains the core data structures:
//! - Events: Immutable records of execution state changes
//! - Execution: Pipeline execution state rebuilt from events
//! - Artifact: Blobs handed from one stage to the next
//! - Change: Repository change events and trigger contexts
//! - Failure: Failure kinds surfaced by actions

pub mod artifact;
pub mod change;
pub mod events;
pub mod execution;
pub mod failure;

// Re-export commonly used types
pub use artifact::{Artifact, SOURCE_ARTIFACT};
pub use change::{
    ExecutionContext, ReferenceEvent, ReferenceType, RepositoryChangeEvent, TriggerSource,
};
pub use events::{ActionStatus, Event, EventType};
pub use execution::{ActionResult, Execution, ExecutionState, StageResult};
pub use failure::{FailureDetails, FailureKind};
