//! etl-deploy - Source-triggered ETL deployment pipeline
//!
//! A self-hosted controller that deploys a batch ETL job whenever a commit
//! lands on the tracked branch of a repository.
//!
//! # Architecture
//!
//! A change event that passes the event rule starts a two-stage execution:
//! - `Source` snapshots the repository at the commit into the `SourceCode`
//!   artifact
//! - `Deploy` invokes the launcher, which reads `etl.py` at that commit and
//!   starts a run of the named job, then reports exactly one result
//!
//! Every transition is recorded as an immutable event; execution state is
//! derived by replaying the log.
//!
//! # Modules
//!
//! - `adapters`: External systems (git repository, job service, result reporting)
//! - `core`: Controller, launcher, event rule, stores, retention
//! - `domain`: Data structures (Event, Execution, Artifact, change events)
//! - `ingest`: Change events from files and from a repository watcher
//! - `config`: Configuration file and environment resolution
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Deploy the current head of the tracked branch
//! etl-deploy run
//!
//! # Feed a change event through the rule
//! etl-deploy event event.json
//!
//! # Deploy on every push
//! etl-deploy watch
//!
//! # Check execution status
//! etl-deploy status <execution-id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use crate::core::{EventRule, LauncherFunction, PipelineController, PipelineDefinition};
pub use domain::{Event, EventType, Execution, ExecutionContext, ExecutionState};
