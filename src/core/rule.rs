//! Event rule: which repository changes start an execution.
//!
//! A change event matches when it is a repository state change for the
//! tracked repository, the reference is a branch, the branch is the tracked
//! one, and the reference was created or updated. Deletions never match.

use std::future::Future;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::domain::{
    ExecutionContext, ReferenceEvent, ReferenceType, RepositoryChangeEvent,
};
use crate::domain::change::{CHANGE_EVENT_DETAIL_TYPE, CHANGE_EVENT_SOURCE};

use super::controller::{ExecutionHandle, PipelineController};

/// Filter from repository change events to pipeline executions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRule {
    /// ARN of the tracked repository
    pub repository_arn: String,

    /// Tracked branch
    pub branch: String,
}

impl EventRule {
    pub fn new(repository_arn: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repository_arn: repository_arn.into(),
            branch: branch.into(),
        }
    }

    /// Check an event against the rule's pattern
    pub fn matches(&self, event: &RepositoryChangeEvent) -> bool {
        event.source == CHANGE_EVENT_SOURCE
            && event.detail_type == CHANGE_EVENT_DETAIL_TYPE
            && event.resources.iter().any(|r| *r == self.repository_arn)
            && matches!(
                event.detail.event,
                ReferenceEvent::ReferenceCreated | ReferenceEvent::ReferenceUpdated
            )
            && event.detail.reference_type == ReferenceType::Branch
            && event.detail.reference_name == self.branch
    }

    /// Execution context for a matching event
    pub fn context_for(&self, event: &RepositoryChangeEvent) -> Option<ExecutionContext> {
        self.matches(event).then(|| ExecutionContext::from_change(event))
    }

    /// Start an execution if the event matches; otherwise do nothing
    pub async fn dispatch(
        &self,
        controller: &PipelineController,
        event: &RepositoryChangeEvent,
    ) -> Result<Option<ExecutionHandle>> {
        let Some(context) = self.context_for(event) else {
            debug!(
                event = %event.detail.event,
                reference = %event.detail.reference_name,
                "Change event does not match rule"
            );
            return Ok(None);
        };

        info!(
            event = %event.detail.event,
            branch = %event.detail.reference_name,
            commit = ?event.detail.commit_id,
            "Change event matched, triggering pipeline"
        );

        controller.trigger(context).await.map(Some)
    }

    /// Dispatch events until the channel closes or `shutdown` resolves, then
    /// wait for every execution already started. Returns how many finished.
    pub async fn serve(
        &self,
        controller: &PipelineController,
        mut events: mpsc::Receiver<RepositoryChangeEvent>,
        shutdown: impl Future<Output = ()>,
    ) -> usize {
        tokio::pin!(shutdown);
        let mut running = JoinSet::new();
        let mut finished = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(_) = running.join_next() => finished += 1,
                event = events.recv() => {
                    let Some(event) = event else { break };

                    match self.dispatch(controller, &event).await {
                        Ok(Some(execution)) => {
                            running.spawn(async move {
                                match execution.wait().await {
                                    Ok(done) => info!(
                                        execution_id = %done.id,
                                        state = ?done.state,
                                        "Execution finished"
                                    ),
                                    Err(e) => error!("Execution failed to complete: {:#}", e),
                                }
                            });
                        }
                        Ok(None) => {}
                        Err(e) => error!("Failed to trigger pipeline: {:#}", e),
                    }
                }
            }
        }

        if !running.is_empty() {
            info!(running = running.len(), "Waiting for running executions");
        }
        while running.join_next().await.is_some() {
            finished += 1;
        }

        finished
    }
}
