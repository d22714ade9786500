//! Event Store Integration Tests
//!
//! Tests for event log format, append operations, and replay order.

use etl_deploy::core::EventStore;
use etl_deploy::domain::{
    ActionStatus, Event, EventType, ExecutionState, FailureDetails, FailureKind,
};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
async fn test_event_append_format() {
    let temp = TempDir::new().unwrap();
    let execution_id = Uuid::new_v4();
    let store = EventStore::open(temp.path(), execution_id).await.unwrap();

    let event = Event::new(
        execution_id,
        EventType::ActionStarted,
        "Action 'Deploy' started",
        ActionStatus::InProgress,
    )
    .in_stage("Deploy")
    .for_action("Deploy");
    store.append(&event).await.unwrap();

    // One JSON object per line
    let content = tokio::fs::read_to_string(store.events_path()).await.unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1);

    let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(value["execution_id"], execution_id.to_string());
    assert_eq!(value["stage"], "Deploy");
    assert_eq!(value["action"], "Deploy");

    // Timestamp is ISO 8601
    let parsed: Event = serde_json::from_str(lines[0]).unwrap();
    assert!(parsed.timestamp.to_rfc3339().contains('T'));
    assert_eq!(parsed.event_type, EventType::ActionStarted);
}

#[tokio::test]
async fn test_replay_order_and_state() {
    let temp = TempDir::new().unwrap();
    let execution_id = Uuid::new_v4();
    let store = EventStore::open(temp.path(), execution_id).await.unwrap();

    let events = vec![
        Event::new(execution_id, EventType::ExecutionStarted, "started", ActionStatus::InProgress)
            .with_pipeline("etl-deploy", "manual"),
        Event::new(execution_id, EventType::StageStarted, "", ActionStatus::InProgress)
            .in_stage("Source"),
        Event::new(execution_id, EventType::ActionStarted, "", ActionStatus::InProgress)
            .in_stage("Source")
            .for_action("Source"),
        Event::new(execution_id, EventType::ActionFailed, "", ActionStatus::Failed)
            .in_stage("Source")
            .for_action("Source")
            .with_failure(FailureDetails::new(
                FailureKind::SourceFetch,
                "source fetch error",
                "Branch not found: master",
            )),
        Event::new(execution_id, EventType::StageFailed, "", ActionStatus::Failed)
            .in_stage("Source"),
        Event::new(execution_id, EventType::ExecutionFailed, "Stage 'Source' failed", ActionStatus::Failed)
            .in_stage("Source"),
    ];
    for event in &events {
        store.append(event).await.unwrap();
    }

    let replayed = store.replay().await.unwrap();
    let types: Vec<EventType> = replayed.iter().map(|e| e.event_type).collect();
    let expected: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(types, expected);

    let execution = EventStore::load(temp.path(), execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(execution.pipeline_name, "etl-deploy");
    assert!(execution.completed_at.is_some());
    assert_eq!(
        execution.state,
        ExecutionState::Failed {
            error: "Stage 'Source' failed".to_string()
        }
    );
}

#[tokio::test]
async fn test_concurrent_appends_keep_lines_intact() {
    let temp = TempDir::new().unwrap();
    let execution_id = Uuid::new_v4();
    let store = Arc::new(EventStore::open(temp.path(), execution_id).await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let event = Event::new(
                execution_id,
                EventType::ActionSucceeded,
                format!("action {i} succeeded"),
                ActionStatus::Succeeded,
            )
            .for_action(format!("action-{i}"));
            store.append(&event).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.replay().await.unwrap().len(), 20);
}

#[tokio::test]
async fn test_list_and_load_missing() {
    let temp = TempDir::new().unwrap();
    let executions_dir = temp.path().join("executions");

    assert!(EventStore::list_executions(&executions_dir)
        .await
        .unwrap()
        .is_empty());

    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    EventStore::open(&executions_dir, a).await.unwrap();
    EventStore::open(&executions_dir, b).await.unwrap();
    tokio::fs::create_dir_all(executions_dir.join("not-an-execution"))
        .await
        .unwrap();

    let mut ids = EventStore::list_executions(&executions_dir).await.unwrap();
    ids.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(ids, expected);

    // Loading never creates anything
    let missing = Uuid::new_v4();
    assert!(EventStore::load(&executions_dir, missing).await.unwrap().is_none());
    assert!(!executions_dir.join(missing.to_string()).exists());
}
