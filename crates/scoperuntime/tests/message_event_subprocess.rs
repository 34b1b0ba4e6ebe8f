// crates/scoperuntime/tests/message_event_subprocess.rs

mod common;

use common::*;
use scopecore::RetriggerPolicy;
use scoperuntime::{ExecutionFilter, ProcessEngine, SubscriptionFilter};

async fn check_interrupting_under_process(
    engine: &ProcessEngine,
    expected_subscriptions: usize,
    expected_executions: usize,
) {
    let instance = engine.start_instance("process").await.unwrap();

    // The instance must have a message event subscription
    subscribed_execution(engine, "newMessage").await;
    assert_eq!(subscription_count(engine).await, expected_subscriptions);
    assert_eq!(execution_count(engine).await, expected_executions);

    // Completing the task ends the instance and removes the subscriptions
    let task = task_at(engine, "task").await;
    engine.complete_leaf(task).await.unwrap();
    assert_eq!(subscription_count(engine).await, 0);
    assert_eq!(execution_count(engine).await, 0);
    assert!(engine.is_ended(instance).await);

    // This time trigger the event sub-process instead
    let instance = engine.start_instance("process").await.unwrap();
    let execution = subscribed_execution(engine, "newMessage").await;
    engine
        .message_event_received("newMessage", execution)
        .await
        .unwrap();

    assert_eq!(task_count(engine).await, 1);
    let task = task_at(engine, "eventSubProcessTask").await;
    engine.complete_leaf(task).await.unwrap();
    assert!(engine.is_ended(instance).await);
    assert_eq!(subscription_count(engine).await, 0);
    assert_eq!(execution_count(engine).await, 0);
}

#[tokio::test]
async fn test_interrupting_under_process_definition() {
    let engine = engine_with(&interrupting_model()).await;
    check_interrupting_under_process(&engine, 1, 3).await;
}

/// Unused event subscriptions are deleted along with their scope
#[tokio::test]
async fn test_two_interrupting_under_process_definition() {
    let engine = engine_with(&two_interrupting_model()).await;
    check_interrupting_under_process(&engine, 2, 4).await;
}

#[tokio::test]
async fn test_interrupting_trigger_removes_sibling_subscriptions() {
    let engine = engine_with(&two_interrupting_model()).await;
    let instance = engine.start_instance("process").await.unwrap();

    let execution = subscribed_execution(&engine, "newMessage").await;
    engine
        .message_event_received("newMessage", execution)
        .await
        .unwrap();

    // Root, event sub-process scope and its task; the main task and both
    // listeners are gone
    assert_eq!(execution_count(&engine).await, 3);
    assert_eq!(subscription_count(&engine).await, 0);
    assert_eq!(
        engine
            .count_executions(&ExecutionFilter::tasks(Some("task")))
            .await,
        0
    );

    let err = engine
        .correlate_message("otherMessage", instance)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No subscription"));
}

#[tokio::test]
async fn test_non_interrupting_under_process_definition() {
    let engine = engine_with(&non_interrupting_model(RetriggerPolicy::Consume)).await;

    let instance = engine.start_instance("process").await.unwrap();
    let filter = ExecutionFilter {
        process_instance_id: Some(instance),
        subscription_name: Some("newMessage".to_string()),
        ..ExecutionFilter::default()
    };
    assert!(engine.single_execution(&filter).await.is_some());
    assert_eq!(subscription_count(&engine).await, 1);
    assert_eq!(execution_count(&engine).await, 3);

    // Completing the task ends the instance and removes the subscription
    let task = task_at(&engine, "task").await;
    engine.complete_leaf(task).await.unwrap();
    assert_eq!(subscription_count(&engine).await, 0);
    assert_eq!(execution_count(&engine).await, 0);

    // Trigger the event sub-process, then finish the main flow first
    let instance = engine.start_instance("process").await.unwrap();
    let filter = ExecutionFilter {
        process_instance_id: Some(instance),
        ..filter
    };
    let execution = engine.single_execution(&filter).await.unwrap().id;
    engine
        .message_event_received("newMessage", execution)
        .await
        .unwrap();
    assert_eq!(task_count(&engine).await, 2);

    let task = task_at(&engine, "task").await;
    engine.complete_leaf(task).await.unwrap();
    assert_eq!(execution_count(&engine).await, 3);

    let task = task_at(&engine, "eventSubProcessTask").await;
    engine.complete_leaf(task).await.unwrap();
    assert_eq!(execution_count(&engine).await, 0);
    assert!(engine.is_ended(instance).await);

    // Again, the other way around
    let instance = engine.start_instance("process").await.unwrap();
    let filter = ExecutionFilter {
        process_instance_id: Some(instance),
        ..filter
    };
    let execution = engine.single_execution(&filter).await.unwrap().id;
    engine
        .message_event_received("newMessage", execution)
        .await
        .unwrap();
    assert_eq!(task_count(&engine).await, 2);

    let task = task_at(&engine, "eventSubProcessTask").await;
    engine.complete_leaf(task).await.unwrap();
    assert_eq!(execution_count(&engine).await, 2);

    let task = task_at(&engine, "task").await;
    engine.complete_leaf(task).await.unwrap();
    assert_eq!(execution_count(&engine).await, 0);
    assert_eq!(subscription_count(&engine).await, 0);
    assert!(engine.is_ended(instance).await);
}

#[tokio::test]
async fn test_non_interrupting_keeps_existing_executions() {
    let engine = engine_with(&non_interrupting_model(RetriggerPolicy::Consume)).await;
    let instance = engine.start_instance("process").await.unwrap();

    let main_task = task_at(&engine, "task").await;
    let root_filter = ExecutionFilter {
        process_instance_id: Some(instance),
        ..ExecutionFilter::default()
    };
    let before: Vec<_> = engine
        .executions(&root_filter)
        .await
        .into_iter()
        .map(|e| e.id)
        .collect();
    let listener = subscribed_execution(&engine, "newMessage").await;

    engine
        .message_event_received("newMessage", listener)
        .await
        .unwrap();

    let after: Vec<_> = engine
        .executions(&root_filter)
        .await
        .into_iter()
        .map(|e| e.id)
        .collect();
    // Everything but the consumed listener survives untouched
    for id in before.iter().filter(|id| **id != listener) {
        assert!(after.contains(id));
    }
    assert!(!after.contains(&listener));
    assert_eq!(task_at(&engine, "task").await, main_task);
    // One new subtree: event scope plus its task
    assert_eq!(after.len(), before.len() - 1 + 2);
    assert_eq!(
        engine
            .count_subscriptions(&SubscriptionFilter::messages("newMessage"))
            .await,
        0
    );
}

#[tokio::test]
async fn test_non_interrupting_persist_policy_allows_retrigger() {
    let engine = engine_with(&non_interrupting_model(RetriggerPolicy::Persist)).await;
    let instance = engine.start_instance("process").await.unwrap();
    let listener = subscribed_execution(&engine, "newMessage").await;

    engine
        .message_event_received("newMessage", listener)
        .await
        .unwrap();
    engine
        .message_event_received("newMessage", listener)
        .await
        .unwrap();

    // Two concurrent event sub-process instances next to the main task
    assert_eq!(task_count(&engine).await, 3);
    assert_eq!(subscription_count(&engine).await, 1);
    // root, listener, main task, 2 x (event scope + task)
    assert_eq!(execution_count(&engine).await, 7);

    for task in engine
        .executions(&ExecutionFilter::tasks(Some("eventSubProcessTask")))
        .await
    {
        engine.complete_leaf(task.id).await.unwrap();
    }
    assert_eq!(execution_count(&engine).await, 3);
    assert_eq!(subscription_count(&engine).await, 1);

    let task = task_at(&engine, "task").await;
    engine.complete_leaf(task).await.unwrap();
    assert!(engine.is_ended(instance).await);
    assert_eq!(subscription_count(&engine).await, 0);
}
