// crates/scoperuntime/tests/common/mod.rs

#![allow(dead_code)]

use scopecore::{EventSubprocessDefinition, ExecutionId, NodeSpec, ProcessModel, RetriggerPolicy};
use scoperuntime::{ExecutionFilter, ProcessEngine, SubscriptionFilter};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Main flow `theStart -> task -> theEnd` plus one event sub-process per
/// entry of `triggers`, each running a single user task
pub fn process_with_event_sub_processes(
    triggers: &[(&str, &str, EventSubprocessDefinition)],
) -> ProcessModel {
    let mut model = ProcessModel::new("process");
    model.chain([
        NodeSpec::start_event("theStart"),
        NodeSpec::user_task("task"),
        NodeSpec::end_event("theEnd"),
    ]);
    for (key, task, definition) in triggers {
        model.add_node(NodeSpec::event_sub_process(*key, definition.clone()));
        model.chain([
            NodeSpec::start_event(format!("{key}Start")).within(*key),
            NodeSpec::user_task(*task).within(*key),
            NodeSpec::end_event(format!("{key}End")).within(*key),
        ]);
    }
    model
}

pub fn interrupting_model() -> ProcessModel {
    process_with_event_sub_processes(&[(
        "eventSubProcess",
        "eventSubProcessTask",
        EventSubprocessDefinition::message("newMessage"),
    )])
}

pub fn two_interrupting_model() -> ProcessModel {
    process_with_event_sub_processes(&[
        (
            "eventSubProcess",
            "eventSubProcessTask",
            EventSubprocessDefinition::message("newMessage"),
        ),
        (
            "otherEventSubProcess",
            "otherEventSubProcessTask",
            EventSubprocessDefinition::message("otherMessage"),
        ),
    ])
}

pub fn non_interrupting_model(policy: RetriggerPolicy) -> ProcessModel {
    process_with_event_sub_processes(&[(
        "eventSubProcess",
        "eventSubProcessTask",
        EventSubprocessDefinition::message("newMessage")
            .non_interrupting()
            .with_policy(policy),
    )])
}

pub async fn engine_with(model: &ProcessModel) -> ProcessEngine {
    init_tracing();
    let engine = ProcessEngine::new();
    engine.deploy(model).await.expect("model should deploy");
    engine
}

pub async fn execution_count(engine: &ProcessEngine) -> usize {
    engine.count_executions(&ExecutionFilter::all()).await
}

pub async fn subscription_count(engine: &ProcessEngine) -> usize {
    engine.count_subscriptions(&SubscriptionFilter::all()).await
}

pub async fn task_count(engine: &ProcessEngine) -> usize {
    engine.count_executions(&ExecutionFilter::tasks(None)).await
}

/// The single open task at `node`
pub async fn task_at(engine: &ProcessEngine, node: &str) -> ExecutionId {
    engine
        .single_execution(&ExecutionFilter::tasks(Some(node)))
        .await
        .unwrap_or_else(|| panic!("expected exactly one task at '{}'", node))
        .id
}

/// The single execution hosting a subscription for `name`
pub async fn subscribed_execution(engine: &ProcessEngine, name: &str) -> ExecutionId {
    let filter = ExecutionFilter {
        subscription_name: Some(name.to_string()),
        ..ExecutionFilter::default()
    };
    engine
        .single_execution(&filter)
        .await
        .unwrap_or_else(|| panic!("expected exactly one execution subscribed to '{}'", name))
        .id
}
