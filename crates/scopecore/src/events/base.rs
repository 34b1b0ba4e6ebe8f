use crate::{
    ExecutionId, ExecutionRole, NodeKey, Outcome, ProcessInstanceId, SubscriptionId,
    TriggerDefinition,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted when a runtime command commits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuntimeEvent {
    InstanceStarted {
        instance_id: ProcessInstanceId,
        definition_key: String,
        definition_version: u32,
        timestamp: DateTime<Utc>,
    },
    InstanceEnded {
        instance_id: ProcessInstanceId,
        outcome: Outcome,
        timestamp: DateTime<Utc>,
    },
    InstanceSuspended {
        instance_id: ProcessInstanceId,
        timestamp: DateTime<Utc>,
    },
    InstanceActivated {
        instance_id: ProcessInstanceId,
        timestamp: DateTime<Utc>,
    },
    ExecutionCreated {
        instance_id: ProcessInstanceId,
        execution_id: ExecutionId,
        parent_id: Option<ExecutionId>,
        node: NodeKey,
        role: ExecutionRole,
        timestamp: DateTime<Utc>,
    },
    ExecutionDestroyed {
        instance_id: ProcessInstanceId,
        execution_id: ExecutionId,
        node: NodeKey,
        outcome: Outcome,
        timestamp: DateTime<Utc>,
    },
    SubscriptionCreated {
        instance_id: ProcessInstanceId,
        subscription_id: SubscriptionId,
        scope_id: ExecutionId,
        trigger: TriggerDefinition,
        timestamp: DateTime<Utc>,
    },
    SubscriptionRemoved {
        instance_id: ProcessInstanceId,
        subscription_id: SubscriptionId,
        trigger: TriggerDefinition,
        timestamp: DateTime<Utc>,
    },
    EventSubprocessTriggered {
        instance_id: ProcessInstanceId,
        subscription_id: SubscriptionId,
        scope_id: ExecutionId,
        activity: NodeKey,
        interrupting: bool,
        timestamp: DateTime<Utc>,
    },
}

impl RuntimeEvent {
    pub fn instance_id(&self) -> ProcessInstanceId {
        match self {
            RuntimeEvent::InstanceStarted { instance_id, .. }
            | RuntimeEvent::InstanceEnded { instance_id, .. }
            | RuntimeEvent::InstanceSuspended { instance_id, .. }
            | RuntimeEvent::InstanceActivated { instance_id, .. }
            | RuntimeEvent::ExecutionCreated { instance_id, .. }
            | RuntimeEvent::ExecutionDestroyed { instance_id, .. }
            | RuntimeEvent::SubscriptionCreated { instance_id, .. }
            | RuntimeEvent::SubscriptionRemoved { instance_id, .. }
            | RuntimeEvent::EventSubprocessTriggered { instance_id, .. } => *instance_id,
        }
    }
}

/// Broadcast bus for committed runtime events
pub struct EventBus {
    sender: broadcast::Sender<RuntimeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: RuntimeEvent) {
        // No receivers is fine; events are best-effort notifications
        let _ = self.sender.send(event);
    }

    /// Publish a committed journal in order
    pub fn publish(&self, journal: Vec<RuntimeEvent>) {
        tracing::trace!("Publishing {} runtime events", journal.len());
        for event in journal {
            self.emit(event);
        }
    }
}
