use crate::state::InstanceState;
use crate::subscriptions::EventSubscription;
use crate::tree::Execution;
use scopecore::{ExecutionId, ExecutionRole, NodeKey, ProcessInstanceId, TriggerKind};

/// Criteria for listing executions; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub process_instance_id: Option<ProcessInstanceId>,
    /// Key of the node the execution is positioned at
    pub node: Option<NodeKey>,
    /// Executions hosting a subscription with this trigger name
    pub subscription_name: Option<String>,
    pub role: Option<ExecutionRole>,
    /// Only tokens waiting in a wait state, i.e. open tasks
    pub waiting: bool,
}

impl ExecutionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Open tasks, optionally restricted to one node key
    pub fn tasks(node: Option<&str>) -> Self {
        Self {
            node: node.map(str::to_string),
            waiting: true,
            ..Self::default()
        }
    }

    pub fn matches(&self, execution: &Execution, state: &InstanceState) -> bool {
        if self
            .process_instance_id
            .is_some_and(|id| id != execution.process_instance_id)
        {
            return false;
        }
        if self.node.as_ref().is_some_and(|n| *n != execution.node) {
            return false;
        }
        if self.role.is_some_and(|r| r != execution.role) {
            return false;
        }
        if self.waiting && !state.is_waiting(execution) {
            return false;
        }
        if let Some(name) = &self.subscription_name {
            let hosts = state
                .subscriptions()
                .find_by_trigger_name(name)
                .iter()
                .any(|s| s.execution_id == execution.id);
            if !hosts {
                return false;
            }
        }
        true
    }
}

/// Criteria for listing event subscriptions; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub process_instance_id: Option<ProcessInstanceId>,
    pub trigger_name: Option<String>,
    pub kind: Option<TriggerKind>,
    /// Owning scope execution
    pub scope_id: Option<ExecutionId>,
}

impl SubscriptionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn messages(name: impl Into<String>) -> Self {
        Self {
            trigger_name: Some(name.into()),
            kind: Some(TriggerKind::Message),
            ..Self::default()
        }
    }

    pub fn matches(&self, sub: &EventSubscription) -> bool {
        self.process_instance_id
            .map_or(true, |id| id == sub.process_instance_id)
            && self
                .trigger_name
                .as_ref()
                .map_or(true, |n| *n == sub.trigger.name)
            && self.kind.map_or(true, |k| k == sub.trigger.kind)
            && self.scope_id.map_or(true, |s| s == sub.scope_id)
    }
}
