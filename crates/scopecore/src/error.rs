use crate::{ExecutionId, ProcessInstanceId, SubscriptionId, TriggerDefinition};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// The runtime error behind this one, if any
    pub fn as_runtime(&self) -> Option<&RuntimeError> {
        match self {
            EngineError::Runtime(e) => Some(e),
            _ => None,
        }
    }
}

/// Something a runtime command referenced but could not find
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Execution(ExecutionId),
    Subscription(SubscriptionId),
    ProcessInstance(ProcessInstanceId),
    Definition(String),
    Node(String),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Execution(id) => write!(f, "execution {}", id),
            Entity::Subscription(id) => write!(f, "event subscription {}", id),
            Entity::ProcessInstance(id) => write!(f, "process instance {}", id),
            Entity::Definition(key) => write!(f, "process definition '{}'", key),
            Entity::Node(key) => write!(f, "node '{}'", key),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("Scope {scope} already has a subscription for {trigger}")]
    DuplicateSubscription {
        scope: ExecutionId,
        trigger: TriggerDefinition,
    },

    #[error("Failed to enter scope '{node}': {source}")]
    ScopeEntryFailed {
        node: String,
        #[source]
        source: Box<RuntimeError>,
    },

    #[error("No subscription for {trigger} reachable from execution {target}")]
    NoMatchingSubscription {
        trigger: TriggerDefinition,
        target: ExecutionId,
    },

    #[error("{trigger} resolves to {candidates} subscriptions from {target}")]
    AmbiguousTarget {
        trigger: TriggerDefinition,
        target: ExecutionId,
        candidates: usize,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Process instance {0} is suspended")]
    Suspended(ProcessInstanceId),

    #[error("Command exceeded {0} steps without reaching a wait state")]
    StepLimitExceeded(usize),
}

impl RuntimeError {
    /// Innermost cause, unwrapping scope entry failures
    pub fn root_cause(&self) -> &RuntimeError {
        match self {
            RuntimeError::ScopeEntryFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Invalid process model: {0}")]
    Invalid(String),

    #[error("Duplicate node key: {0}")]
    DuplicateNode(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Scope '{0}' must contain exactly one start event")]
    StartEvent(String),

    #[error("Invalid sequence flow '{flow}': {reason}")]
    InvalidFlow { flow: String, reason: String },

    #[error("Node '{0}' is not reachable from the start event of its scope")]
    Unreachable(String),
}
