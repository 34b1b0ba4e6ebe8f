//! Core vocabulary for the scope runtime
//!
//! Process models, execution identities and lifecycle states, errors and
//! runtime events. Everything that mutates lives in `scoperuntime`.

mod error;
pub mod events;
mod execution;
mod model;

pub use error::{EngineError, Entity, ModelError, RuntimeError};
pub use events::*;
pub use execution::{
    ExecutionId, ExecutionRole, ExecutionState, Outcome, ProcessInstanceId, SubscriptionId,
};
pub use model::{
    EventSubprocessDefinition, NodeKey, NodeKind, NodeSpec, ProcessModel, RetriggerPolicy,
    SequenceFlow, TriggerDefinition, TriggerKind,
};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
