//! Execution-tree runtime
//!
//! This crate keeps the tree of executions and the event subscriptions of
//! every running process instance, enters and leaves scopes, and starts
//! interrupting and non-interrupting event sub-processes when their
//! triggers arrive.

mod definition;
mod dispatcher;
mod engine;
mod lifecycle;
mod query;
mod registry;
mod state;
mod subscriptions;
mod tree;

pub use definition::ProcessDefinition;
pub use dispatcher::EventDispatcher;
pub use engine::{EngineConfig, HistoricInstance, ProcessEngine};
pub use lifecycle::ScopeLifecycle;
pub use query::{ExecutionFilter, SubscriptionFilter};
pub use registry::DefinitionRegistry;
pub use state::{execute, InstanceState, Savepoint, Transaction};
pub use subscriptions::{EventSubscription, NewSubscription, SubscriptionTable};
pub use tree::{Execution, ExecutionTree};
