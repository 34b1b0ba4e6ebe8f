use crate::definition::ProcessDefinition;
use crate::query::{ExecutionFilter, SubscriptionFilter};
use crate::subscriptions::{EventSubscription, NewSubscription, SubscriptionTable};
use crate::tree::{Execution, ExecutionTree};
use chrono::{DateTime, Utc};
use scopecore::{
    ExecutionId, ExecutionRole, ExecutionState, NodeKey, Outcome, ProcessInstanceId,
    RuntimeError, RuntimeEvent, SubscriptionId,
};
use std::sync::Arc;

/// Mutable runtime state of one process instance
#[derive(Debug, Clone)]
pub struct InstanceState {
    definition: Arc<ProcessDefinition>,
    tree: ExecutionTree,
    subscriptions: SubscriptionTable,
    suspended: bool,
    started_at: DateTime<Utc>,
}

impl InstanceState {
    pub fn new(id: ProcessInstanceId, definition: Arc<ProcessDefinition>) -> Self {
        Self {
            definition,
            tree: ExecutionTree::new(id),
            subscriptions: SubscriptionTable::new(id),
            suspended: false,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> ProcessInstanceId {
        self.tree.process_instance_id()
    }

    pub fn definition(&self) -> &Arc<ProcessDefinition> {
        &self.definition
    }

    pub fn tree(&self) -> &ExecutionTree {
        &self.tree
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// An instance ends once its execution tree is empty
    pub fn is_ended(&self) -> bool {
        self.tree.is_empty()
    }

    /// Whether the execution is a token waiting in a wait state of a
    /// running instance
    pub fn is_waiting(&self, execution: &Execution) -> bool {
        execution.role == ExecutionRole::Token
            && execution.is_active
            && execution.state == ExecutionState::Active
            && self
                .definition
                .kind(&execution.node)
                .is_some_and(|k| k.is_wait_state())
    }

    pub fn executions(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        self.tree
            .iter()
            .filter(|e| filter.matches(e, self))
            .cloned()
            .collect()
    }

    pub fn event_subscriptions(&self, filter: &SubscriptionFilter) -> Vec<EventSubscription> {
        self.subscriptions
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }

    /// Structural invariants that must hold whenever a command has committed
    pub fn check_invariants(&self) -> Result<(), String> {
        for sub in self.subscriptions.iter() {
            for owner in [sub.scope_id, sub.execution_id] {
                match self.tree.get(owner) {
                    Some(e) if e.is_scope => {}
                    Some(_) => {
                        return Err(format!("subscription {} owned by non-scope {}", sub.id, owner))
                    }
                    None => {
                        return Err(format!("subscription {} outlived execution {}", sub.id, owner))
                    }
                }
            }
        }
        for execution in self.tree.iter() {
            match execution.parent_id {
                Some(parent) => {
                    let parent = self
                        .tree
                        .get(parent)
                        .ok_or_else(|| format!("execution {} lost its parent", execution.id))?;
                    if !parent.children.contains(&execution.id) {
                        return Err(format!("execution {} missing from its parent", execution.id));
                    }
                }
                None if execution.id != self.id() => {
                    return Err(format!("execution {} is a second root", execution.id));
                }
                None => {}
            }
        }
        if self.tree.is_empty() && !self.subscriptions.is_empty() {
            return Err("ended instance still has subscriptions".to_string());
        }
        Ok(())
    }
}

/// Unit of work over a private copy of an instance's state
///
/// Mutations go to the copy and are journaled; `execute` swaps the copy in
/// only when the whole command succeeded.
pub struct Transaction {
    state: InstanceState,
    journal: Vec<RuntimeEvent>,
    steps: usize,
    max_steps: usize,
}

/// Snapshot to restore when a nested operation fails
pub struct Savepoint {
    state: InstanceState,
    journal_len: usize,
}

/// Run `command` as one all-or-nothing unit against `state`
///
/// On success the new state is committed and the journal returned for
/// publication. On failure `state` is left as it was, except that
/// executions ended by earlier commands are compacted away first.
pub fn execute<T>(
    state: &mut InstanceState,
    max_steps: usize,
    command: impl FnOnce(&mut Transaction) -> Result<T, RuntimeError>,
) -> Result<(T, Vec<RuntimeEvent>), RuntimeError> {
    let pruned = state.tree.compact();
    if pruned > 0 {
        tracing::trace!("Compacted {} ended executions of {}", pruned, state.id());
    }

    let mut tx = Transaction {
        state: state.clone(),
        journal: Vec::new(),
        steps: 0,
        max_steps,
    };
    let value = command(&mut tx)?;
    *state = tx.state;
    Ok((value, tx.journal))
}

impl Transaction {
    pub fn state(&self) -> &InstanceState {
        &self.state
    }

    pub fn tree(&self) -> &ExecutionTree {
        &self.state.tree
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.state.subscriptions
    }

    pub fn definition(&self) -> Arc<ProcessDefinition> {
        Arc::clone(&self.state.definition)
    }

    pub fn instance_id(&self) -> ProcessInstanceId {
        self.state.id()
    }

    pub fn record(&mut self, event: RuntimeEvent) {
        self.journal.push(event);
    }

    pub fn journal(&self) -> &[RuntimeEvent] {
        &self.journal
    }

    /// Count one unit of work against the per-command budget
    pub fn step(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(RuntimeError::StepLimitExceeded(self.max_steps));
        }
        Ok(())
    }

    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            state: self.state.clone(),
            journal_len: self.journal.len(),
        }
    }

    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.state = savepoint.state;
        self.journal.truncate(savepoint.journal_len);
    }

    pub fn create_root(&mut self, node: &str) -> Result<ExecutionId, RuntimeError> {
        let id = self.state.tree.create_root(node)?;
        self.state.tree.transition(id, ExecutionState::Active)?;
        self.created(id);
        Ok(id)
    }

    /// Create an active child execution
    pub fn spawn(
        &mut self,
        parent: ExecutionId,
        node: &str,
        role: ExecutionRole,
    ) -> Result<ExecutionId, RuntimeError> {
        let id = self.state.tree.spawn(parent, node, role)?;
        let next = if self.state.suspended {
            ExecutionState::Suspended
        } else {
            ExecutionState::Active
        };
        self.state.tree.transition(id, ExecutionState::Active)?;
        self.state.tree.transition(id, next)?;
        self.created(id);
        Ok(id)
    }

    fn created(&mut self, id: ExecutionId) {
        if let Some(e) = self.state.tree.get(id) {
            tracing::debug!("Created {:?} execution {} at '{}'", e.role, id, e.node);
            let event = RuntimeEvent::ExecutionCreated {
                instance_id: e.process_instance_id,
                execution_id: id,
                parent_id: e.parent_id,
                node: e.node.clone(),
                role: e.role,
                timestamp: Utc::now(),
            };
            self.journal.push(event);
        }
    }

    pub fn move_to_node(&mut self, id: ExecutionId, node: &str) -> Result<(), RuntimeError> {
        self.state.tree.move_to_node(id, node)
    }

    pub fn set_active(&mut self, id: ExecutionId, active: bool) -> Result<(), RuntimeError> {
        self.state.tree.set_active(id, active)
    }

    pub fn set_suspended(&mut self, suspended: bool) -> Result<(), RuntimeError> {
        let next = if suspended {
            ExecutionState::Suspended
        } else {
            ExecutionState::Active
        };
        let ids: Vec<ExecutionId> = self.state.tree.iter().map(|e| e.id).collect();
        for id in ids {
            self.state.tree.transition(id, next)?;
        }
        self.state.suspended = suspended;
        Ok(())
    }

    /// Destroy an execution subtree together with every subscription it owns
    ///
    /// Idempotent: destroying an execution that is already gone does nothing.
    /// Returns the number of executions removed.
    pub fn destroy(&mut self, id: ExecutionId, outcome: Outcome) -> usize {
        let removed = self.state.tree.destroy(id, outcome);
        let instance_id = self.state.id();
        let timestamp = Utc::now();

        for execution in &removed {
            for sub in self.state.subscriptions.unsubscribe_all_owned_by(execution.id) {
                self.journal.push(RuntimeEvent::SubscriptionRemoved {
                    instance_id,
                    subscription_id: sub.id,
                    trigger: sub.trigger,
                    timestamp,
                });
            }
            tracing::debug!(
                "Destroyed execution {} at '{}' ({:?})",
                execution.id,
                execution.node,
                outcome
            );
            self.journal.push(RuntimeEvent::ExecutionDestroyed {
                instance_id,
                execution_id: execution.id,
                node: execution.node.clone(),
                outcome,
                timestamp,
            });
            if execution.is_root() {
                self.journal.push(RuntimeEvent::InstanceEnded {
                    instance_id,
                    outcome,
                    timestamp,
                });
            }
        }
        removed.len()
    }

    pub fn subscribe(&mut self, new: NewSubscription) -> Result<SubscriptionId, RuntimeError> {
        let scope_id = new.scope_id;
        let trigger = new.trigger.clone();
        let id = self.state.subscriptions.subscribe(new)?;
        tracing::debug!("Scope {} subscribed to {}", scope_id, trigger);
        self.journal.push(RuntimeEvent::SubscriptionCreated {
            instance_id: self.state.id(),
            subscription_id: id,
            scope_id,
            trigger,
            timestamp: Utc::now(),
        });
        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<EventSubscription> {
        let sub = self.state.subscriptions.unsubscribe(id)?;
        self.journal.push(RuntimeEvent::SubscriptionRemoved {
            instance_id: self.state.id(),
            subscription_id: sub.id,
            trigger: sub.trigger.clone(),
            timestamp: Utc::now(),
        });
        Some(sub)
    }

    pub fn unsubscribe_all_owned_by(&mut self, scope: ExecutionId) -> usize {
        let ids: Vec<SubscriptionId> = self
            .state
            .subscriptions
            .owned_by(scope)
            .iter()
            .map(|s| s.id)
            .collect();
        ids.into_iter().filter_map(|id| self.unsubscribe(id)).count()
    }

    /// Key of the node an execution is positioned at
    pub fn node_of(&self, id: ExecutionId) -> Result<NodeKey, RuntimeError> {
        Ok(self.state.tree.require(id)?.node.clone())
    }
}
