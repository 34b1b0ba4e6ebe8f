use crate::definition::ProcessDefinition;
use crate::state::Transaction;
use crate::subscriptions::NewSubscription;
use chrono::Utc;
use scopecore::{
    Entity, ExecutionId, ExecutionRole, NodeKind, Outcome, RetriggerPolicy, RuntimeError,
    RuntimeEvent, SubscriptionId,
};
use std::collections::VecDeque;
use std::sync::Arc;

/// Creates and tears down executions and subscriptions as scopes are
/// entered, triggered, completed and cancelled
///
/// Operates inside a [`Transaction`]; every public method either finishes
/// completely or returns an error, and the caller's unit of work discards
/// the partial state.
pub struct ScopeLifecycle<'a> {
    tx: &'a mut Transaction,
    definition: Arc<ProcessDefinition>,
    pending: VecDeque<ExecutionId>,
}

impl<'a> ScopeLifecycle<'a> {
    pub fn new(tx: &'a mut Transaction) -> Self {
        let definition = tx.definition();
        Self {
            tx,
            definition,
            pending: VecDeque::new(),
        }
    }

    /// Create the root execution of a new instance and run it to its first
    /// wait states
    pub fn start_instance(&mut self) -> Result<ExecutionId, RuntimeError> {
        let root_scope = self.definition.root_scope().to_string();
        let (root, start) = self.enter_scope(None, &root_scope, ExecutionRole::Root)?;

        self.tx.record(RuntimeEvent::InstanceStarted {
            instance_id: root,
            definition_key: self.definition.key().to_string(),
            definition_version: self.definition.version(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            "Started process instance {} of '{}' v{}",
            root,
            self.definition.key(),
            self.definition.version()
        );

        self.pending.push_back(start);
        self.drain()?;
        Ok(root)
    }

    /// Create a scope execution, arm its event sub-processes and place a
    /// token on its start event
    ///
    /// Returns the scope execution and the start token; the token is not
    /// advanced. Any failure restores the state from before the call and is
    /// reported as [`RuntimeError::ScopeEntryFailed`].
    pub fn enter_scope(
        &mut self,
        parent: Option<ExecutionId>,
        scope_node: &str,
        role: ExecutionRole,
    ) -> Result<(ExecutionId, ExecutionId), RuntimeError> {
        let savepoint = self.tx.savepoint();
        match self.try_enter_scope(parent, scope_node, role) {
            Ok(entered) => Ok(entered),
            Err(source) => {
                self.tx.rollback_to(savepoint);
                tracing::warn!("Entering scope '{}' failed: {}", scope_node, source);
                Err(RuntimeError::ScopeEntryFailed {
                    node: scope_node.to_string(),
                    source: Box::new(source),
                })
            }
        }
    }

    fn try_enter_scope(
        &mut self,
        parent: Option<ExecutionId>,
        scope_node: &str,
        role: ExecutionRole,
    ) -> Result<(ExecutionId, ExecutionId), RuntimeError> {
        let definition = Arc::clone(&self.definition);
        let start = definition
            .start_event(scope_node)
            .ok_or_else(|| RuntimeError::NotFound(Entity::Node(scope_node.to_string())))?;

        let scope = match parent {
            None => self.tx.create_root(scope_node)?,
            Some(parent) => self.tx.spawn(parent, scope_node, role)?,
        };

        for (activity, esp) in definition.event_sub_processes(scope_node) {
            let listener = self.tx.spawn(scope, activity, ExecutionRole::Listener)?;
            self.tx.subscribe(NewSubscription {
                scope_id: scope,
                execution_id: listener,
                trigger: esp.trigger.clone(),
                activity: activity.to_string(),
            })?;
        }

        let token = self.tx.spawn(scope, start, ExecutionRole::Token)?;
        Ok((scope, token))
    }

    /// Complete the wait state `execution` is in and advance the instance
    pub fn complete_leaf(&mut self, execution: ExecutionId) -> Result<(), RuntimeError> {
        self.ensure_running()?;
        let token = self.tx.tree().require(execution)?;
        if token.role != ExecutionRole::Token || !token.children.is_empty() {
            return Err(RuntimeError::InvalidState(format!(
                "execution {} is not a leaf token",
                execution
            )));
        }
        if !self.tx.state().is_waiting(token) {
            return Err(RuntimeError::InvalidState(format!(
                "execution {} is not waiting at '{}'",
                execution, token.node
            )));
        }

        tracing::debug!("Completing '{}' on execution {}", token.node, execution);
        self.leave(execution)?;
        self.drain()
    }

    /// Start the event sub-process a subscription arms
    ///
    /// Interrupting: every execution below the owning scope is terminated,
    /// taking all their subscriptions with them, before the body starts.
    /// Non-interrupting: the body starts next to the existing executions;
    /// with [`RetriggerPolicy::Consume`] the firing subscription is used up.
    pub fn trigger_event_subprocess(
        &mut self,
        subscription: SubscriptionId,
    ) -> Result<(), RuntimeError> {
        self.ensure_running()?;
        let sub = self
            .tx
            .subscriptions()
            .get(subscription)
            .cloned()
            .ok_or(RuntimeError::NotFound(Entity::Subscription(subscription)))?;
        let esp = self
            .definition
            .event_subprocess(&sub.activity)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(Entity::Node(sub.activity.clone())))?;
        let scope = sub.scope_id;
        self.tx.tree().require(scope)?;

        if esp.interrupting {
            let children: Vec<ExecutionId> =
                self.tx.tree().children(scope).iter().map(|e| e.id).collect();
            let mut terminated = 0;
            for child in children {
                terminated += self.tx.destroy(child, Outcome::Terminated);
            }
            self.tx.unsubscribe_all_owned_by(scope);
            tracing::info!(
                "Interrupting '{}' on scope {} terminated {} executions",
                sub.activity,
                scope,
                terminated
            );
        } else {
            if esp.policy == RetriggerPolicy::Consume {
                self.tx.destroy(sub.execution_id, Outcome::Terminated);
            }
            tracing::info!("Non-interrupting '{}' started on scope {}", sub.activity, scope);
        }

        self.tx.record(RuntimeEvent::EventSubprocessTriggered {
            instance_id: self.tx.instance_id(),
            subscription_id: sub.id,
            scope_id: scope,
            activity: sub.activity.clone(),
            interrupting: esp.interrupting,
            timestamp: Utc::now(),
        });

        let (_, start) = self.enter_scope(Some(scope), &sub.activity, ExecutionRole::EventScope)?;
        self.pending.push_back(start);
        self.drain()
    }

    /// Terminate the whole instance
    pub fn cancel_instance(&mut self) -> Result<(), RuntimeError> {
        let root = self.tx.instance_id();
        self.tx.tree().require(root)?;
        self.tx.destroy(root, Outcome::Terminated);
        tracing::info!("Cancelled process instance {}", root);
        Ok(())
    }

    pub fn suspend_instance(&mut self) -> Result<(), RuntimeError> {
        if self.tx.state().is_suspended() {
            return Ok(());
        }
        self.tx.set_suspended(true)?;
        self.tx.record(RuntimeEvent::InstanceSuspended {
            instance_id: self.tx.instance_id(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub fn activate_instance(&mut self) -> Result<(), RuntimeError> {
        if !self.tx.state().is_suspended() {
            return Ok(());
        }
        self.tx.set_suspended(false)?;
        self.tx.record(RuntimeEvent::InstanceActivated {
            instance_id: self.tx.instance_id(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), RuntimeError> {
        if self.tx.state().is_suspended() {
            return Err(RuntimeError::Suspended(self.tx.instance_id()));
        }
        Ok(())
    }

    /// Advance queued tokens until each one waits or ends
    fn drain(&mut self) -> Result<(), RuntimeError> {
        while let Some(token) = self.pending.pop_front() {
            // A terminate end or an earlier join may already have removed it
            let Some(execution) = self.tx.tree().get(token) else {
                continue;
            };
            let node = execution.node.clone();
            self.tx.step()?;

            let kind = self
                .definition
                .kind(&node)
                .cloned()
                .ok_or_else(|| RuntimeError::NotFound(Entity::Node(node.clone())))?;

            match kind {
                NodeKind::StartEvent => self.leave(token)?,
                NodeKind::UserTask => {
                    tracing::debug!("Execution {} waits at '{}'", token, node);
                }
                NodeKind::EndEvent => self.end_token(token)?,
                NodeKind::TerminateEndEvent => self.terminate_scope(token)?,
                NodeKind::ParallelGateway => self.parallel_gateway(token, &node)?,
                NodeKind::SubProcess => self.enter_sub_process(token, &node)?,
                NodeKind::EventSubProcess(_) => {
                    return Err(RuntimeError::InvalidState(format!(
                        "token {} reached event sub-process '{}' through a flow",
                        token, node
                    )));
                }
            }
        }
        Ok(())
    }

    /// Take the outgoing flows of the token's node
    ///
    /// The token follows the first flow; every further flow gets a new
    /// sibling token. Without outgoing flows the token ends.
    fn leave(&mut self, token: ExecutionId) -> Result<(), RuntimeError> {
        let node = self.tx.node_of(token)?;
        let targets = self.definition.outgoing(&node).to_vec();
        let Some((first, rest)) = targets.split_first() else {
            return self.end_token(token);
        };

        let parent = self.parent_of(token)?;
        self.tx.move_to_node(token, first)?;
        self.pending.push_back(token);
        for target in rest {
            let sibling = self.tx.spawn(parent, target, ExecutionRole::Token)?;
            self.pending.push_back(sibling);
        }
        Ok(())
    }

    /// A token reached a normal end: remove it and complete what it leaves idle
    fn end_token(&mut self, token: ExecutionId) -> Result<(), RuntimeError> {
        let parent = self.parent_of(token)?;
        self.tx.destroy(token, Outcome::Completed);
        self.child_ended(parent)
    }

    /// Complete `scope` once nothing but listeners remain below it
    fn child_ended(&mut self, scope: ExecutionId) -> Result<(), RuntimeError> {
        let Some(execution) = self.tx.tree().get(scope) else {
            return Ok(());
        };
        let children = self.tx.tree().children(scope);
        if children.iter().any(|c| c.role != ExecutionRole::Listener) {
            return Ok(());
        }

        // The scope's work is done; its event sub-processes can no longer fire
        let listeners: Vec<ExecutionId> = children.iter().map(|c| c.id).collect();
        let node = execution.node.clone();
        for listener in listeners {
            self.tx.destroy(listener, Outcome::Terminated);
        }
        tracing::debug!("Scope {} at '{}' has no work left", scope, node);
        self.complete_scope(scope)
    }

    /// Remove a finished scope and continue in its parent
    fn complete_scope(&mut self, scope: ExecutionId) -> Result<(), RuntimeError> {
        let execution = self.tx.tree().require(scope)?.clone();
        self.tx.destroy(scope, Outcome::Completed);

        let Some(parent) = execution.parent_id else {
            tracing::info!("Process instance {} completed", scope);
            return Ok(());
        };

        let targets = match execution.role {
            ExecutionRole::Scope => self.definition.outgoing(&execution.node).to_vec(),
            _ => Vec::new(),
        };
        if targets.is_empty() {
            return self.child_ended(parent);
        }
        for target in &targets {
            let token = self.tx.spawn(parent, target, ExecutionRole::Token)?;
            self.pending.push_back(token);
        }
        Ok(())
    }

    /// Terminate every execution of the token's scope, then complete it
    fn terminate_scope(&mut self, token: ExecutionId) -> Result<(), RuntimeError> {
        let scope = self.parent_of(token)?;
        self.tx.destroy(token, Outcome::Completed);

        let children: Vec<ExecutionId> =
            self.tx.tree().children(scope).iter().map(|e| e.id).collect();
        for child in children {
            self.tx.destroy(child, Outcome::Terminated);
        }
        tracing::info!("Terminate end event ended scope {}", scope);
        self.complete_scope(scope)
    }

    /// Join on incoming flows, then fork on outgoing ones
    fn parallel_gateway(&mut self, token: ExecutionId, node: &str) -> Result<(), RuntimeError> {
        let incoming = self.definition.incoming_count(node);
        if incoming > 1 {
            let parent = self.parent_of(token)?;
            self.tx.set_active(token, false)?;

            let arrived: Vec<ExecutionId> = self
                .tx
                .tree()
                .children(parent)
                .iter()
                .filter(|c| c.role == ExecutionRole::Token && c.node == node && !c.is_active)
                .map(|c| c.id)
                .collect();
            if arrived.len() < incoming {
                tracing::debug!(
                    "Gateway '{}' has {}/{} tokens",
                    node,
                    arrived.len(),
                    incoming
                );
                return Ok(());
            }

            let merged: Vec<ExecutionId> = arrived
                .into_iter()
                .filter(|id| *id != token)
                .take(incoming - 1)
                .collect();
            for other in merged {
                self.tx.destroy(other, Outcome::Completed);
            }
            self.tx.set_active(token, true)?;
        }
        self.leave(token)
    }

    /// Replace the arriving token by a scope execution for the sub-process
    fn enter_sub_process(&mut self, token: ExecutionId, node: &str) -> Result<(), RuntimeError> {
        let parent = self.parent_of(token)?;
        let (_, start) = self.enter_scope(Some(parent), node, ExecutionRole::Scope)?;
        self.tx.destroy(token, Outcome::Completed);
        self.pending.push_back(start);
        Ok(())
    }

    fn parent_of(&self, id: ExecutionId) -> Result<ExecutionId, RuntimeError> {
        self.tx.tree().require(id)?.parent_id.ok_or_else(|| {
            RuntimeError::InvalidState(format!("execution {} has no parent", id))
        })
    }
}
