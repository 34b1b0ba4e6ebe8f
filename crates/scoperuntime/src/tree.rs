use chrono::{DateTime, Utc};
use scopecore::{
    Entity, ExecutionId, ExecutionRole, ExecutionState, NodeKey, Outcome, ProcessInstanceId,
    RuntimeError,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A token of control inside one process instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub process_instance_id: ProcessInstanceId,
    pub parent_id: Option<ExecutionId>,
    pub children: Vec<ExecutionId>,
    pub node: NodeKey,
    pub role: ExecutionRole,
    pub is_scope: bool,
    /// Inactive executions are structural: scopes hosting children, joins waiting
    pub is_active: bool,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
}

impl Execution {
    pub fn is_live(&self) -> bool {
        self.state.is_live()
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Arena of executions for a single process instance
///
/// Destroying an execution moves it (and its subtree) to an ended state,
/// which doubles as the tombstone that makes repeated destruction a no-op.
/// Tombstones stay until the next [`ExecutionTree::compact`].
#[derive(Debug, Clone)]
pub struct ExecutionTree {
    process_instance_id: ProcessInstanceId,
    records: Vec<Execution>,
    slots: HashMap<ExecutionId, usize>,
    live: usize,
}

impl ExecutionTree {
    /// Empty tree; the first execution created becomes the root
    pub fn new(process_instance_id: ProcessInstanceId) -> Self {
        Self {
            process_instance_id,
            records: Vec::new(),
            slots: HashMap::new(),
            live: 0,
        }
    }

    pub fn process_instance_id(&self) -> ProcessInstanceId {
        self.process_instance_id
    }

    /// Create the root execution; its id is the process instance id
    pub fn create_root(&mut self, node: impl Into<NodeKey>) -> Result<ExecutionId, RuntimeError> {
        if !self.records.is_empty() {
            return Err(RuntimeError::InvalidState(format!(
                "process instance {} already has a root execution",
                self.process_instance_id
            )));
        }
        let id = self.process_instance_id;
        self.insert(id, None, node.into(), ExecutionRole::Root);
        Ok(id)
    }

    /// Add a new execution under `parent_id`
    pub fn create_child(
        &mut self,
        parent_id: ExecutionId,
        node: impl Into<NodeKey>,
        is_scope: bool,
    ) -> Result<ExecutionId, RuntimeError> {
        let role = if is_scope {
            ExecutionRole::Scope
        } else {
            ExecutionRole::Token
        };
        self.spawn(parent_id, node, role)
    }

    /// Add a new execution with an explicit role under `parent_id`
    pub fn spawn(
        &mut self,
        parent_id: ExecutionId,
        node: impl Into<NodeKey>,
        role: ExecutionRole,
    ) -> Result<ExecutionId, RuntimeError> {
        if self.get(parent_id).is_none() {
            return Err(RuntimeError::NotFound(Entity::Execution(parent_id)));
        }
        let id = Uuid::new_v4();
        self.insert(id, Some(parent_id), node.into(), role);
        if let Some(slot) = self.slots.get(&parent_id).copied() {
            self.records[slot].children.push(id);
        }
        Ok(id)
    }

    fn insert(
        &mut self,
        id: ExecutionId,
        parent_id: Option<ExecutionId>,
        node: NodeKey,
        role: ExecutionRole,
    ) {
        let execution = Execution {
            id,
            process_instance_id: self.process_instance_id,
            parent_id,
            children: Vec::new(),
            node,
            role,
            is_scope: role.is_scope(),
            // Tokens do the work; everything else only hosts children or subscriptions
            is_active: role == ExecutionRole::Token,
            state: ExecutionState::Created,
            created_at: Utc::now(),
        };
        self.slots.insert(id, self.records.len());
        self.records.push(execution);
        self.live += 1;
    }

    /// Live execution by id
    pub fn get(&self, id: ExecutionId) -> Option<&Execution> {
        self.record(id).filter(|e| e.is_live())
    }

    /// Execution by id, including ended tombstones
    pub fn record(&self, id: ExecutionId) -> Option<&Execution> {
        self.slots.get(&id).map(|&slot| &self.records[slot])
    }

    pub fn require(&self, id: ExecutionId) -> Result<&Execution, RuntimeError> {
        self.get(id)
            .ok_or(RuntimeError::NotFound(Entity::Execution(id)))
    }

    fn live_mut(&mut self, id: ExecutionId) -> Result<&mut Execution, RuntimeError> {
        match self.slots.get(&id) {
            Some(&slot) if self.records[slot].is_live() => Ok(&mut self.records[slot]),
            _ => Err(RuntimeError::NotFound(Entity::Execution(id))),
        }
    }

    pub fn root(&self) -> Option<&Execution> {
        self.records.first().filter(|e| e.is_live())
    }

    /// Reposition an execution without changing the shape of the tree
    pub fn move_to_node(
        &mut self,
        id: ExecutionId,
        node: impl Into<NodeKey>,
    ) -> Result<(), RuntimeError> {
        self.live_mut(id)?.node = node.into();
        Ok(())
    }

    pub fn set_active(&mut self, id: ExecutionId, active: bool) -> Result<(), RuntimeError> {
        self.live_mut(id)?.is_active = active;
        Ok(())
    }

    /// Move a live execution along its lifecycle
    pub fn transition(
        &mut self,
        id: ExecutionId,
        next: ExecutionState,
    ) -> Result<(), RuntimeError> {
        let execution = self.live_mut(id)?;
        if execution.state == next {
            return Ok(());
        }
        if next.is_ended() || !execution.state.can_transition_to(next) {
            return Err(RuntimeError::InvalidState(format!(
                "execution {} cannot move from {:?} to {:?}",
                id, execution.state, next
            )));
        }
        execution.state = next;
        Ok(())
    }

    /// Remove an execution and its whole subtree, children before parents
    ///
    /// Returns the removed executions in removal order. Destroying an
    /// execution that is unknown or already ended removes nothing.
    pub fn destroy(&mut self, id: ExecutionId, outcome: Outcome) -> Vec<Execution> {
        if self.get(id).is_none() {
            return Vec::new();
        }

        let mut order = self.descendants(id);
        order.reverse();
        order.push(id);

        let mut removed = Vec::with_capacity(order.len());
        for victim in order {
            if let Some(&slot) = self.slots.get(&victim) {
                let record = &mut self.records[slot];
                record.state = outcome.into();
                record.is_active = false;
                record.children.clear();
                removed.push(record.clone());
                self.live -= 1;
            }
        }

        if let Some(parent_id) = removed.last().and_then(|e| e.parent_id) {
            if let Some(&slot) = self.slots.get(&parent_id) {
                self.records[slot].children.retain(|c| *c != id);
            }
        }
        removed
    }

    /// Live children in creation order
    pub fn children(&self, id: ExecutionId) -> Vec<&Execution> {
        self.get(id)
            .map(|e| e.children.iter().filter_map(|c| self.get(*c)).collect())
            .unwrap_or_default()
    }

    /// All live descendants, pre-order, excluding `id` itself
    pub fn descendants(&self, id: ExecutionId) -> Vec<ExecutionId> {
        let mut result = Vec::new();
        let mut stack: Vec<ExecutionId> = match self.get(id) {
            Some(e) => e.children.iter().rev().copied().collect(),
            None => return result,
        };
        while let Some(next) = stack.pop() {
            if let Some(e) = self.get(next) {
                result.push(next);
                stack.extend(e.children.iter().rev().copied());
            }
        }
        result
    }

    /// Ancestors from the parent up to the root
    pub fn ancestors(&self, id: ExecutionId) -> Vec<ExecutionId> {
        let mut result = Vec::new();
        let mut current = self.get(id).and_then(|e| e.parent_id);
        while let Some(parent) = current {
            result.push(parent);
            current = self.get(parent).and_then(|e| e.parent_id);
        }
        result
    }

    /// Drop tombstones, keeping the root record; returns how many went
    ///
    /// Live executions never link to ended ones, so only `record` lookups
    /// of already ended ids are affected.
    pub fn compact(&mut self) -> usize {
        let before = self.records.len();
        let root = self.process_instance_id;
        self.records.retain(|e| e.is_live() || e.id == root);
        let pruned = before - self.records.len();
        if pruned > 0 {
            self.slots = self
                .records
                .iter()
                .enumerate()
                .map(|(slot, e)| (e.id, slot))
                .collect();
        }
        pruned
    }

    /// Live executions in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Execution> + '_ {
        self.records.iter().filter(|e| e.is_live())
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
