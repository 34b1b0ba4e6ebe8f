use chrono::{DateTime, Utc};
use scopecore::{
    ExecutionId, NodeKey, ProcessInstanceId, RuntimeError, SubscriptionId, TriggerDefinition,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Registered interest of a scope in a named trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubscription {
    pub id: SubscriptionId,
    pub trigger: TriggerDefinition,
    /// Scope execution the triggered event sub-process runs in
    pub scope_id: ExecutionId,
    /// Listener execution hosting the subscription
    pub execution_id: ExecutionId,
    /// Event sub-process node armed by this subscription
    pub activity: NodeKey,
    pub process_instance_id: ProcessInstanceId,
    pub created_at: DateTime<Utc>,
}

impl EventSubscription {
    /// Whether removing `execution` must take this subscription with it
    pub fn is_owned_by(&self, execution: ExecutionId) -> bool {
        self.scope_id == execution || self.execution_id == execution
    }
}

/// Parameters for a new subscription
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub scope_id: ExecutionId,
    pub execution_id: ExecutionId,
    pub trigger: TriggerDefinition,
    pub activity: NodeKey,
}

/// Owning scope and trigger name; the trigger kind is not part of the key
type SubscriptionKey = (ExecutionId, String);

/// Subscriptions of one process instance
///
/// At most one subscription exists per (owning scope, trigger name).
#[derive(Debug, Clone)]
pub struct SubscriptionTable {
    process_instance_id: ProcessInstanceId,
    rows: BTreeMap<u64, EventSubscription>,
    by_id: HashMap<SubscriptionId, u64>,
    by_key: HashMap<SubscriptionKey, SubscriptionId>,
    sequence: u64,
}

impl SubscriptionTable {
    pub fn new(process_instance_id: ProcessInstanceId) -> Self {
        Self {
            process_instance_id,
            rows: BTreeMap::new(),
            by_id: HashMap::new(),
            by_key: HashMap::new(),
            sequence: 0,
        }
    }

    pub fn subscribe(&mut self, new: NewSubscription) -> Result<SubscriptionId, RuntimeError> {
        let key = (new.scope_id, new.trigger.name.clone());
        if self.by_key.contains_key(&key) {
            return Err(RuntimeError::DuplicateSubscription {
                scope: new.scope_id,
                trigger: new.trigger,
            });
        }

        let id = Uuid::new_v4();
        self.sequence += 1;
        self.rows.insert(
            self.sequence,
            EventSubscription {
                id,
                trigger: new.trigger,
                scope_id: new.scope_id,
                execution_id: new.execution_id,
                activity: new.activity,
                process_instance_id: self.process_instance_id,
                created_at: Utc::now(),
            },
        );
        self.by_id.insert(id, self.sequence);
        self.by_key.insert(key, id);
        Ok(id)
    }

    /// Remove one subscription; removing an unknown id is a no-op
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Option<EventSubscription> {
        let seq = self.by_id.remove(&id)?;
        let row = self.rows.remove(&seq)?;
        self.by_key
            .remove(&(row.scope_id, row.trigger.name.clone()));
        Some(row)
    }

    /// Remove every subscription owned by or hosted on `execution`
    pub fn unsubscribe_all_owned_by(&mut self, execution: ExecutionId) -> Vec<EventSubscription> {
        let ids: Vec<SubscriptionId> = self
            .rows
            .values()
            .filter(|s| s.is_owned_by(execution))
            .map(|s| s.id)
            .collect();
        ids.into_iter().filter_map(|id| self.unsubscribe(id)).collect()
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&EventSubscription> {
        self.by_id.get(&id).and_then(|seq| self.rows.get(seq))
    }

    /// Subscriptions bearing a trigger, oldest first
    pub fn find_by_trigger(&self, trigger: &TriggerDefinition) -> Vec<&EventSubscription> {
        self.rows
            .values()
            .filter(|s| &s.trigger == trigger)
            .collect()
    }

    /// Subscriptions with the given name regardless of trigger kind
    pub fn find_by_trigger_name(&self, name: &str) -> Vec<&EventSubscription> {
        self.rows
            .values()
            .filter(|s| s.trigger.name == name)
            .collect()
    }

    /// Subscriptions owned by `execution`, either as scope or as host
    pub fn owned_by(&self, execution: ExecutionId) -> Vec<&EventSubscription> {
        self.rows
            .values()
            .filter(|s| s.is_owned_by(execution))
            .collect()
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &EventSubscription> + '_ {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_subscription(scope: ExecutionId, name: &str) -> NewSubscription {
        NewSubscription {
            scope_id: scope,
            execution_id: Uuid::new_v4(),
            trigger: TriggerDefinition::message(name),
            activity: "eventSubProcess".to_string(),
        }
    }

    #[test]
    fn duplicate_scope_and_trigger_is_rejected() {
        let mut table = SubscriptionTable::new(Uuid::new_v4());
        let scope = Uuid::new_v4();
        table.subscribe(new_subscription(scope, "newMessage")).unwrap();

        let err = table
            .subscribe(new_subscription(scope, "newMessage"))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateSubscription { .. }));
        assert_eq!(table.len(), 1);

        // Same name under another scope is fine
        table.subscribe(new_subscription(Uuid::new_v4(), "newMessage")).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn same_name_with_another_kind_is_a_duplicate() {
        let mut table = SubscriptionTable::new(Uuid::new_v4());
        let scope = Uuid::new_v4();
        table.subscribe(new_subscription(scope, "x")).unwrap();

        let mut signal = new_subscription(scope, "x");
        signal.trigger = TriggerDefinition::signal("x");
        let err = table.subscribe(signal).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::DuplicateSubscription { ref trigger, .. } if *trigger == TriggerDefinition::signal("x")
        ));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_frees_the_key() {
        let mut table = SubscriptionTable::new(Uuid::new_v4());
        let scope = Uuid::new_v4();
        let id = table.subscribe(new_subscription(scope, "newMessage")).unwrap();

        assert!(table.unsubscribe(id).is_some());
        assert!(table.unsubscribe(id).is_none());
        assert!(table.is_empty());

        table.subscribe(new_subscription(scope, "newMessage")).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn bulk_removal_covers_scope_and_host() {
        let mut table = SubscriptionTable::new(Uuid::new_v4());
        let scope = Uuid::new_v4();
        let first = new_subscription(scope, "a");
        let host = first.execution_id;
        table.subscribe(first).unwrap();
        table.subscribe(new_subscription(scope, "b")).unwrap();
        table.subscribe(new_subscription(Uuid::new_v4(), "c")).unwrap();

        assert_eq!(table.unsubscribe_all_owned_by(host).len(), 1);
        assert_eq!(table.unsubscribe_all_owned_by(scope).len(), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.find_by_trigger_name("c").len(), 1);
    }
}
