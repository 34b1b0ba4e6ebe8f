use crate::lifecycle::ScopeLifecycle;
use crate::state::Transaction;
use scopecore::{ExecutionId, RuntimeError, SubscriptionId, TriggerDefinition};

/// Routes incoming triggers to the subscription they are meant for
pub struct EventDispatcher<'a> {
    tx: &'a mut Transaction,
}

impl<'a> EventDispatcher<'a> {
    pub fn new(tx: &'a mut Transaction) -> Self {
        Self { tx }
    }

    /// Find the subscription for `trigger` closest to `target`
    ///
    /// Looks at the target itself first, then at each ancestor up to the
    /// root, and stops at the first level with a match.
    pub fn resolve(
        &self,
        trigger: &TriggerDefinition,
        target: ExecutionId,
    ) -> Result<SubscriptionId, RuntimeError> {
        let tree = self.tx.tree();
        tree.require(target)?;

        let candidates = self.tx.subscriptions().find_by_trigger(trigger);
        let path = std::iter::once(target).chain(tree.ancestors(target));
        for level in path {
            let matching: Vec<SubscriptionId> = candidates
                .iter()
                .filter(|s| s.execution_id == level || s.scope_id == level)
                .map(|s| s.id)
                .collect();
            match matching.as_slice() {
                [] => continue,
                [only] => return Ok(*only),
                many => {
                    return Err(RuntimeError::AmbiguousTarget {
                        trigger: trigger.clone(),
                        target,
                        candidates: many.len(),
                    })
                }
            }
        }

        Err(RuntimeError::NoMatchingSubscription {
            trigger: trigger.clone(),
            target,
        })
    }

    /// Deliver a trigger addressed to a specific execution
    pub fn deliver(
        &mut self,
        trigger: &TriggerDefinition,
        target: ExecutionId,
    ) -> Result<SubscriptionId, RuntimeError> {
        let subscription = self.resolve(trigger, target)?;
        tracing::info!("Delivering {} to execution {}", trigger, target);
        ScopeLifecycle::new(&mut *self.tx).trigger_event_subprocess(subscription)?;
        Ok(subscription)
    }

    /// Deliver a trigger to whichever subscription of the instance bears it
    ///
    /// Fails with `AmbiguousTarget` unless exactly one subscription matches.
    pub fn correlate(&mut self, trigger: &TriggerDefinition) -> Result<SubscriptionId, RuntimeError> {
        let target = self.tx.instance_id();
        let candidates: Vec<SubscriptionId> = self
            .tx
            .subscriptions()
            .find_by_trigger(trigger)
            .iter()
            .map(|s| s.id)
            .collect();

        let subscription = match candidates.as_slice() {
            [] => {
                return Err(RuntimeError::NoMatchingSubscription {
                    trigger: trigger.clone(),
                    target,
                })
            }
            [only] => *only,
            many => {
                return Err(RuntimeError::AmbiguousTarget {
                    trigger: trigger.clone(),
                    target,
                    candidates: many.len(),
                })
            }
        };

        tracing::info!("Correlated {} in process instance {}", trigger, target);
        ScopeLifecycle::new(&mut *self.tx).trigger_event_subprocess(subscription)?;
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ProcessDefinition;
    use crate::state::{execute, InstanceState};
    use scopecore::{EventSubprocessDefinition, NodeSpec, ProcessModel};
    use std::sync::Arc;
    use uuid::Uuid;

    /// Sub-process "sub" arms "inner"; the process arms "outer"
    fn nested_state() -> InstanceState {
        let mut model = ProcessModel::new("process");
        model.chain([
            NodeSpec::start_event("start"),
            NodeSpec::sub_process("sub"),
            NodeSpec::end_event("end"),
        ]);
        model.chain([
            NodeSpec::start_event("subStart").within("sub"),
            NodeSpec::user_task("subTask").within("sub"),
            NodeSpec::end_event("subEnd").within("sub"),
        ]);
        for (esp, scope, message) in [("outer", None, "shared"), ("inner", Some("sub"), "shared")] {
            let mut node =
                NodeSpec::event_sub_process(esp, EventSubprocessDefinition::message(message));
            node.scope = scope.map(str::to_string);
            model.add_node(node);
            model.chain([
                NodeSpec::start_event(format!("{esp}Start")).within(esp),
                NodeSpec::user_task(format!("{esp}Task")).within(esp),
            ]);
        }

        let definition = ProcessDefinition::compile(&model, 1).unwrap();
        let mut state = InstanceState::new(Uuid::new_v4(), Arc::new(definition));
        execute(&mut state, 1000, |tx| ScopeLifecycle::new(tx).start_instance()).unwrap();
        state
    }

    fn execution_at(state: &InstanceState, node: &str) -> ExecutionId {
        state.tree().iter().find(|e| e.node == node).unwrap().id
    }

    #[test]
    fn resolves_nearest_scope_first() {
        let mut state = nested_state();
        let sub_task = execution_at(&state, "subTask");
        let sub_scope = execution_at(&state, "sub");
        let trigger = TriggerDefinition::message("shared");

        let (resolved, _) = execute(&mut state, 1000, |tx| {
            EventDispatcher::new(tx).resolve(&trigger, sub_task)
        })
        .unwrap();

        let sub = state.subscriptions().get(resolved).unwrap();
        assert_eq!(sub.scope_id, sub_scope);
        assert_eq!(sub.activity, "inner");
    }

    #[test]
    fn correlate_rejects_ambiguous_names() {
        let mut state = nested_state();
        let before = state.tree().len();
        let trigger = TriggerDefinition::message("shared");

        let err = execute(&mut state, 1000, |tx| EventDispatcher::new(tx).correlate(&trigger))
            .unwrap_err();

        assert!(matches!(err, RuntimeError::AmbiguousTarget { candidates: 2, .. }));
        assert_eq!(state.tree().len(), before);
    }

    #[test]
    fn unknown_trigger_has_no_match() {
        let mut state = nested_state();
        let root = state.id();
        let trigger = TriggerDefinition::message("unknown");

        let err = execute(&mut state, 1000, |tx| EventDispatcher::new(tx).deliver(&trigger, root))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::NoMatchingSubscription { .. }));
    }
}
