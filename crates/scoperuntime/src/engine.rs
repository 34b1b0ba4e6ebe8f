use crate::definition::ProcessDefinition;
use crate::dispatcher::EventDispatcher;
use crate::lifecycle::ScopeLifecycle;
use crate::query::{ExecutionFilter, SubscriptionFilter};
use crate::registry::DefinitionRegistry;
use crate::state::{self, InstanceState, Transaction};
use crate::subscriptions::EventSubscription;
use crate::tree::Execution;
use chrono::{DateTime, Utc};
use scopecore::{
    EngineError, Entity, EventBus, ExecutionId, Outcome, ProcessInstanceId, ProcessModel,
    RuntimeError, RuntimeEvent, SubscriptionId, TriggerDefinition,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

type InstanceHandle = Arc<Mutex<InstanceState>>;

/// Runtime for deployed process definitions and their running instances
///
/// Each instance is locked on its own, so commands against different
/// instances run concurrently while commands against one instance are
/// serialized. Every command commits completely or not at all.
pub struct ProcessEngine {
    config: EngineConfig,
    registry: RwLock<DefinitionRegistry>,
    instances: RwLock<HashMap<ProcessInstanceId, InstanceHandle>>,
    locator: RwLock<HashMap<ExecutionId, ProcessInstanceId>>,
    history: RwLock<HashMap<ProcessInstanceId, HistoricInstance>>,
    /// Ids of every instance that has ended, kept even without history
    ended: RwLock<HashSet<ProcessInstanceId>>,
    event_bus: Arc<EventBus>,
}

impl ProcessEngine {
    /// Create a new engine with default settings
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a new engine with custom configuration
    pub fn with_config(config: EngineConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            config,
            registry: RwLock::new(DefinitionRegistry::new()),
            instances: RwLock::new(HashMap::new()),
            locator: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
            ended: RwLock::new(HashSet::new()),
            event_bus,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to committed runtime events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<RuntimeEvent> {
        self.event_bus.subscribe()
    }

    /// Validate a model and make it startable under its key
    pub async fn deploy(&self, model: &ProcessModel) -> scopecore::Result<Arc<ProcessDefinition>> {
        let mut registry = self.registry.write().await;
        Ok(registry.deploy(model)?)
    }

    /// Latest deployed version of a definition
    pub async fn definition(&self, key: &str) -> Option<Arc<ProcessDefinition>> {
        self.registry.read().await.latest(key)
    }

    /// Start an instance of the latest version of `key`
    pub async fn start_instance(&self, key: &str) -> scopecore::Result<ProcessInstanceId> {
        let definition = self
            .definition(key)
            .await
            .ok_or_else(|| RuntimeError::NotFound(Entity::Definition(key.to_string())))?;

        let mut state = InstanceState::new(Uuid::new_v4(), definition);
        let (instance_id, journal) =
            state::execute(&mut state, self.config.max_steps_per_command, |tx| {
                ScopeLifecycle::new(tx).start_instance()
            })
            .map_err(|e| {
                tracing::warn!("Starting '{}' failed: {}", key, e);
                e
            })?;

        if !state.is_ended() {
            let mut instances = self.instances.write().await;
            instances.insert(instance_id, Arc::new(Mutex::new(state.clone())));
        }
        self.commit(&state, journal).await;
        Ok(instance_id)
    }

    /// Complete the wait state of a token, e.g. when its task is done
    pub async fn complete_leaf(&self, execution: ExecutionId) -> scopecore::Result<()> {
        let handle = self.handle_for_execution(execution).await?;
        self.run_command(handle, |tx| ScopeLifecycle::new(tx).complete_leaf(execution))
            .await
    }

    /// Deliver a trigger to the subscription reachable from `execution`
    pub async fn deliver(
        &self,
        trigger: &TriggerDefinition,
        execution: ExecutionId,
    ) -> scopecore::Result<SubscriptionId> {
        let handle = self.handle_for_execution(execution).await?;
        self.run_command(handle, |tx| EventDispatcher::new(tx).deliver(trigger, execution))
            .await
    }

    /// Deliver the named message to the subscription reachable from `execution`
    pub async fn message_event_received(
        &self,
        name: &str,
        execution: ExecutionId,
    ) -> scopecore::Result<()> {
        self.deliver(&TriggerDefinition::message(name), execution)
            .await
            .map(|_| ())
    }

    /// Deliver the named message to the one subscription of the instance bearing it
    pub async fn correlate_message(
        &self,
        name: &str,
        instance: ProcessInstanceId,
    ) -> scopecore::Result<SubscriptionId> {
        let trigger = TriggerDefinition::message(name);
        let handle = self.handle_for_instance(instance).await?;
        self.run_command(handle, |tx| EventDispatcher::new(tx).correlate(&trigger))
            .await
    }

    pub async fn suspend_instance(&self, instance: ProcessInstanceId) -> scopecore::Result<()> {
        let handle = self.handle_for_instance(instance).await?;
        self.run_command(handle, |tx| ScopeLifecycle::new(tx).suspend_instance())
            .await
    }

    pub async fn activate_instance(&self, instance: ProcessInstanceId) -> scopecore::Result<()> {
        let handle = self.handle_for_instance(instance).await?;
        self.run_command(handle, |tx| ScopeLifecycle::new(tx).activate_instance())
            .await
    }

    /// Terminate every execution of an instance
    pub async fn cancel_instance(&self, instance: ProcessInstanceId) -> scopecore::Result<()> {
        let handle = self.handle_for_instance(instance).await?;
        self.run_command(handle, |tx| ScopeLifecycle::new(tx).cancel_instance())
            .await
    }

    /// Live executions matching `filter`, instances in start order
    pub async fn executions(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        let mut per_instance = Vec::new();
        for handle in self.handles(filter.process_instance_id).await {
            let state = handle.lock().await;
            per_instance.push((state.started_at(), state.executions(filter)));
        }
        per_instance.sort_by_key(|(started, _)| *started);
        per_instance.into_iter().flat_map(|(_, e)| e).collect()
    }

    /// Event subscriptions matching `filter`, instances in start order
    pub async fn subscriptions(&self, filter: &SubscriptionFilter) -> Vec<EventSubscription> {
        let mut per_instance = Vec::new();
        for handle in self.handles(filter.process_instance_id).await {
            let state = handle.lock().await;
            per_instance.push((state.started_at(), state.event_subscriptions(filter)));
        }
        per_instance.sort_by_key(|(started, _)| *started);
        per_instance.into_iter().flat_map(|(_, s)| s).collect()
    }

    pub async fn count_executions(&self, filter: &ExecutionFilter) -> usize {
        self.executions(filter).await.len()
    }

    pub async fn count_subscriptions(&self, filter: &SubscriptionFilter) -> usize {
        self.subscriptions(filter).await.len()
    }

    /// Exactly one execution matching `filter`, if there is exactly one
    pub async fn single_execution(&self, filter: &ExecutionFilter) -> Option<Execution> {
        let mut found = self.executions(filter).await;
        if found.len() == 1 {
            found.pop()
        } else {
            None
        }
    }

    /// Running instances, in no particular order
    pub async fn instance_ids(&self) -> Vec<ProcessInstanceId> {
        self.instances.read().await.keys().copied().collect()
    }

    /// Snapshot of a running instance's state
    pub async fn process_instance(&self, instance: ProcessInstanceId) -> Option<InstanceState> {
        let handle = self.handles(Some(instance)).await.pop()?;
        let state = handle.lock().await;
        Some(state.clone())
    }

    /// Whether the instance was started here and has since ended
    ///
    /// Unknown ids and instances that are still running are not ended.
    pub async fn is_ended(&self, instance: ProcessInstanceId) -> bool {
        self.ended.read().await.contains(&instance)
    }

    /// Record of an ended instance, when history is retained
    pub async fn historic_instance(&self, instance: ProcessInstanceId) -> Option<HistoricInstance> {
        self.history.read().await.get(&instance).cloned()
    }

    async fn handles(&self, instance: Option<ProcessInstanceId>) -> Vec<InstanceHandle> {
        let instances = self.instances.read().await;
        match instance {
            Some(id) => instances.get(&id).cloned().into_iter().collect(),
            None => instances.values().cloned().collect(),
        }
    }

    async fn handle_for_instance(
        &self,
        instance: ProcessInstanceId,
    ) -> Result<InstanceHandle, RuntimeError> {
        self.instances
            .read()
            .await
            .get(&instance)
            .cloned()
            .ok_or(RuntimeError::NotFound(Entity::ProcessInstance(instance)))
    }

    async fn handle_for_execution(
        &self,
        execution: ExecutionId,
    ) -> Result<InstanceHandle, RuntimeError> {
        let instance = self
            .locator
            .read()
            .await
            .get(&execution)
            .copied()
            .ok_or(RuntimeError::NotFound(Entity::Execution(execution)))?;
        self.handle_for_instance(instance).await
    }

    /// Run one command as a unit of work under the instance lock
    async fn run_command<T>(
        &self,
        handle: InstanceHandle,
        command: impl FnOnce(&mut Transaction) -> Result<T, RuntimeError>,
    ) -> scopecore::Result<T> {
        let mut state = handle.lock().await;
        if state.is_ended() {
            // Ended between lookup and lock
            return Err(RuntimeError::NotFound(Entity::ProcessInstance(state.id())).into());
        }

        match state::execute(&mut state, self.config.max_steps_per_command, command) {
            Ok((value, journal)) => {
                self.commit(&state, journal).await;
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("Command on process instance {} rejected: {}", state.id(), e);
                Err(EngineError::Runtime(e))
            }
        }
    }

    /// Make a committed command visible: locator, instance table, history, events
    async fn commit(&self, state: &InstanceState, journal: Vec<RuntimeEvent>) {
        let instance_id = state.id();
        {
            let mut locator = self.locator.write().await;
            for event in &journal {
                match event {
                    RuntimeEvent::ExecutionCreated { execution_id, .. } => {
                        locator.insert(*execution_id, instance_id);
                    }
                    RuntimeEvent::ExecutionDestroyed { execution_id, .. } => {
                        locator.remove(execution_id);
                    }
                    _ => {}
                }
            }
        }

        if state.is_ended() {
            self.instances.write().await.remove(&instance_id);
            self.ended.write().await.insert(instance_id);

            let outcome = journal
                .iter()
                .find_map(|e| match e {
                    RuntimeEvent::InstanceEnded { outcome, .. } => Some(*outcome),
                    _ => None,
                })
                .unwrap_or(Outcome::Completed);
            tracing::info!("Process instance {} ended ({:?})", instance_id, outcome);

            if self.config.retain_history {
                let definition = state.definition();
                self.history.write().await.insert(
                    instance_id,
                    HistoricInstance {
                        id: instance_id,
                        definition_key: definition.key().to_string(),
                        definition_version: definition.version(),
                        started_at: state.started_at(),
                        ended_at: Utc::now(),
                        outcome,
                    },
                );
            }
        }

        self.event_bus.publish(journal);
    }
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of an instance that has ended
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricInstance {
    pub id: ProcessInstanceId,
    pub definition_key: String,
    pub definition_version: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: Outcome,
}

/// Configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub event_buffer_size: usize,
    /// Token steps one command may take before it is rolled back
    pub max_steps_per_command: usize,
    /// Keep a record of ended instances
    pub retain_history: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            max_steps_per_command: 10_000,
            retain_history: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "max_steps_per_command": 50 }"#).unwrap();
        assert_eq!(config.max_steps_per_command, 50);
        assert_eq!(config.event_buffer_size, 1000);
        assert!(config.retain_history);
    }

    #[tokio::test]
    async fn history_can_be_disabled() {
        let engine = ProcessEngine::with_config(EngineConfig {
            retain_history: false,
            ..EngineConfig::default()
        });
        let mut model = ProcessModel::new("straight");
        model.chain([
            scopecore::NodeSpec::start_event("start"),
            scopecore::NodeSpec::end_event("end"),
        ]);
        engine.deploy(&model).await.unwrap();

        // Runs straight through without waiting
        let instance = engine.start_instance("straight").await.unwrap();
        assert!(engine.is_ended(instance).await);
        assert!(engine.historic_instance(instance).await.is_none());
        assert!(engine.instance_ids().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_instance_is_not_ended() {
        let engine = ProcessEngine::new();
        let mut model = ProcessModel::new("waiting");
        model.chain([
            scopecore::NodeSpec::start_event("start"),
            scopecore::NodeSpec::user_task("task"),
        ]);
        engine.deploy(&model).await.unwrap();

        assert!(!engine.is_ended(Uuid::new_v4()).await);

        let instance = engine.start_instance("waiting").await.unwrap();
        assert!(!engine.is_ended(instance).await);
        engine.cancel_instance(instance).await.unwrap();
        assert!(engine.is_ended(instance).await);
    }
}
