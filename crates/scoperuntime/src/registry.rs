use crate::definition::ProcessDefinition;
use scopecore::{ModelError, ProcessModel};
use std::collections::HashMap;
use std::sync::Arc;

/// Deployed process definitions, every version kept
pub struct DefinitionRegistry {
    definitions: HashMap<String, Vec<Arc<ProcessDefinition>>>,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
        }
    }

    /// Compile a model and register it as the next version of its key
    pub fn deploy(&mut self, model: &ProcessModel) -> Result<Arc<ProcessDefinition>, ModelError> {
        let version = self.definitions.get(&model.key).map_or(0, Vec::len) as u32 + 1;
        let definition = Arc::new(ProcessDefinition::compile(model, version)?);

        tracing::info!("Deployed process definition '{}' v{}", model.key, version);
        self.definitions
            .entry(model.key.clone())
            .or_default()
            .push(Arc::clone(&definition));
        Ok(definition)
    }

    /// Most recent version of a definition
    pub fn latest(&self, key: &str) -> Option<Arc<ProcessDefinition>> {
        self.definitions.get(key).and_then(|v| v.last()).cloned()
    }

}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
