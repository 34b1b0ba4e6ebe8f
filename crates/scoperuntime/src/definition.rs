use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use scopecore::{
    EventSubprocessDefinition, ModelError, NodeKey, NodeKind, NodeSpec, ProcessModel,
};
use std::collections::{HashMap, HashSet};

/// Compiled, validated and indexed process model
///
/// Immutable once built; shared between all instances through an `Arc`.
/// The process itself is a scope whose key is the definition key.
#[derive(Debug, Clone)]
pub struct ProcessDefinition {
    key: String,
    version: u32,
    name: Option<String>,
    nodes: HashMap<NodeKey, NodeSpec>,
    outgoing: HashMap<NodeKey, Vec<NodeKey>>,
    incoming: HashMap<NodeKey, usize>,
    start_events: HashMap<NodeKey, NodeKey>,
    event_sub_processes: HashMap<NodeKey, Vec<NodeKey>>,
}

impl ProcessDefinition {
    /// Validate a model and build the lookup tables the runtime needs
    pub fn compile(model: &ProcessModel, version: u32) -> Result<Self, ModelError> {
        if model.key.is_empty() {
            return Err(ModelError::Invalid("process key must not be empty".to_string()));
        }

        let mut nodes = HashMap::new();
        for node in &model.nodes {
            if node.key == model.key || nodes.contains_key(&node.key) {
                return Err(ModelError::DuplicateNode(node.key.clone()));
            }
            nodes.insert(node.key.clone(), node.clone());
        }

        let mut definition = Self {
            key: model.key.clone(),
            version,
            name: model.name.clone(),
            nodes,
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            start_events: HashMap::new(),
            event_sub_processes: HashMap::new(),
        };

        definition.check_scopes()?;
        definition.index_flows(model)?;
        definition.index_scopes()?;
        definition.check_reachability()?;

        Ok(definition)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Key of the scope representing the process itself
    pub fn root_scope(&self) -> &str {
        &self.key
    }

    pub fn kind(&self, key: &str) -> Option<&NodeKind> {
        self.nodes.get(key).map(|n| &n.kind)
    }

    /// Targets of the node's outgoing sequence flows, in model order
    pub fn outgoing(&self, key: &str) -> &[NodeKey] {
        self.outgoing.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn incoming_count(&self, key: &str) -> usize {
        self.incoming.get(key).copied().unwrap_or(0)
    }

    pub fn start_event(&self, scope: &str) -> Option<&str> {
        self.start_events.get(scope).map(String::as_str)
    }

    /// Event sub-processes attached to a scope, in model order
    pub fn event_sub_processes(
        &self,
        scope: &str,
    ) -> impl Iterator<Item = (&str, &EventSubprocessDefinition)> + '_ {
        self.event_sub_processes
            .get(scope)
            .into_iter()
            .flatten()
            .filter_map(move |key| {
                self.event_subprocess(key)
                    .map(|def| (key.as_str(), def))
            })
    }

    pub fn event_subprocess(&self, key: &str) -> Option<&EventSubprocessDefinition> {
        self.kind(key).and_then(NodeKind::event_sub_process)
    }

    fn is_scope_key(&self, key: &str) -> bool {
        key == self.key || self.nodes.get(key).is_some_and(NodeSpec::is_scope)
    }

    fn check_scopes(&self) -> Result<(), ModelError> {
        for node in self.nodes.values() {
            let Some(scope) = node.scope.as_deref() else {
                continue;
            };
            if !self.nodes.contains_key(scope) {
                return Err(ModelError::NodeNotFound(scope.to_string()));
            }
            if !self.is_scope_key(scope) {
                return Err(ModelError::Invalid(format!(
                    "node '{}' is placed in '{}', which is not a scope",
                    node.key, scope
                )));
            }

            // Walk up the containment chain; a repeat means a scope contains itself
            let mut seen = HashSet::new();
            let mut current = Some(node.key.as_str());
            while let Some(key) = current {
                if !seen.insert(key) {
                    return Err(ModelError::Invalid(format!(
                        "scope nesting of '{}' is cyclic",
                        node.key
                    )));
                }
                current = self.nodes.get(key).and_then(|n| n.scope.as_deref());
            }
        }
        Ok(())
    }

    fn index_flows(&mut self, model: &ProcessModel) -> Result<(), ModelError> {
        for flow in &model.flows {
            let source = self
                .nodes
                .get(&flow.source)
                .ok_or_else(|| ModelError::NodeNotFound(flow.source.clone()))?;
            let target = self
                .nodes
                .get(&flow.target)
                .ok_or_else(|| ModelError::NodeNotFound(flow.target.clone()))?;

            let invalid = |reason: &str| ModelError::InvalidFlow {
                flow: flow.id.clone(),
                reason: reason.to_string(),
            };

            if source.scope != target.scope {
                return Err(invalid("source and target are in different scopes"));
            }
            match source.kind {
                NodeKind::EndEvent | NodeKind::TerminateEndEvent => {
                    return Err(invalid("end events have no outgoing flows"));
                }
                NodeKind::EventSubProcess(_) => {
                    return Err(invalid("event sub-processes have no outgoing flows"));
                }
                _ => {}
            }
            match target.kind {
                NodeKind::StartEvent => return Err(invalid("start events have no incoming flows")),
                NodeKind::EventSubProcess(_) => {
                    return Err(invalid("event sub-processes have no incoming flows"));
                }
                _ => {}
            }

            self.outgoing
                .entry(flow.source.clone())
                .or_default()
                .push(flow.target.clone());
            *self.incoming.entry(flow.target.clone()).or_default() += 1;
        }
        Ok(())
    }

    fn index_scopes(&mut self) -> Result<(), ModelError> {
        let mut scopes: Vec<NodeKey> = vec![self.key.clone()];
        scopes.extend(
            self.nodes
                .values()
                .filter(|n| n.is_scope())
                .map(|n| n.key.clone()),
        );

        let mut ordered: Vec<&NodeSpec> = self.nodes.values().collect();
        ordered.sort_by(|a, b| a.key.cmp(&b.key));

        for scope in scopes {
            let members = ordered
                .iter()
                .filter(|n| n.scope.as_deref().unwrap_or(&self.key) == scope);

            let mut starts = Vec::new();
            let mut attached = Vec::new();
            for node in members {
                match node.kind {
                    NodeKind::StartEvent => starts.push(node.key.clone()),
                    NodeKind::EventSubProcess(_) => attached.push(node.key.clone()),
                    _ => {}
                }
            }

            if starts.len() != 1 {
                return Err(ModelError::StartEvent(scope));
            }
            self.start_events.insert(scope.clone(), starts.remove(0));
            if !attached.is_empty() {
                self.event_sub_processes.insert(scope, attached);
            }
        }
        Ok(())
    }

    /// Every flow node must be reachable from its scope's start event
    fn check_reachability(&self) -> Result<(), ModelError> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();

        for key in self.nodes.keys() {
            index.insert(key.as_str(), graph.add_node(key.as_str()));
        }
        for (source, targets) in &self.outgoing {
            for target in targets {
                graph.add_edge(index[source.as_str()], index[target.as_str()], ());
            }
        }

        let mut reached = HashSet::new();
        for start in self.start_events.values() {
            let mut dfs = Dfs::new(&graph, index[start.as_str()]);
            while let Some(idx) = dfs.next(&graph) {
                reached.insert(graph[idx]);
            }
        }

        let mut unreachable: Vec<&NodeSpec> = self
            .nodes
            .values()
            .filter(|n| !matches!(n.kind, NodeKind::EventSubProcess(_)))
            .filter(|n| !reached.contains(n.key.as_str()))
            .collect();
        unreachable.sort_by(|a, b| a.key.cmp(&b.key));

        match unreachable.first() {
            Some(node) => Err(ModelError::Unreachable(node.key.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopecore::EventSubprocessDefinition;

    fn interrupting_model() -> ProcessModel {
        let mut model = ProcessModel::new("process");
        model.chain([
            NodeSpec::start_event("theStart"),
            NodeSpec::user_task("task"),
            NodeSpec::end_event("theEnd"),
        ]);
        model.add_node(NodeSpec::event_sub_process(
            "eventSubProcess",
            EventSubprocessDefinition::message("newMessage"),
        ));
        model.chain([
            NodeSpec::start_event("eventSubProcessStart").within("eventSubProcess"),
            NodeSpec::user_task("eventSubProcessTask").within("eventSubProcess"),
            NodeSpec::end_event("eventSubProcessEnd").within("eventSubProcess"),
        ]);
        model
    }

    #[test]
    fn compiles_scopes_and_attachments() {
        let def = ProcessDefinition::compile(&interrupting_model(), 1).unwrap();

        assert_eq!(def.root_scope(), "process");
        assert_eq!(def.start_event("process"), Some("theStart"));
        assert_eq!(def.start_event("eventSubProcess"), Some("eventSubProcessStart"));
        assert_eq!(def.outgoing("task"), ["theEnd".to_string()]);
        assert!(def.event_subprocess("eventSubProcess").is_some());
        assert!(def.event_subprocess("task").is_none());

        let attached: Vec<_> = def.event_sub_processes("process").map(|(k, _)| k).collect();
        assert_eq!(attached, vec!["eventSubProcess"]);
    }

    #[test]
    fn rejects_flow_across_scopes() {
        let mut model = interrupting_model();
        model.connect("task", "eventSubProcessTask");

        let err = ProcessDefinition::compile(&model, 1).unwrap_err();
        assert!(matches!(err, ModelError::InvalidFlow { .. }));
    }

    #[test]
    fn rejects_scope_without_start_event() {
        let mut model = ProcessModel::new("process");
        model.add_node(NodeSpec::user_task("task"));

        let err = ProcessDefinition::compile(&model, 1).unwrap_err();
        assert_eq!(err, ModelError::StartEvent("process".to_string()));
    }

    #[test]
    fn rejects_unreachable_nodes() {
        let mut model = interrupting_model();
        model.add_node(NodeSpec::user_task("orphan"));

        let err = ProcessDefinition::compile(&model, 1).unwrap_err();
        assert_eq!(err, ModelError::Unreachable("orphan".to_string()));
    }

    #[test]
    fn rejects_node_shadowing_the_process_key() {
        let mut model = interrupting_model();
        model.add_node(NodeSpec::user_task("process"));

        let err = ProcessDefinition::compile(&model, 1).unwrap_err();
        assert_eq!(err, ModelError::DuplicateNode("process".to_string()));
    }

    #[test]
    fn rejects_nodes_placed_in_non_scopes() {
        let mut model = interrupting_model();
        model.add_node(NodeSpec::user_task("nested").within("task"));

        let err = ProcessDefinition::compile(&model, 1).unwrap_err();
        assert!(matches!(err, ModelError::Invalid(_)));
    }
}
