use serde::{Deserialize, Serialize};

/// Key of a node inside a process model (e.g. "task", "eventSubProcess")
pub type NodeKey = String;

/// Complete process model as authored, before compilation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessModel {
    pub key: String,
    pub name: Option<String>,
    pub nodes: Vec<NodeSpec>,
    pub flows: Vec<SequenceFlow>,
}

impl ProcessModel {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            nodes: Vec::new(),
            flows: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeKey {
        let key = node.key.clone();
        self.nodes.push(node);
        key
    }

    /// Add a sequence flow between two nodes of the same scope
    pub fn connect(&mut self, source: impl Into<String>, target: impl Into<String>) {
        let source = source.into();
        let target = target.into();
        let id = format!("flow_{}_{}", source, target);
        self.flows.push(SequenceFlow { id, source, target });
    }

    /// Add nodes and chain them with sequence flows in the given order
    pub fn chain(&mut self, nodes: impl IntoIterator<Item = NodeSpec>) {
        let mut previous: Option<NodeKey> = None;
        for node in nodes {
            let key = self.add_node(node);
            if let Some(prev) = previous.take() {
                self.connect(prev, key.clone());
            }
            previous = Some(key);
        }
    }

    pub fn find_node(&self, key: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.key == key)
    }
}

/// Node specification in a process model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub key: NodeKey,
    pub kind: NodeKind,
    pub name: Option<String>,
    /// Containing scope; `None` places the node directly in the process
    pub scope: Option<NodeKey>,
}

impl NodeSpec {
    pub fn new(key: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            key: key.into(),
            kind,
            name: None,
            scope: None,
        }
    }

    pub fn start_event(key: impl Into<String>) -> Self {
        Self::new(key, NodeKind::StartEvent)
    }

    pub fn end_event(key: impl Into<String>) -> Self {
        Self::new(key, NodeKind::EndEvent)
    }

    pub fn terminate_end_event(key: impl Into<String>) -> Self {
        Self::new(key, NodeKind::TerminateEndEvent)
    }

    pub fn user_task(key: impl Into<String>) -> Self {
        Self::new(key, NodeKind::UserTask)
    }

    pub fn parallel_gateway(key: impl Into<String>) -> Self {
        Self::new(key, NodeKind::ParallelGateway)
    }

    pub fn sub_process(key: impl Into<String>) -> Self {
        Self::new(key, NodeKind::SubProcess)
    }

    pub fn event_sub_process(key: impl Into<String>, definition: EventSubprocessDefinition) -> Self {
        Self::new(key, NodeKind::EventSubProcess(definition))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn within(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn is_scope(&self) -> bool {
        self.kind.is_scope()
    }
}

/// Kinds of nodes the runtime knows how to drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    StartEvent,
    EndEvent,
    TerminateEndEvent,
    UserTask,
    ParallelGateway,
    SubProcess,
    EventSubProcess(EventSubprocessDefinition),
}

impl NodeKind {
    /// Whether the node contains other nodes
    pub fn is_scope(&self) -> bool {
        matches!(self, NodeKind::SubProcess | NodeKind::EventSubProcess(_))
    }

    /// Whether a token stops here until completed from outside
    pub fn is_wait_state(&self) -> bool {
        matches!(self, NodeKind::UserTask)
    }

    pub fn event_sub_process(&self) -> Option<&EventSubprocessDefinition> {
        match self {
            NodeKind::EventSubProcess(def) => Some(def),
            _ => None,
        }
    }
}

/// Sequence flow between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceFlow {
    pub id: String,
    pub source: NodeKey,
    pub target: NodeKey,
}

/// Event sub-process attached to its containing scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubprocessDefinition {
    pub trigger: TriggerDefinition,
    pub interrupting: bool,
    #[serde(default)]
    pub policy: RetriggerPolicy,
}

impl EventSubprocessDefinition {
    /// Interrupting event sub-process started by the named message
    pub fn message(name: impl Into<String>) -> Self {
        Self {
            trigger: TriggerDefinition::message(name),
            interrupting: true,
            policy: RetriggerPolicy::default(),
        }
    }

    pub fn non_interrupting(mut self) -> Self {
        self.interrupting = false;
        self
    }

    pub fn with_policy(mut self, policy: RetriggerPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// What a non-interrupting trigger does with the subscription that fired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetriggerPolicy {
    /// The subscription is consumed: one instance per armed scope
    #[default]
    Consume,
    /// The subscription stays armed and may start further concurrent instances
    Persist,
}

/// Trigger an event sub-process listens for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub kind: TriggerKind,
    pub name: String,
}

impl TriggerDefinition {
    pub fn message(name: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Message,
            name: name.into(),
        }
    }

    pub fn signal(name: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::Signal,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TriggerDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TriggerKind {
    Message,
    Signal,
    Timer,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TriggerKind::Message => "message",
            TriggerKind::Signal => "signal",
            TriggerKind::Timer => "timer",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_connects_nodes_in_order() {
        let mut model = ProcessModel::new("process");
        model.chain([
            NodeSpec::start_event("start"),
            NodeSpec::user_task("task"),
            NodeSpec::end_event("end"),
        ]);

        assert_eq!(model.nodes.len(), 3);
        let pairs: Vec<_> = model
            .flows
            .iter()
            .map(|f| (f.source.as_str(), f.target.as_str()))
            .collect();
        assert_eq!(pairs, vec![("start", "task"), ("task", "end")]);
    }

    #[test]
    fn event_sub_process_defaults_to_interrupting_consume() {
        let def = EventSubprocessDefinition::message("newMessage");
        assert!(def.interrupting);
        assert_eq!(def.policy, RetriggerPolicy::Consume);

        let def = def.non_interrupting();
        assert!(!def.interrupting);
    }

    #[test]
    fn model_round_trips_through_json() {
        let mut model = ProcessModel::new("process");
        model.add_node(NodeSpec::event_sub_process(
            "esp",
            EventSubprocessDefinition::message("newMessage").non_interrupting(),
        ));

        let json = serde_json::to_string(&model).unwrap();
        let back: ProcessModel = serde_json::from_str(&json).unwrap();
        let node = back.find_node("esp").unwrap();
        let def = node.kind.event_sub_process().unwrap();
        assert_eq!(def.trigger, TriggerDefinition::message("newMessage"));
        assert!(!def.interrupting);
    }
}
