use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ExecutionId = Uuid;
pub type SubscriptionId = Uuid;

/// A process instance is identified by its root execution
pub type ProcessInstanceId = Uuid;

/// Lifecycle of a single execution
///
/// `Completed` and `Terminated` are absorbing: once an execution reaches
/// either, it is a tombstone and never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionState {
    Created,
    Active,
    Suspended,
    Completed,
    Terminated,
}

impl ExecutionState {
    pub fn is_ended(self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Terminated)
    }

    pub fn is_live(self) -> bool {
        !self.is_ended()
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        match (self, next) {
            (Completed | Terminated, _) => false,
            (Created, Active) => true,
            (Active, Suspended) | (Suspended, Active) => true,
            (_, Completed | Terminated) => true,
            _ => false,
        }
    }
}

/// Why an execution exists in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionRole {
    /// The process instance itself
    Root,
    /// Flow token positioned at a flow node
    Token,
    /// Embedded sub-process
    Scope,
    /// Running event sub-process body
    EventScope,
    /// Hosts the subscription arming one event sub-process
    Listener,
}

impl ExecutionRole {
    pub fn is_scope(self) -> bool {
        !matches!(self, ExecutionRole::Token)
    }
}

/// How an execution left the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Completed,
    Terminated,
}

impl From<Outcome> for ExecutionState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => ExecutionState::Completed,
            Outcome::Terminated => ExecutionState::Terminated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ended_states_are_absorbing() {
        for end in [ExecutionState::Completed, ExecutionState::Terminated] {
            for next in [
                ExecutionState::Created,
                ExecutionState::Active,
                ExecutionState::Suspended,
                ExecutionState::Completed,
                ExecutionState::Terminated,
            ] {
                assert!(!end.can_transition_to(next));
            }
        }
    }

    #[test]
    fn suspension_round_trips() {
        assert!(ExecutionState::Active.can_transition_to(ExecutionState::Suspended));
        assert!(ExecutionState::Suspended.can_transition_to(ExecutionState::Active));
        assert!(!ExecutionState::Created.can_transition_to(ExecutionState::Suspended));
    }
}
