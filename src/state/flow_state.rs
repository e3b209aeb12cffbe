//! Per-conversation context that outlives a single awaiting step.

use super::identity::{ConversationId, KeyScope};
use super::map::{StateMap, TrackedState};
use std::collections::HashMap;

/// What a piece of shared context is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowEntity {
    /// The policy the user last opened with `/get`
    PolicyContext,
    /// Umbrella marker while a Base de Autos flow runs
    BaseAutos,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BaseAutosKind {
    Registration,
    Assignment,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowContext {
    OpenPolicy { number: String },
    BaseAutos(BaseAutosKind),
}

impl FlowContext {
    pub fn entity(&self) -> FlowEntity {
        match self {
            FlowContext::OpenPolicy { .. } => FlowEntity::PolicyContext,
            FlowContext::BaseAutos(_) => FlowEntity::BaseAutos,
        }
    }
}

/// Holds at most one context per entity per conversation.
#[derive(Debug)]
pub struct FlowStateManager {
    states: StateMap<HashMap<FlowEntity, FlowContext>>,
}

impl Default for FlowStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowStateManager {
    pub fn new() -> Self {
        Self {
            states: StateMap::new("flow_state", KeyScope::User),
        }
    }

    pub fn save_state(&self, id: &ConversationId, context: FlowContext) {
        let entity = context.entity();
        let stored = self.states.update(id, |contexts| {
            contexts.insert(entity, context.clone());
        });
        if stored.is_none() {
            self.states.set(id, HashMap::from([(entity, context)]));
        }
    }

    pub fn get_state(&self, id: &ConversationId, entity: FlowEntity) -> Option<FlowContext> {
        self.states
            .get(id)
            .and_then(|contexts| contexts.get(&entity).cloned())
    }

    pub fn has_state(&self, id: &ConversationId, entity: FlowEntity) -> bool {
        self.get_state(id, entity).is_some()
    }

    /// Drop one entity's context. Returns whether it existed.
    pub fn clear_state(&self, id: &ConversationId, entity: FlowEntity) -> bool {
        let removed = self
            .states
            .update(id, |contexts| contexts.remove(&entity).is_some())
            .unwrap_or(false);

        let now_empty = self
            .states
            .get(id)
            .is_some_and(|contexts| contexts.is_empty());
        if now_empty {
            self.states.delete(id);
        }

        removed
    }

    /// Policy number of the policy currently open in this conversation.
    pub fn open_policy(&self, id: &ConversationId) -> Option<String> {
        match self.get_state(id, FlowEntity::PolicyContext)? {
            FlowContext::OpenPolicy { number } => Some(number),
            FlowContext::BaseAutos(_) => None,
        }
    }

    pub fn tracked(&self) -> &dyn TrackedState {
        &self.states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entities_are_independent() {
        let manager = FlowStateManager::new();
        let id = ConversationId::new(10, Some(4), Some(1));

        manager.save_state(
            &id,
            FlowContext::OpenPolicy {
                number: "ABC123".to_string(),
            },
        );
        manager.save_state(&id, FlowContext::BaseAutos(BaseAutosKind::Registration));

        assert_eq!(manager.open_policy(&id).as_deref(), Some("ABC123"));
        assert!(manager.clear_state(&id, FlowEntity::BaseAutos));
        assert!(!manager.has_state(&id, FlowEntity::BaseAutos));
        assert!(manager.has_state(&id, FlowEntity::PolicyContext));
    }

    #[test]
    fn test_last_entity_cleared_removes_entry() {
        let manager = FlowStateManager::new();
        let id = ConversationId::new(10, None, Some(1));

        manager.save_state(&id, FlowContext::BaseAutos(BaseAutosKind::Assignment));
        manager.clear_state(&id, FlowEntity::BaseAutos);

        assert!(!manager.tracked().has(&id));
        assert!(!manager.clear_state(&id, FlowEntity::BaseAutos));
    }

    #[test]
    fn test_threads_do_not_share_context() {
        let manager = FlowStateManager::new();
        let topic_a = ConversationId::new(10, Some(1), Some(1));
        let topic_b = ConversationId::new(10, Some(2), Some(1));

        manager.save_state(
            &topic_a,
            FlowContext::OpenPolicy {
                number: "X1".to_string(),
            },
        );

        assert_eq!(manager.open_policy(&topic_b), None);
    }
}
