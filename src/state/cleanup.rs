//! Centralized purge of conversational state.

use super::identity::ConversationId;
use super::registry::{AwaitingFlow, FlowStateRegistry};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct CleanupService {
    registry: Arc<FlowStateRegistry>,
}

impl CleanupService {
    pub fn new(registry: Arc<FlowStateRegistry>) -> Self {
        Self { registry }
    }

    /// Remove every entry of `id` from every map and stop its photo timer.
    ///
    /// Idempotent. Returns how many maps held an entry.
    pub fn clear_all(&self, id: &ConversationId) -> usize {
        self.registry.photo_batches.cancel(&id.user_key());

        let cleared = self
            .registry
            .tracked_maps()
            .into_iter()
            .filter(|map| map.delete(id))
            .count();

        if cleared > 0 {
            info!("Cleared {} state entries for {}", cleared, id);
        }
        cleared
    }

    /// Remove the flat awaiting steps of `id`, except those listed in `keep`.
    pub fn clear_awaiting(&self, id: &ConversationId, keep: &[AwaitingFlow]) -> usize {
        let cleared = AwaitingFlow::ALL
            .into_iter()
            .filter(|step| !keep.contains(step))
            .filter(|step| self.registry.awaiting(*step).delete(id))
            .count();

        if cleared > 0 {
            debug!("Superseded {} awaiting steps for {}", cleared, id);
        }
        cleared
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::assignment::AssignmentRecord;
    use crate::flows::vehicle::{RegistrationMode, VehicleRecord};
    use crate::state::{BaseAutosKind, FlowContext, Pending};
    use std::time::Duration;

    fn populated(id: &ConversationId) -> Arc<FlowStateRegistry> {
        let registry = Arc::new(FlowStateRegistry::new(Duration::from_secs(2)));
        for step in AwaitingFlow::ALL {
            registry.awaiting(step).set(id, Pending::Fresh);
        }
        registry
            .vehicles
            .set(id, VehicleRecord::new(RegistrationMode::Manual));
        registry
            .assignments
            .set(id, AssignmentRecord::legacy(1, "ABC123".to_string()));
        registry
            .flow_state
            .save_state(id, FlowContext::BaseAutos(BaseAutosKind::Registration));
        registry
    }

    #[test]
    fn test_clear_all_empties_every_map() {
        let id = ConversationId::new(100, Some(9), Some(7));
        let registry = populated(&id);
        let cleanup = CleanupService::new(Arc::clone(&registry));

        assert_eq!(cleanup.clear_all(&id), AwaitingFlow::COUNT + 3);

        for map in registry.tracked_maps() {
            assert!(!map.has(&id), "{} still holds state", map.name());
        }
        assert_eq!(cleanup.clear_all(&id), 0);
    }

    #[test]
    fn test_clear_all_leaves_other_conversations() {
        let id = ConversationId::new(100, Some(9), Some(7));
        let other = ConversationId::new(100, Some(10), Some(7));
        let registry = populated(&id);
        registry
            .awaiting(AwaitingFlow::SaveData)
            .set(&other, Pending::Fresh);

        CleanupService::new(Arc::clone(&registry)).clear_all(&id);

        assert!(registry.awaiting(AwaitingFlow::SaveData).has(&other));
    }

    #[test]
    fn test_clear_awaiting_keeps_listed_steps() {
        let id = ConversationId::new(1, None, Some(1));
        let registry = populated(&id);
        let cleanup = CleanupService::new(Arc::clone(&registry));

        cleanup.clear_awaiting(&id, &[AwaitingFlow::PaymentData]);

        assert_eq!(registry.active_steps(&id), vec![AwaitingFlow::PaymentData]);
        assert!(registry.vehicles.has(&id));
    }
}
