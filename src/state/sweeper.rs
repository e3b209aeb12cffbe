//! Background expiry of abandoned conversations.

use super::registry::FlowStateRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Drop every entry idle for longer than `ttl`. Returns the number removed.
pub fn sweep_expired(registry: &FlowStateRegistry, ttl: Duration) -> usize {
    let mut removed = 0;

    for map in registry.tracked_maps() {
        let keys = map.purge_idle(ttl);
        if map.name() == registry.vehicles.name() {
            for key in &keys {
                registry.photo_batches.cancel(key);
            }
        }
        removed += keys.len();
    }

    removed
}

pub fn spawn_expiry_sweep(
    registry: Arc<FlowStateRegistry>,
    ttl: Duration,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;

            let removed = sweep_expired(&registry, ttl);
            if removed > 0 {
                info!("🧹 Expired {} idle conversation states", removed);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::vehicle::{RegistrationMode, VehicleRecord};
    use crate::state::{AwaitingFlow, ConversationId, Pending};

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_only_idle_state() {
        let registry = Arc::new(FlowStateRegistry::new(Duration::from_secs(2)));
        let idle = ConversationId::new(1, None, Some(1));
        let busy = ConversationId::new(2, None, Some(2));

        registry
            .awaiting(AwaitingFlow::PaymentData)
            .set(&idle, Pending::Policy("P1".into()));
        registry
            .vehicles
            .set(&idle, VehicleRecord::new(RegistrationMode::Ocr));
        registry.photo_batches.schedule(idle.user_key(), || async {});

        tokio::time::advance(Duration::from_secs(25 * 60)).await;
        registry
            .awaiting(AwaitingFlow::SaveData)
            .set(&busy, Pending::Fresh);
        tokio::time::advance(Duration::from_secs(10 * 60)).await;

        let removed = sweep_expired(&registry, Duration::from_secs(30 * 60));

        assert_eq!(removed, 2);
        assert!(!registry.vehicles.has(&idle));
        assert!(!registry.photo_batches.is_pending(&idle.user_key()));
        assert!(registry.awaiting(AwaitingFlow::SaveData).has(&busy));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_runs_periodically() {
        let registry = Arc::new(FlowStateRegistry::new(Duration::from_secs(2)));
        let id = ConversationId::new(1, None, Some(1));
        registry
            .awaiting(AwaitingFlow::SaveData)
            .set(&id, Pending::Fresh);

        let handle = spawn_expiry_sweep(
            Arc::clone(&registry),
            Duration::from_secs(60),
            Duration::from_secs(30),
        );
        tokio::time::sleep(Duration::from_secs(95)).await;

        assert!(!registry.awaiting(AwaitingFlow::SaveData).has(&id));
        handle.abort();
    }
}
