//! Debounce timers for bursts of photos.

use super::identity::StateKey;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// One pending timer per conversation. Each `schedule` call restarts the
/// timer, so the callback fires once, `window` after the last photo.
#[derive(Debug)]
pub struct PhotoBatcher {
    window: Duration,
    generation: AtomicU64,
    pending: Arc<DashMap<StateKey, (u64, JoinHandle<()>)>>,
}

impl PhotoBatcher {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            generation: AtomicU64::new(0),
            pending: Arc::new(DashMap::new()),
        }
    }

    pub fn schedule<F, Fut>(&self, key: StateKey, on_quiet: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let pending = Arc::clone(&self.pending);
        let window = self.window;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            // A newer timer may have replaced this one while it slept
            if pending
                .remove_if(&key, |_, (current, _)| *current == generation)
                .is_none()
            {
                return;
            }
            on_quiet().await;
        });

        if let Some((_, previous)) = self.pending.insert(key, (generation, handle)) {
            previous.abort();
            debug!("Photo batch timer for {} restarted", key);
        }
    }

    /// Abort the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&self, key: &StateKey) -> bool {
        match self.pending.remove(key) {
            Some((_, (_, handle))) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_pending(&self, key: &StateKey) -> bool {
        self.pending.contains_key(key)
    }
}
