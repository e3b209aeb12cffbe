//! Failure counter that stops calling a collaborator that keeps failing.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BreakerState {
    failures: u32,
    last_failure: Option<Instant>,
    /// A half-open trial call is in flight
    probing: bool,
}

/// Opens after `threshold` consecutive failures and stays open for `reset_after`.
/// After that a single trial call is let through. Its success closes the
/// circuit, its failure opens it again for another `reset_after`.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<BreakerState>,
    threshold: u32,
    reset_after: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, reset_after: Duration) -> Self {
        Self {
            state: Mutex::new(BreakerState::default()),
            threshold: threshold.max(1),
            reset_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_open(&self) -> bool {
        let mut state = self.lock();
        if state.failures < self.threshold {
            return false;
        }
        let cooling = state
            .last_failure
            .is_some_and(|at| at.elapsed() < self.reset_after);
        if cooling || state.probing {
            return true;
        }
        state.probing = true;
        false
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.failures = state.failures.saturating_add(1);
        state.last_failure = Some(Instant::now());
        state.probing = false;
    }

    pub fn record_success(&self) {
        *self.lock() = BreakerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));

        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn test_success_closes() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_success();

        assert!(!breaker.is_open());
    }

    #[test]
    fn test_half_open_admits_a_single_trial() {
        let breaker = CircuitBreaker::new(1, Duration::ZERO);
        breaker.record_failure();

        assert!(!breaker.is_open());
        assert!(breaker.is_open());

        breaker.record_success();
        assert!(!breaker.is_open());
        assert!(!breaker.is_open());
    }

    #[test]
    fn test_failed_trial_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(20));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(30));

        assert!(!breaker.is_open());
        breaker.record_failure();

        assert!(breaker.is_open());
    }
}
