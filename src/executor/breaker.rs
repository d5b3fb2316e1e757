use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_for: Duration,
}

/// Trips after `failure_threshold` consecutive failures and rejects calls for
/// `open_for`; then lets a single trial call through before closing again.
///
/// A trial call whose outcome is never recorded (its future was dropped)
/// holds the half-open slot for at most `open_for`.
#[derive(Clone)]
pub struct CircuitBreaker {
    cfg: BreakerConfig,
    state: Arc<Mutex<BreakerState>>,
}

#[derive(Debug)]
struct BreakerState {
    phase: BreakerPhase,
    consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerPhase {
    Closed,
    Open { until: Instant },
    HalfOpen { trial_until: Instant },
}

impl CircuitBreaker {
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            state: Arc::new(Mutex::new(BreakerState {
                phase: BreakerPhase::Closed,
                consecutive_failures: 0,
            })),
        }
    }

    pub async fn allow_request(&self) -> bool {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        match state.phase {
            BreakerPhase::Closed => true,
            BreakerPhase::Open { until } if now < until => false,
            BreakerPhase::HalfOpen { trial_until } if now < trial_until => false,
            phase => {
                if matches!(phase, BreakerPhase::HalfOpen { .. }) {
                    tracing::debug!(
                        "previous breaker trial call never reported back, admitting another"
                    );
                }
                state.phase = BreakerPhase::HalfOpen {
                    trial_until: now + self.cfg.open_for,
                };
                true
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.phase = BreakerPhase::Closed;
        state.consecutive_failures = 0;
    }

    pub async fn record_failure(&self) {
        let mut state = self.state.lock().await;
        match state.phase {
            BreakerPhase::Closed => {
                state.consecutive_failures += 1;
                if state.consecutive_failures >= self.cfg.failure_threshold.max(1) {
                    tracing::warn!(
                        failures = state.consecutive_failures,
                        open_ms = self.cfg.open_for.as_millis() as u64,
                        "execution service breaker opened"
                    );
                    self.trip(&mut state);
                }
            }
            BreakerPhase::HalfOpen { .. } => self.trip(&mut state),
            BreakerPhase::Open { .. } => {}
        }
    }

    /// True while `allow_request` would refuse a call.
    pub async fn is_open(&self) -> bool {
        let state = self.state.lock().await;
        let now = Instant::now();
        match state.phase {
            BreakerPhase::Closed => false,
            BreakerPhase::Open { until } => now < until,
            BreakerPhase::HalfOpen { trial_until } => now < trial_until,
        }
    }

    fn trip(&self, state: &mut BreakerState) {
        state.phase = BreakerPhase::Open {
            until: Instant::now() + self.cfg.open_for,
        };
        state.consecutive_failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, open_for: Duration) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            open_for,
        })
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let breaker = breaker(2, Duration::from_secs(60));
        breaker.record_failure().await;
        assert!(breaker.allow_request().await);
        breaker.record_failure().await;
        assert!(breaker.is_open().await);
        assert!(!breaker.allow_request().await);
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let breaker = breaker(2, Duration::from_secs(60));
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        assert!(!breaker.is_open().await);
    }

    #[tokio::test]
    async fn half_open_admits_a_single_trial_call() {
        let breaker = breaker(1, Duration::from_millis(30));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(breaker.allow_request().await);
        assert!(!breaker.allow_request().await);
        assert!(breaker.is_open().await);

        breaker.record_success().await;
        assert!(breaker.allow_request().await);
        assert!(breaker.allow_request().await);
        assert!(!breaker.is_open().await);
    }

    #[tokio::test]
    async fn abandoned_trial_call_releases_the_half_open_slot() {
        let breaker = breaker(1, Duration::from_millis(30));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        // The trial call is admitted but its outcome is never recorded.
        assert!(breaker.allow_request().await);
        assert!(!breaker.allow_request().await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!breaker.is_open().await);
        assert!(breaker.allow_request().await);
        breaker.record_success().await;
        assert!(breaker.allow_request().await);
    }

    #[tokio::test]
    async fn failed_trial_call_reopens() {
        let breaker = breaker(1, Duration::from_millis(20));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(breaker.allow_request().await);
        breaker.record_failure().await;
        assert!(breaker.is_open().await);
    }
}
