//! Per-lane circuit breakers.
//!
//! Three states with monotone transitions:
//!
//! | state     | allow?                      | on success            | on failure          |
//! |-----------|-----------------------------|-----------------------|---------------------|
//! | closed    | yes                         | failures := 0         | failures += 1; trip |
//! | open      | after the recovery window   | —                     | —                   |
//! | half-open | yes (probe)                 | count toward close    | re-open, reset timer|

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use noema_config::BrainConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub recovery: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 1,
            recovery: Duration::from_secs(60),
        }
    }
}

impl BreakerConfig {
    pub fn from_brain_config(config: &BrainConfig) -> Self {
        Self {
            failure_threshold: config.breaker_failure_threshold.max(1),
            success_threshold: config.breaker_success_threshold.max(1),
            recovery: Duration::from_secs(config.breaker_recovery_secs),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    probe_successes: u32,
    opened_at: Option<Instant>,
}

/// One breaker, all transitions atomic under its own mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker lock").state
    }

    /// May traffic flow right now? An open breaker transitions to half-open
    /// once the recovery window has elapsed.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.recovery {
                    debug!(lane = %self.name, "breaker half-open (probe permitted)");
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_successes = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.probe_successes += 1;
                if inner.probe_successes >= self.config.success_threshold {
                    debug!(lane = %self.name, "breaker closed after successful probe");
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.probe_successes = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock");
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        lane = %self.name,
                        failures = inner.consecutive_failures,
                        "breaker open"
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                warn!(lane = %self.name, "probe failed — breaker re-opened");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.probe_successes = 0;
            }
            BreakerState::Open => {}
        }
    }
}

/// One breaker per lane name, created on first use.
#[derive(Default)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, lane: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().expect("breaker registry lock").get(lane) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write().expect("breaker registry lock");
        Arc::clone(
            breakers
                .entry(lane.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(lane, self.config))),
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failure: u32, success: u32, recovery_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: failure,
                success_threshold: success,
                recovery: Duration::from_millis(recovery_ms),
            },
        )
    }

    #[test]
    fn trips_open_at_failure_threshold() {
        let b = breaker(3, 1, 60_000);
        assert!(b.allow());
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());
    }

    #[test]
    fn success_resets_failure_streak_while_closed() {
        let b = breaker(3, 1, 60_000);
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed, "streak was reset");
    }

    #[tokio::test]
    async fn trip_then_recover_through_half_open() {
        // failure=2, recovery=100 ms, success=1
        let b = breaker(2, 1, 100);
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(b.allow(), "recovery window elapsed — probe permitted");
        assert_eq!(b.state(), BreakerState::HalfOpen);

        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
        assert!(b.allow());
    }

    #[tokio::test]
    async fn failed_probe_reopens_and_resets_timer() {
        let b = breaker(1, 1, 100);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(b.allow());
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.allow(), "timer restarted");
    }

    #[test]
    fn half_open_needs_enough_successes() {
        let b = breaker(1, 2, 0);
        b.record_failure();
        assert!(b.allow()); // immediately half-open with zero recovery
        b.record_success();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn registry_returns_same_breaker_per_lane() {
        let registry = BreakerRegistry::new(BreakerConfig::default());
        let a = registry.get("fast");
        let b = registry.get("fast");
        let c = registry.get("local");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        a.record_failure();
        a.record_failure();
        a.record_failure();
        assert_eq!(registry.get("fast").state(), BreakerState::Open);
        assert_eq!(registry.get("local").state(), BreakerState::Closed);
    }
}
