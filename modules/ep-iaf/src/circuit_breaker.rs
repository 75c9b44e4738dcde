use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ep_common::CoreError;
use uuid::Uuid;

/// Three-state fault isolator, one instance per `connection_id` (§4.2,
/// §5 "shared resource policy" — state transitions under a mutex, reads
/// may be lock-free; we keep both behind the same mutex since the state
/// machine only has a handful of fields and contention is not expected to
/// be the bottleneck for this core's call volume).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
        }
    }
}

/// A single connection's breaker (§4.2 state machine, §8 "circuit-breaker
/// monotonicity" invariant).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.transition_if_timed_out(&mut inner);
        inner.state
    }

    fn transition_if_timed_out(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                }
            }
        }
    }

    /// Returns `Ok(())` if a call may proceed, `Err(CircuitOpen)` if the
    /// breaker is open and the caller must fail fast without invoking the
    /// adapter (§4.2 "In open state, calls fail fast").
    pub fn allow_call(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.transition_if_timed_out(&mut inner);
        match inner.state {
            BreakerState::Open => {
                let remaining = inner
                    .opened_at
                    .map(|t| self.config.timeout.saturating_sub(t.elapsed()))
                    .unwrap_or(self.config.timeout);
                Err(CoreError::CircuitOpen {
                    retry_after_secs: remaining.as_secs(),
                })
            }
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
        }
    }

    /// Record a successful call (§4.2: resets failure count in closed
    /// state; in half_open, counts toward `success_threshold` before
    /// closing).
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.transition_if_timed_out(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call. Any failure in half_open reopens the breaker
    /// and resets its timer (§4.2).
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        self.transition_if_timed_out(&mut inner);
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
            }
            BreakerState::Open => {}
        }
    }
}

/// Per-`connection_id` breaker registry. Breakers are created lazily on
/// first use and live for the process lifetime, matching the adapter
/// instance cache (§5).
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<BTreeMap<Uuid, std::sync::Arc<CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(BTreeMap::new()),
            config,
        }
    }

    pub fn for_connection(&self, connection_id: Uuid) -> std::sync::Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker registry mutex poisoned");
        breakers
            .entry(connection_id)
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(self.config)))
            .clone()
    }
}
