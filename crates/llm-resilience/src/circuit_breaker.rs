//! Circuit breaker: `{Closed, Open, HalfOpen}` state machine guarding tool execution.

use llm_core::Error;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Requests flow normally; failures accumulate toward `threshold`.
    Closed = 0,
    /// All calls rejected until `reset_timeout` elapses.
    Open = 1,
    /// A limited number of probe calls are allowed through to test recovery.
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// Circuit breaker configuration (spec §4.1).
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub threshold: u32,
    /// Time the circuit stays open before allowing a half-open probe.
    pub reset_timeout: Duration,
    /// Probe calls permitted while half-open; exceeding the quota behaves as `Open`.
    pub max_half_open_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            reset_timeout: Duration::from_secs(30),
            max_half_open_calls: 1,
        }
    }
}

/// Per-provider (or per-tool) circuit breaker.
///
/// `state()` is a pure read: it never mutates state as a side effect of inspection (Open
/// Question 3). Callers that want the Open→HalfOpen transition must call [`Self::try_acquire`],
/// which is the sole side-effecting entry point.
pub struct CircuitBreaker {
    id: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    failure_count: AtomicU32,
    half_open_probes_issued: AtomicU32,
    opened_at_ms: AtomicU64,
    transition_lock: RwLock<()>,
}

impl CircuitBreaker {
    /// Build a circuit breaker for `id` (a provider or tool name).
    #[must_use]
    pub fn new(id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            id: id.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed as u8),
            failure_count: AtomicU32::new(0),
            half_open_probes_issued: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            transition_lock: RwLock::new(()),
        }
    }

    /// Build a circuit breaker with default configuration.
    #[must_use]
    pub fn with_defaults(id: impl Into<String>) -> Self {
        Self::new(id, CircuitBreakerConfig::default())
    }

    /// Identifier this breaker guards.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Pure read of the current state. Does not transition Open → `HalfOpen` even if
    /// `reset_timeout` has elapsed — call [`Self::try_acquire`] for that.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Side-effecting admission check. `Closed` always admits. `Open` admits only once
    /// `reset_timeout` has elapsed, at which point it transitions to `HalfOpen` and counts this
    /// call against the probe quota. `HalfOpen` admits up to `max_half_open_calls`; beyond that
    /// it behaves as `Open`.
    ///
    /// # Errors
    /// Returns [`Error::CircuitOpen`] when the call must be rejected.
    pub fn try_acquire(&self) -> Result<(), Error> {
        match self.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                let issued = self.half_open_probes_issued.fetch_add(1, Ordering::AcqRel) + 1;
                if issued <= self.config.max_half_open_calls {
                    Ok(())
                } else {
                    Err(Error::CircuitOpen)
                }
            }
            CircuitState::Open => {
                if self.reset_timeout_elapsed() {
                    self.transition_to_half_open();
                    self.half_open_probes_issued.store(1, Ordering::Release);
                    Ok(())
                } else {
                    Err(Error::CircuitOpen)
                }
            }
        }
    }

    /// Record a successful call. Closes the circuit if `HalfOpen`; clears the failure counter
    /// if `Closed`.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => self.failure_count.store(0, Ordering::Relaxed),
            CircuitState::HalfOpen => self.transition_to_closed(),
            CircuitState::Open => {}
        }
    }

    /// Record a failed call, advancing per the state rules.
    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.threshold {
                    self.transition_to_open();
                }
            }
            CircuitState::HalfOpen => self.transition_to_open(),
            CircuitState::Open => {}
        }
    }

    fn reset_timeout_elapsed(&self) -> bool {
        let opened_at = self.opened_at_ms.load(Ordering::Acquire);
        if opened_at == 0 {
            return false;
        }
        now_ms().saturating_sub(opened_at) >= self.config.reset_timeout.as_millis() as u64
    }

    fn transition_to_open(&self) {
        let _guard = self.transition_lock.write();
        let prev = self.state.swap(CircuitState::Open as u8, Ordering::AcqRel);
        self.opened_at_ms.store(now_ms(), Ordering::Release);
        self.half_open_probes_issued.store(0, Ordering::Relaxed);
        if prev != CircuitState::Open as u8 {
            warn!(breaker = %self.id, "circuit breaker opened");
        }
    }

    fn transition_to_half_open(&self) {
        let _guard = self.transition_lock.write();
        self.state.store(CircuitState::HalfOpen as u8, Ordering::AcqRel);
        info!(breaker = %self.id, "circuit breaker half-open, probing");
    }

    fn transition_to_closed(&self) {
        let _guard = self.transition_lock.write();
        self.state.store(CircuitState::Closed as u8, Ordering::AcqRel);
        self.failure_count.store(0, Ordering::Relaxed);
        self.half_open_probes_issued.store(0, Ordering::Relaxed);
        self.opened_at_ms.store(0, Ordering::Release);
        info!(breaker = %self.id, "circuit breaker closed");
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_admits_until_threshold() {
        let cb = CircuitBreaker::new(
            "t",
            CircuitBreakerConfig {
                threshold: 3,
                ..Default::default()
            },
        );
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_ok());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn state_is_pure_and_does_not_transition() {
        let cb = CircuitBreaker::new(
            "t",
            CircuitBreakerConfig {
                threshold: 1,
                reset_timeout: Duration::from_millis(5),
                ..Default::default()
            },
        );
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(20));
        // state() alone must not flip Open -> HalfOpen.
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn try_acquire_transitions_to_half_open_after_timeout() {
        let cb = CircuitBreaker::new(
            "t",
            CircuitBreakerConfig {
                threshold: 1,
                reset_timeout: Duration::from_millis(10),
                max_half_open_calls: 1,
            },
        );
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // probe quota is exhausted
        assert!(cb.try_acquire().is_err());
    }

    #[test]
    fn half_open_success_closes_half_open_failure_reopens() {
        let cb = CircuitBreaker::new(
            "t",
            CircuitBreakerConfig {
                threshold: 1,
                reset_timeout: Duration::from_millis(5),
                max_half_open_calls: 1,
            },
        );
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.try_acquire().is_ok());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(cb.try_acquire().is_ok());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn scenario_breaker_trip_and_recovery() {
        // Concrete scenario 4: threshold=3, resetTimeout=100ms.
        let cb = CircuitBreaker::new(
            "provider",
            CircuitBreakerConfig {
                threshold: 3,
                reset_timeout: Duration::from_millis(100),
                max_half_open_calls: 1,
            },
        );
        cb.record_failure();
        cb.record_failure();
        cb.record_failure();
        assert!(cb.try_acquire().is_err());

        std::thread::sleep(Duration::from_millis(150));
        assert!(cb.try_acquire().is_ok());
        cb.record_success();
        assert!(cb.try_acquire().is_ok());
    }
}
