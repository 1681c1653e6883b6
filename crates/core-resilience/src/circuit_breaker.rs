//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a
//! remote dependency keeps failing. It has two stored states:
//! - Closed: Normal operation, requests pass through
//! - Open: Dependency is unhealthy, requests fail immediately
//!
//! Once the cool-down has elapsed an open breaker admits exactly one probe
//! (reported as [`CircuitState::HalfOpen`]). A successful probe closes the
//! circuit, a failed one restarts the cool-down. Outcomes are reported with
//! the [`Admission`] the request was let through under, so a request admitted
//! while the circuit was closed cannot close or re-arm an open circuit when
//! it finishes late.
//!
//! All state lives in atomics so unrelated callers never serialize on a lock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Observable state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately
    Open,
    /// Cool-down elapsed, the next request is let through as a probe
    HalfOpen,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Duration to wait before letting a probe through an open circuit
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Why a request was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The circuit is closed
    Closed,
    /// The circuit is open but cooled down; this caller holds the single probe
    Probe,
}

/// Lock-free circuit breaker
///
/// # Example
/// ```
/// use partysync_core_resilience::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::new(CircuitBreakerConfig {
///     failure_threshold: 2,
///     cooldown: Duration::from_secs(30),
/// });
///
/// breaker.on_failure(Admission::Closed);
/// assert_eq!(breaker.state(), CircuitState::Closed);
/// breaker.on_failure(Admission::Closed);
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(!breaker.allow_request());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive_failures: AtomicU32,
    /// Milliseconds since `epoch` plus one when the circuit opened; 0 = closed
    opened_at: AtomicU64,
    probe_in_flight: AtomicBool,
    epoch: Instant,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: CircuitBreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            consecutive_failures: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            epoch: Instant::now(),
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn now_stamp(&self) -> u64 {
        let elapsed = self.epoch.elapsed().as_millis();
        u64::try_from(elapsed).unwrap_or(u64::MAX - 1) + 1
    }

    /// Time left until an open circuit admits a probe, `None` when closed
    fn remaining_cooldown(&self) -> Option<Duration> {
        let opened = self.opened_at.load(Ordering::Acquire);
        if opened == 0 {
            return None;
        }
        let open_for = Duration::from_millis(self.now_stamp().saturating_sub(opened));
        Some(self.config.cooldown.saturating_sub(open_for))
    }

    /// Decide whether a request may proceed
    ///
    /// A [`Admission::Probe`] must be followed by exactly one of
    /// [`on_success`](Self::on_success), [`on_failure`](Self::on_failure) or
    /// [`abandon_probe`](Self::abandon_probe).
    pub fn admit(&self) -> Option<Admission> {
        match self.remaining_cooldown() {
            None => Some(Admission::Closed),
            Some(left) if !left.is_zero() => None,
            Some(_) => self
                .probe_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| Admission::Probe),
        }
    }

    /// Whether [`admit`](Self::admit) would let a request through right now
    ///
    /// Does not claim the probe slot.
    pub fn allow_request(&self) -> bool {
        match self.remaining_cooldown() {
            None => true,
            Some(left) => left.is_zero() && !self.probe_in_flight.load(Ordering::Acquire),
        }
    }

    /// Record a successful operation admitted as `admission`
    ///
    /// Only the probe may close an open circuit. A closed-admission success
    /// that lands after the circuit opened is ignored.
    pub fn on_success(&self, admission: Admission) {
        match admission {
            Admission::Probe => {
                self.consecutive_failures.store(0, Ordering::Release);
                self.opened_at.store(0, Ordering::Release);
                self.probe_in_flight.store(false, Ordering::Release);
                info!("Circuit breaker closed after successful probe");
            }
            Admission::Closed => {
                if self.is_open() {
                    debug!("Ignoring late success while circuit is open");
                    return;
                }
                self.consecutive_failures.store(0, Ordering::Release);
            }
        }
    }

    /// Record a failed operation admitted as `admission`
    ///
    /// A failed probe restarts the cool-down. A closed-admission failure that
    /// lands after the circuit opened is ignored and leaves any in-flight
    /// probe alone.
    pub fn on_failure(&self, admission: Admission) {
        let now = self.now_stamp();
        if admission == Admission::Probe {
            self.opened_at.store(now, Ordering::Release);
            self.probe_in_flight.store(false, Ordering::Release);
            warn!(
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit breaker probe failed, staying open"
            );
            return;
        }
        if self.is_open() {
            debug!("Ignoring late failure while circuit is open");
            return;
        }

        let failures = self
            .consecutive_failures
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);
        if failures >= self.config.failure_threshold
            && self
                .opened_at
                .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            warn!(
                failures,
                threshold = self.config.failure_threshold,
                "Circuit breaker opened"
            );
        }
    }

    /// Give the probe slot back without reporting an outcome
    pub fn abandon_probe(&self) {
        self.probe_in_flight.store(false, Ordering::Release);
    }

    /// Manually close the circuit and clear the failure count
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at.store(0, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);
        info!("Circuit breaker manually reset");
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        match self.remaining_cooldown() {
            None => CircuitState::Closed,
            Some(left) if left.is_zero() => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    /// Whether requests are currently being short-circuited or probed
    pub fn is_open(&self) -> bool {
        self.opened_at.load(Ordering::Acquire) != 0
    }

    /// Current consecutive failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Diagnostic status line
    pub fn status(&self) -> String {
        match self.remaining_cooldown() {
            None => format!(
                "CLOSED (failures: {}/{})",
                self.consecutive_failures(),
                self.config.failure_threshold
            ),
            Some(left) => format!("OPEN (resets in {}s)", left.as_millis().div_ceil(1000)),
        }
    }
}
