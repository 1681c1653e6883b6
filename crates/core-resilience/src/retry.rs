//! Retry execution with classified backoff
//!
//! [`RetryExecutor`] wraps an arbitrary fallible async operation. Every
//! sequence is gated by a shared [`CircuitBreaker`], each failure is
//! classified by the [`ErrorClassifier`], and recoverable failures are retried
//! after a per-kind delay that is clamped to `max_delay` and perturbed by
//! jitter. Backoff waits are plain `tokio::time::sleep` calls, so no worker
//! thread is held during a delay.
//!
//! Cancellation is per sequence: each call takes its own
//! [`CancellationToken`]. Cancelling it drops the in-flight attempt or the
//! pending backoff timer of that call only.
//!
//! # Example
//!
//! ```
//! use partysync_core_resilience::{
//!     CircuitBreaker, ErrorClassifier, RetryConfig, RetryExecutor, TransportError,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let executor = RetryExecutor::new(Arc::new(CircuitBreaker::default()), ErrorClassifier::default());
//! let config = RetryConfig::builder()
//!     .max_retries(2)
//!     .initial_delay(Duration::from_millis(1))
//!     .build()
//!     .unwrap();
//!
//! let value = executor
//!     .execute_with_retry("groups.get", &config, &CancellationToken::new(), || async {
//!         Ok::<_, TransportError>(42)
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(value, 42);
//! # }
//! ```

use crate::circuit_breaker::{Admission, CircuitBreaker};
use crate::classifier::ErrorClassifier;
use crate::error::{ErrorKind, ResilienceError, TransportError};
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry policy for one class of operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = exactly one attempt)
    pub max_retries: u32,

    /// Base delay fed to the per-kind backoff
    pub initial_delay: Duration,

    /// Upper bound applied before jitter
    pub max_delay: Duration,

    /// Growth factor for exponential backoff
    pub backoff_multiplier: f64,

    /// Whether delays are randomly perturbed
    pub use_jitter: bool,

    /// Relative jitter range (0.1 = ±10%)
    pub jitter_factor: f64,

    /// Deadline for a single attempt
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_factor: 0.1,
            attempt_timeout: None,
        }
    }
}

impl RetryConfig {
    /// Start building a validated configuration from the defaults
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check the invariants the builder enforces
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier < 1.0 {
            return Err(RetryConfigError::Multiplier(self.backoff_multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(RetryConfigError::Jitter(self.jitter_factor));
        }
        if self.initial_delay > self.max_delay {
            return Err(RetryConfigError::DelayOrder {
                initial: self.initial_delay,
                max: self.max_delay,
            });
        }
        Ok(())
    }
}

/// Invalid retry configuration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RetryConfigError {
    #[error("Backoff multiplier must be at least 1.0, got {0}")]
    Multiplier(f64),

    #[error("Jitter factor must be within [0.0, 1.0], got {0}")]
    Jitter(f64),

    #[error("Initial delay {initial:?} exceeds max delay {max:?}")]
    DelayOrder { initial: Duration, max: Duration },
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Clone)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    /// Enable jitter with the given factor, or disable it with `None`
    pub fn jitter(mut self, factor: Option<f64>) -> Self {
        match factor {
            Some(f) => {
                self.config.use_jitter = true;
                self.config.jitter_factor = f;
            }
            None => self.config.use_jitter = false,
        }
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.attempt_timeout = Some(timeout);
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<RetryConfig, RetryConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Receives one sample per executed attempt
pub trait AttemptObserver: Send + Sync {
    fn observe(&self, endpoint: &str, elapsed: Duration, succeeded: bool);
}

/// Runs operations under a circuit breaker with classified retries
#[derive(Clone)]
pub struct RetryExecutor {
    breaker: Arc<CircuitBreaker>,
    classifier: ErrorClassifier,
    observer: Option<Arc<dyn AttemptObserver>>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("breaker", &self.breaker)
            .field("classifier", &self.classifier)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(breaker: Arc<CircuitBreaker>, classifier: ErrorClassifier) -> Self {
        Self {
            breaker,
            classifier,
            observer: None,
        }
    }

    /// Attach an observer that receives a sample for every attempt
    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The breaker guarding this executor
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Run `op` until it succeeds, fails non-recoverably, exhausts its retry
    /// budget, or `cancel` fires
    ///
    /// At most `config.max_retries + 1` attempts are made. The breaker sees
    /// one outcome per sequence, not per attempt.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        endpoint: &str,
        config: &RetryConfig,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let Some(admission) = self.breaker.admit() else {
            debug!(endpoint, "Circuit open, short-circuiting request");
            return Err(ResilienceError::CircuitOpen);
        };
        let is_probe = admission == Admission::Probe;

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 && !is_probe && self.breaker.is_open() {
                debug!(endpoint, attempt, "Circuit opened during backoff, abandoning retries");
                return Err(ResilienceError::CircuitOpen);
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(is_probe, endpoint)),
                outcome = run_attempt(config.attempt_timeout, &mut op) => outcome,
            };
            let elapsed = started.elapsed();

            let failure = match outcome {
                Ok(value) => {
                    self.breaker.on_success(admission);
                    self.record(endpoint, elapsed, true);
                    return Ok(value);
                }
                Err(failure) => failure,
            };
            self.record(endpoint, elapsed, false);

            let kind = self.classifier.categorize(&failure);
            let attempts = attempt + 1;

            if !self.classifier.is_recoverable(kind) {
                self.breaker.on_failure(admission);
                debug!(endpoint, %kind, error = %failure, "Non-recoverable failure");
                return Err(ResilienceError::Rejected {
                    kind,
                    attempts,
                    source: failure,
                });
            }

            if attempt >= config.max_retries {
                self.breaker.on_failure(admission);
                warn!(endpoint, %kind, attempts, error = %failure, "Retries exhausted");
                return Err(ResilienceError::RetriesExhausted {
                    kind,
                    attempts,
                    source: failure,
                });
            }

            let delay = self.next_delay(kind, attempt, config);
            debug!(
                endpoint,
                %kind,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                "Scheduling retry"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(is_probe, endpoint)),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Spawn a retry sequence on the runtime and return a cancellable handle
    pub fn spawn_with_retry<T, F, Fut>(
        &self,
        endpoint: impl Into<String>,
        config: RetryConfig,
        op: F,
    ) -> Pending<T, ResilienceError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TransportError>> + Send,
    {
        let executor = self.clone();
        let endpoint = endpoint.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            executor
                .execute_with_retry(&endpoint, &config, &token, op)
                .await
        });
        Pending::new(handle, cancel)
    }

    /// Delay before the attempt after `attempt`, clamped then jittered
    fn next_delay(&self, kind: ErrorKind, attempt: u32, config: &RetryConfig) -> Duration {
        let delay = self
            .classifier
            .backoff(kind, attempt, config.initial_delay, config.backoff_multiplier)
            .min(config.max_delay);

        if !config.use_jitter || config.jitter_factor <= 0.0 {
            return delay;
        }
        let spread = config.jitter_factor.min(1.0);
        let jitter = rand::rng().random_range(-spread..=spread);
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter)).unwrap_or(delay)
    }

    fn cancelled(&self, is_probe: bool, endpoint: &str) -> ResilienceError {
        if is_probe {
            self.breaker.abandon_probe();
        }
        debug!(endpoint, "Retry sequence cancelled");
        ResilienceError::Cancelled
    }

    fn record(&self, endpoint: &str, elapsed: Duration, succeeded: bool) {
        if let Some(observer) = &self.observer {
            observer.observe(endpoint, elapsed, succeeded);
        }
    }
}

async fn run_attempt<T, F, Fut>(
    attempt_timeout: Option<Duration>,
    op: &mut F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let attempt = op();
    match attempt_timeout {
        Some(limit) => tokio::time::timeout(limit, attempt).await.unwrap_or_else(|_| {
            Err(TransportError::DeadlineExceeded(format!(
                "attempt exceeded {}ms",
                limit.as_millis()
            )))
        }),
        None => attempt.await,
    }
}

/// Handle to a spawned operation
///
/// Dropping the handle detaches the task; call [`cancel`](Self::cancel) to
/// stop it.
#[derive(Debug)]
pub struct Pending<T, E> {
    handle: JoinHandle<Result<T, E>>,
    cancel: CancellationToken,
}

impl<T, E> Pending<T, E> {
    pub fn new(handle: JoinHandle<Result<T, E>>, cancel: CancellationToken) -> Self {
        Self { handle, cancel }
    }

    /// Stop this operation's in-flight attempt and any pending retry timer
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Token shared with the spawned task
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl<T, E> Pending<T, E>
where
    E: From<ResilienceError>,
{
    /// Wait for the outcome
    ///
    /// A panic inside the task is propagated to the caller.
    pub async fn join(self) -> Result<T, E> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(ResilienceError::Cancelled.into()),
        }
    }
}
