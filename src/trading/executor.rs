//! Execution adapter seam and retry policy
//!
//! The DEX client sits behind [`TradeExecutor`]. [`RetryingExecutor`] wraps any
//! executor with a per-attempt timeout and exponential backoff for transient
//! failures; terminal failures come back on the first attempt.
//! [`CircuitBreaker`] sits on top and stops submitting while the venue keeps
//! failing transiently.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ExecutionConfig;
use crate::error::{ExecutionFailure, FailureKind};
use crate::trading::types::{ExecutionReceipt, TradeIntent};

/// Submits trades and waits for confirmation
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn submit(&self, intent: &TradeIntent) -> Result<ExecutionReceipt, ExecutionFailure>;
}

/// Retry wrapper around an executor
pub struct RetryingExecutor {
    inner: Arc<dyn TradeExecutor>,
    config: ExecutionConfig,
}

impl RetryingExecutor {
    pub fn new(inner: Arc<dyn TradeExecutor>, config: ExecutionConfig) -> Self {
        Self { inner, config }
    }

    /// One attempt, bounded by the submit timeout
    async fn attempt(&self, intent: &TradeIntent) -> Result<ExecutionReceipt, ExecutionFailure> {
        let limit = Duration::from_millis(self.config.submit_timeout_ms);
        match tokio::time::timeout(limit, self.inner.submit(intent)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionFailure::new(
                FailureKind::Timeout,
                format!("no confirmation within {}ms", self.config.submit_timeout_ms),
            )),
        }
    }
}

#[async_trait]
impl TradeExecutor for RetryingExecutor {
    async fn submit(
        &self,
        intent: &TradeIntent,
    ) -> Result<ExecutionReceipt, ExecutionFailure> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.retry_base_delay_ms),
            max_interval: Duration::from_millis(self.config.retry_max_delay_ms),
            // Attempt count bounds the retries, not elapsed time
            max_elapsed_time: None,
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);

        let result = retry(backoff, || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.attempt(intent).await {
                Ok(receipt) => Ok(receipt),
                Err(failure) if failure.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(
                        address = %intent.address,
                        side = %intent.side,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        "Transient execution failure: {}",
                        failure
                    );
                    Err(backoff::Error::transient(failure))
                }
                Err(failure) => Err(backoff::Error::permanent(failure)),
            }
        })
        .await;

        match &result {
            Ok(receipt) => debug!(
                address = %intent.address,
                side = %intent.side,
                signature = %receipt.signature,
                "Execution confirmed"
            ),
            Err(failure) => warn!(
                address = %intent.address,
                side = %intent.side,
                attempts = attempts.load(Ordering::SeqCst),
                "Execution failed terminally: {}",
                failure
            ),
        }

        result
    }
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    /// Submissions fail fast until the recovery timeout passes
    Open,
    /// One trial submission is out
    HalfOpen,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    /// When the breaker opened or the trial started
    since: Instant,
}

/// Circuit breaker around an executor.
///
/// Opens after `breaker_failure_threshold` consecutive transient failures.
/// While open every submission fails fast with [`FailureKind::RpcError`], which
/// callers already treat as retryable. After `breaker_recovery_ms` one trial
/// goes through; its result closes or re-opens the breaker. Terminal failures
/// prove the venue is reachable and count as success here.
pub struct CircuitBreaker {
    inner: Arc<dyn TradeExecutor>,
    threshold: u32,
    recovery: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(inner: Arc<dyn TradeExecutor>, config: &ExecutionConfig) -> Self {
        Self {
            inner,
            threshold: config.breaker_failure_threshold.max(1),
            recovery: Duration::from_millis(config.breaker_recovery_ms),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                since: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Whether a submission may go out now
    fn allow(&self) -> bool {
        let mut state = self.lock();
        match state.state {
            CircuitState::Closed => true,
            // A trial that never reported back (cancelled task) is replaced
            // after another recovery period
            CircuitState::Open | CircuitState::HalfOpen
                if state.since.elapsed() >= self.recovery =>
            {
                state.state = CircuitState::HalfOpen;
                state.since = Instant::now();
                info!("Circuit breaker half-open, sending trial submission");
                true
            }
            CircuitState::Open | CircuitState::HalfOpen => false,
        }
    }

    fn record(&self, result: &Result<ExecutionReceipt, ExecutionFailure>) {
        let mut state = self.lock();
        match result {
            Err(failure) if failure.is_retryable() => {
                state.failures += 1;
                let trial_failed = state.state == CircuitState::HalfOpen;
                let tripped = state.state == CircuitState::Closed && state.failures >= self.threshold;
                if trial_failed || tripped {
                    state.state = CircuitState::Open;
                    state.since = Instant::now();
                    warn!(
                        failures = state.failures,
                        recovery_ms = self.recovery.as_millis() as u64,
                        "Circuit breaker opened: {}",
                        failure
                    );
                }
            }
            _ => {
                if state.state != CircuitState::Closed {
                    info!("Circuit breaker closed");
                }
                state.state = CircuitState::Closed;
                state.failures = 0;
            }
        }
    }
}

#[async_trait]
impl TradeExecutor for CircuitBreaker {
    async fn submit(
        &self,
        intent: &TradeIntent,
    ) -> Result<ExecutionReceipt, ExecutionFailure> {
        if !self.allow() {
            debug!(address = %intent.address, side = %intent.side, "Circuit open, not submitting");
            return Err(ExecutionFailure::new(
                FailureKind::RpcError,
                "circuit breaker open",
            ));
        }

        let result = self.inner.submit(intent).await;
        self.record(&result);
        result
    }
}
