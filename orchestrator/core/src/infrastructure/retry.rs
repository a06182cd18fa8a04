// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Retry Policy
//!
//! The one retry loop used by every outbound A2A call. Callers supply the
//! operation and a retryability predicate; the policy owns attempt counting,
//! exponential backoff (`initial * 2^(attempt-1)`, capped), the overall time
//! budget and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::node_config::ClientConfig;

/// Why the loop stopped without a result from the operation itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryInterrupted {
    #[error("operation cancelled")]
    Cancelled,

    #[error("time budget of {budget:?} exhausted after {attempts} attempt(s)")]
    DeadlineExceeded { attempts: u32, budget: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Budget for all attempts and the waits between them.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.clamp(1, 10),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms.max(1)),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
            max_elapsed: Duration::from_millis(config.max_elapsed_ms.max(1)),
        }
    }

    /// Delay before the attempt following attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, runs out
    /// of attempts or time, or `cancel` fires. The last operation error is
    /// returned when attempts run out.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
        should_retry: P,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: From<RetryInterrupted> + std::fmt::Display,
    {
        let deadline = Instant::now() + self.max_elapsed;
        let mut attempt = 0;

        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(RetryInterrupted::Cancelled.into());
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(RetryInterrupted::Cancelled.into()),
                r = tokio::time::timeout_at(deadline, op(attempt)) => r,
            };

            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => {
                    return Err(RetryInterrupted::DeadlineExceeded {
                        attempts: attempt,
                        budget: self.max_elapsed,
                    }
                    .into())
                }
            };

            if !should_retry(&err) || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.backoff_for(attempt);
            if Instant::now() + delay >= deadline {
                return Err(err);
            }

            warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable failure, backing off"
            );
            metrics::counter!("courier_outbound_retries_total").increment(1);

            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryInterrupted::Cancelled.into()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
        #[error(transparent)]
        Interrupted(#[from] RetryInterrupted),
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            max_elapsed: Duration::from_secs(5),
        }
    }

    fn retryable(e: &TestError) -> bool {
        matches!(e, TestError::Transient)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(30),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(1600));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(64), Duration::from_secs(5));
    }

    #[test]
    fn test_from_config_clamps_attempts() {
        let config = ClientConfig {
            max_attempts: 0,
            ..ClientConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);

        let config = ClientConfig {
            max_attempts: 50,
            ..ClientConfig::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 10);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = fast_policy(3)
            .run(
                &CancellationToken::new(),
                |_| {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(TestError::Transient)
                        } else {
                            Ok("done")
                        }
                    }
                },
                retryable,
            )
            .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run(
                &CancellationToken::new(),
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Fatal) }
                },
                retryable,
            )
            .await;
        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run(
                &CancellationToken::new(),
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Transient) }
                },
                retryable,
            )
            .await;
        assert_eq!(result, Err(TestError::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retries() {
        let cancel = CancellationToken::new();
        let mut policy = fast_policy(10);
        policy.initial_backoff = Duration::from_secs(1);
        policy.max_backoff = Duration::from_secs(1);

        let trigger = cancel.clone();
        let result: Result<(), _> = policy
            .run(
                &cancel,
                |_| {
                    trigger.cancel();
                    async { Err(TestError::Transient) }
                },
                retryable,
            )
            .await;
        assert_eq!(result, Err(TestError::Interrupted(RetryInterrupted::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_bounds_a_hanging_attempt() {
        let mut policy = fast_policy(3);
        policy.max_elapsed = Duration::from_millis(50);
        let result: Result<(), TestError> = policy
            .run(
                &CancellationToken::new(),
                |_| async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                },
                retryable,
            )
            .await;
        assert!(matches!(
            result,
            Err(TestError::Interrupted(RetryInterrupted::DeadlineExceeded { attempts: 1, .. }))
        ));
    }
}
