//! Exponential backoff for capability calls, plus per-task cancellation.
//!
//! Backoff progress is an explicit [`BackoffState`] value threaded through
//! the retry loop. Cancellation is observed before every attempt, while
//! sleeping between attempts, and after every call returns.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::warn;

use crate::error::CapabilityError;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 4,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Where a retry sequence stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    /// Failed attempts so far.
    pub attempt: u32,
    /// Delay to wait after the next failure.
    pub next_delay: Duration,
}

impl BackoffState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            next_delay: policy.initial_delay.min(policy.max_delay),
        }
    }

    /// Record a failed attempt.
    ///
    /// Returns the delay to wait before the next attempt, or `None` once
    /// `max_attempts` attempts have been made.
    pub fn after_failure(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= policy.max_attempts {
            return None;
        }

        let delay = self.next_delay;
        let grown = Duration::try_from_secs_f64(delay.as_secs_f64() * policy.multiplier)
            .unwrap_or(policy.max_delay);
        self.next_delay = grown.min(policy.max_delay);
        Some(delay)
    }
}

/// External cancellation flag for one task.
#[derive(Debug, Default)]
pub struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark cancelled and wake anything waiting in [`CancelSignal::cancelled`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Why a capability call with backoff gave up.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InvokeError {
    #[error("capability failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: CapabilityError },

    #[error("cancelled")]
    Cancelled,
}

/// Run `op` until it succeeds, the policy is exhausted or `cancel` fires.
///
/// Each attempt is bounded by `call_timeout`; a timeout counts as a
/// `CapabilityError::Timeout`. A result that arrives after cancellation is
/// discarded.
pub async fn call_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    call_timeout: Duration,
    cancel: &CancelSignal,
    mut op: F,
) -> Result<T, InvokeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let mut state = BackoffState::new(policy);

    loop {
        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled);
        }

        let result = match tokio::time::timeout(call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout {
                seconds: call_timeout.as_secs(),
            }),
        };

        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled);
        }

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match state.after_failure(policy) {
            Some(delay) => {
                warn!(
                    attempt = state.attempt,
                    delay_ms = delay.as_millis() as u64,
                    kind = error.kind(),
                    error = %error,
                    "Capability call failed, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(InvokeError::Cancelled),
                }
            }
            None => {
                return Err(InvokeError::Exhausted {
                    attempts: state.attempt,
                    last: error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(4),
            max_attempts,
        }
    }

    #[test]
    fn test_backoff_delays_grow_and_cap() {
        let policy = RetryPolicy::default();
        let mut state = BackoffState::new(&policy);

        assert_eq!(state.after_failure(&policy), Some(Duration::from_millis(500)));
        assert_eq!(state.after_failure(&policy), Some(Duration::from_millis(1000)));
        assert_eq!(state.after_failure(&policy), Some(Duration::from_millis(2000)));
        assert_eq!(state.after_failure(&policy), None);
        assert_eq!(state.attempt, 4);

        let capped = RetryPolicy {
            initial_delay: Duration::from_secs(20),
            max_attempts: 10,
            ..policy
        };
        let mut state = BackoffState::new(&capped);
        state.after_failure(&capped);
        assert_eq!(state.after_failure(&capped), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_no_retry_policy_gives_up_immediately() {
        let policy = RetryPolicy::no_retry();
        let mut state = BackoffState::new(&policy);
        assert_eq!(state.after_failure(&policy), None);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let cancel = CancelSignal::new();
        let result = call_with_backoff(&fast_policy(4), Duration::from_secs(1), &cancel, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(CapabilityError::Transport("reset".into()))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let calls = AtomicU32::new(0);
        let cancel = CancelSignal::new();
        let result: Result<(), _> =
            call_with_backoff(&fast_policy(3), Duration::from_secs(1), &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CapabilityError::RateLimited("429".into()))
            })
            .await;

        assert_eq!(
            result,
            Err(InvokeError::Exhausted {
                attempts: 3,
                last: CapabilityError::RateLimited("429".into()),
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_call_timeout_is_a_capability_error() {
        let result: Result<(), _> = call_with_backoff(
            &RetryPolicy::no_retry(),
            Duration::from_millis(10),
            &CancelSignal::new(),
            || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(InvokeError::Exhausted {
                last: CapabilityError::Timeout { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let cancel = CancelSignal::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);

        let result: Result<(), _> =
            call_with_backoff(&fast_policy(3), Duration::from_secs(1), &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert_eq!(result, Err(InvokeError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff_sleep() {
        let cancel = Arc::new(CancelSignal::new());
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..RetryPolicy::default()
        };

        let trigger = Arc::clone(&cancel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), _> =
            call_with_backoff(&policy, Duration::from_secs(1), &cancel, || async {
                Err(CapabilityError::Transport("down".into()))
            })
            .await;

        assert_eq!(result, Err(InvokeError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_result_after_cancellation_is_discarded() {
        let cancel = CancelSignal::new();
        let result = call_with_backoff(&fast_policy(1), Duration::from_secs(1), &cancel, || async {
            cancel.cancel();
            Ok(42)
        })
        .await;

        assert_eq!(result, Err(InvokeError::Cancelled));
    }
}
