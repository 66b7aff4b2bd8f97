//! Bounded retry-poll loops.
//!
//! Long-running external effects are waited for on a fixed interval up
//! to either an attempt ceiling or a wall-clock ceiling, after which
//! the enclosing operation fails with a timeout. There is no
//! cooperative cancellation; only the waiting is interruptible.

use crate::error::{Result, StoreError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Retry budget, configurable per call site.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Fixed interval between attempts.
    pub interval: Duration,

    /// Attempt ceiling.
    pub max_attempts: u32,

    /// Wall-clock ceiling.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
            max_elapsed: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// A tight policy for tests and in-process waits.
    pub fn fast() -> Self {
        Self {
            interval: Duration::from_millis(10),
            max_attempts: 20,
            max_elapsed: Duration::from_secs(1),
        }
    }
}

/// Poll `attempt` until it yields a value, an error, or the budget runs
/// out. `Ok(None)` means "not ready yet, try again".
pub async fn retry_until<T, F, Fut>(policy: &RetryPolicy, what: &str, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let started = Instant::now();
    for round in 0..policy.max_attempts {
        if let Some(value) = attempt().await? {
            return Ok(value);
        }
        if started.elapsed() + policy.interval > policy.max_elapsed {
            tracing::warn!(what, round, "retry loop exhausted its wall-clock budget");
            return Err(StoreError::LoopTimeout(what.to_string()));
        }
        tokio::time::sleep(policy.interval).await;
    }
    tracing::warn!(what, attempts = policy.max_attempts, "retry loop exhausted its attempts");
    Err(StoreError::LoopTimeout(what.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_first_ready_value() {
        let calls = AtomicU32::new(0);
        let value = retry_until(&RetryPolicy::fast(), "counting", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok(if n >= 2 { Some(n) } else { None })
        })
        .await
        .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn exceeding_attempts_is_a_loop_timeout() {
        let policy = RetryPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 3,
            max_elapsed: Duration::from_secs(10),
        };
        let err = retry_until::<(), _, _>(&policy, "never", || async { Ok(None) })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LoopTimeout(_)));
    }

    #[tokio::test]
    async fn inner_errors_abort_immediately() {
        let calls = AtomicU32::new(0);
        let err = retry_until::<(), _, _>(&RetryPolicy::fast(), "failing", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Backend("boom".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
