use crate::{Result, TransactionError};
use std::{future::Future, time::Duration};

/// How many times [`retry`] runs a unit of work and how long it waits in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay, attempt `n` waits `backoff * n` before the next one.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

/// Run `unit` again while it fails with a retryable [`TransactionError`] (conflict
/// or lost connection) and attempts remain.
///
/// Each attempt must be a whole unit of work: the coordinator already rolled back
/// the failed one, so running it again starts from a clean state.
///
/// ```ignore
/// let post_id = retry(&RetryPolicy::default(), || {
///     coordinator.run_interactive(|tx| Box::pin(async move { ... }))
/// })
/// .await?;
/// ```
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut unit: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match unit().await {
            Err(error)
                if attempt < policy.max_attempts
                    && TransactionError::of(&error).is_some_and(TransactionError::is_retryable) =>
            {
                log::warn!(
                    "Attempt {attempt} of {} failed, retrying: {error:#}",
                    policy.max_attempts
                );
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cause, Error};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn failure(cause: Cause) -> Error {
        Error::new(TransactionError::Commit {
            cause,
            message: "failed".into(),
        })
    }

    #[tokio::test]
    async fn retries_conflicts() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO);
        let value = retry(&policy, || async {
            if attempts.fetch_add(1, Ordering::Relaxed) < 2 {
                Err(failure(Cause::Conflict))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let result: Result<()> = retry(&policy, || async {
            attempts.fetch_add(1, Ordering::Relaxed);
            Err(failure(Cause::Connection))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn does_not_retry_constraint_violations() {
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry(&RetryPolicy::default(), || async {
            attempts.fetch_add(1, Ordering::Relaxed);
            Err(failure(Cause::Constraint))
        })
        .await;
        let error = result.unwrap_err();
        assert_eq!(
            TransactionError::of(&error).and_then(TransactionError::cause),
            Some(Cause::Constraint)
        );
        assert_eq!(attempts.load(Ordering::Relaxed), 1);
    }
}
