//! Conflict retry for optimistic-concurrency writes against the root

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::Result;

/// Attempts per status transaction, matching client-side conventions for
/// resource-version conflicts.
pub const DEFAULT_RETRY_STEPS: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Run `operation` until it succeeds, fails with a non-conflict error, or
/// exhausts [`DEFAULT_RETRY_STEPS`] attempts. Only HTTP 409 conflicts are
/// retried; the operation is expected to re-read the object each attempt.
pub async fn retry_on_conflict<T, F, Fut>(mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    loop {
        match operation().await {
            Err(err) if err.is_conflict() => {
                attempts += 1;
                if attempts >= DEFAULT_RETRY_STEPS {
                    return Err(err);
                }
                debug!("Retrying on conflict (attempt {attempts}): {err}");
                tokio::time::sleep(DEFAULT_RETRY_DELAY).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn conflict() -> Error {
        Error::KubeError(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code: 409,
        }))
    }

    #[tokio::test]
    async fn test_succeeds_after_conflicts() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(|| async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_conflict(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await;
        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_RETRY_STEPS);
    }

    #[tokio::test]
    async fn test_non_conflict_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_on_conflict(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::ConfigError("bad".to_string()))
        })
        .await;
        assert!(matches!(result, Err(Error::ConfigError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
