//! Retry-once policy for backend calls

use std::future::Future;
use std::time::Duration;

use super::{StorageError, StorageResult};
use crate::error::{CairnError, Result};

/// Run a backend call, retrying once after `backoff` if the backend is
/// unavailable. A second failure surfaces as `StorageUnavailable`.
pub async fn with_retry<T, F, Fut>(operation: &str, backoff: Duration, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(StorageError::NotFound(msg)) => Err(CairnError::NotFound(msg)),
        Err(StorageError::Unavailable(first)) => {
            tracing::warn!(operation, error = %first, "Backend call failed, retrying once");
            tokio::time::sleep(backoff).await;
            match call().await {
                Ok(value) => Ok(value),
                Err(StorageError::NotFound(msg)) => Err(CairnError::NotFound(msg)),
                Err(StorageError::Unavailable(second)) => {
                    tracing::error!(operation, error = %second, "Backend unavailable after retry");
                    Err(CairnError::StorageUnavailable(format!("{operation}: {second}")))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_success_needs_one_call() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, StorageError>(7) }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StorageError::Unavailable("blip".into()))
                } else {
                    Ok(1)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_one_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("op", Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::Unavailable("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(CairnError::StorageUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("op", Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::NotFound("x".into())) }
        })
        .await;
        assert!(matches!(result, Err(CairnError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
