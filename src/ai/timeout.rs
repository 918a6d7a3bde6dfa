//! Deadline wrapper for async model and crawl calls.

use std::future::Future;
use std::time::Duration;

use crate::types::{Result, TutorError};

/// Execute an async operation with a timeout
///
/// Returns a `Timeout` error if the operation doesn't complete within the
/// given duration. The inner future is dropped on expiry.
///
/// ```ignore
/// let completion = with_timeout(
///     Duration::from_secs(30),
///     invoker.complete(&prompt),
///     "IdentifyAbstractions model call"
/// ).await?;
/// ```
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(TutorError::timeout(operation_name, timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(
            Duration::from_secs(1),
            async { Ok::<_, TutorError>(42) },
            "test operation",
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let err = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, TutorError>(42)
            },
            "slow operation",
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.is_retryable());
        assert!(err.detail.contains("slow operation"));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let err = with_timeout(
            Duration::from_secs(1),
            async { Err::<u8, _>(TutorError::auth("bad key")) },
            "call",
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
    }
}
