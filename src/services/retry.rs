use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::QueueResult;

/// Ограниченный повтор транзакций при конфликтах хранилища.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Duration::from_millis(25) }
    }
}

/// Выполняет `op`, повторяя её только при `Transient`-ошибках.
/// После исчерпания попыток возвращает последнюю ошибку как есть.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, operation: &'static str, mut op: F) -> QueueResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = QueueResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(operation, attempt, error = %e, "transient store error, retrying");
                // линейная задержка между попытками
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
    use crate::error::QueueError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, backoff: Duration::from_millis(1) }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = &AtomicU32::new(0);
        let result = with_retry(fast(3), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(QueueError::Transient("busy".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: QueueResult<()> = with_retry(fast(2), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::Transient("busy".into()))
        })
        .await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn conflicts_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: QueueResult<()> = with_retry(fast(5), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(QueueError::SlotFull)
        })
        .await;
        assert!(matches!(result, Err(QueueError::SlotFull)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
