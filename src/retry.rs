//! 瞬时存储错误的有界退避重试

use crate::config::StorageConfig;
use crate::error::{AppError, Result};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_backoff: Duration::from_millis(config.retry_base_backoff_ms),
        }
    }

    /// 不重试
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::ZERO,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        // 2^(attempt-1) 倍，指数上限 10
        self.base_backoff * 2u32.pow(attempt.saturating_sub(1).min(10))
    }

    /// 执行 `op`，仅对瞬时错误重试；耗尽后返回 `TransientStorage`
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if attempt >= self.max_attempts {
                        tracing::error!(
                            operation,
                            attempts = attempt,
                            error = %e,
                            "Transient storage error, retries exhausted"
                        );
                        return Err(AppError::TransientStorage(format!(
                            "{} failed after {} attempts: {}",
                            operation, attempt, e
                        )));
                    }
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient storage error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(1),
        };

        let value = policy
            .run("flaky", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::TransientStorage("busy".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(1),
        };

        let result: Result<()> = policy
            .run("missing", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::not_found("row"))
            })
            .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_transient() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
        };

        let result: Result<()> = policy
            .run("down", || async {
                Err(AppError::Database(sqlx::Error::PoolTimedOut))
            })
            .await;

        assert!(matches!(result, Err(AppError::TransientStorage(_))));
    }
}
