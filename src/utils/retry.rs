use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use crate::tus::{Result, TusError};

/// 默认重试间隔：立即、3s、5s、10s、20s
pub const DEFAULT_RETRY_DELAYS: [Duration; 5] = [
    Duration::from_secs(0),
    Duration::from_secs(3),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(20),
];

/// 重试配置
pub struct RetryConfig {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 第 n 次重试前的等待时间，超出后沿用最后一个
    pub delays: Vec<Duration>,
    /// 是否重试的判断函数
    pub should_retry: Box<dyn Fn(&TusError) -> bool + Send + Sync>,
}

impl RetryConfig {
    /// One initial attempt plus one retry per delay.
    pub fn from_delays(delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: delays.len() as u32 + 1,
            delays,
            should_retry: Box::new(TusError::is_retryable),
        }
    }

    /// 计算第 n 次重试的延迟
    pub fn get_delay(&self, attempt: u32) -> Duration {
        self.delays
            .get(attempt as usize)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_delays(DEFAULT_RETRY_DELAYS.to_vec())
    }
}

impl std::fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("delays", &self.delays)
            .finish_non_exhaustive()
    }
}

/// 执行带重试的操作，`operation` 收到当前是第几次尝试（从 0 开始）
pub async fn retry_with_config<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_until_cancelled(config, &CancellationToken::new(), operation).await
}

/// Like [`retry_with_config`], but stops before the next attempt once `token` is cancelled.
///
/// An attempt already in flight is never interrupted; only the waits between
/// attempts are.
pub async fn retry_until_cancelled<F, Fut, T>(
    config: &RetryConfig,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 0..max_attempts {
        if token.is_cancelled() {
            return Err(TusError::Cancelled);
        }

        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(error) => {
                // 检查是否应该重试
                if !(config.should_retry)(&error) {
                    return Err(error);
                }

                // 如果不是最后一次尝试，等待后重试
                if attempt < max_attempts - 1 {
                    let delay = config.get_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "transient error, retrying: {}",
                        error
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = token.cancelled() => return Err(TusError::Cancelled),
                    }
                }

                last_error = Some(error);
            }
        }
    }

    // 所有重试都失败了
    Err(last_error.unwrap_or_else(|| TusError::internal_error("retry limit exceeded")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_schedule_delay() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 6);
        assert_eq!(config.get_delay(0), Duration::ZERO);
        assert_eq!(config.get_delay(1), Duration::from_secs(3));
        assert_eq!(config.get_delay(4), Duration::from_secs(20));
        assert_eq!(config.get_delay(9), Duration::from_secs(20));
        assert_eq!(RetryConfig::from_delays(vec![]).get_delay(0), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_success() {
        let count = &AtomicU32::new(0);
        let result = retry_with_config(&RetryConfig::default(), |_| async move {
            if count.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(TusError::server_error(503, "unavailable"))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted() {
        let count = &AtomicU32::new(0);
        let result = retry_with_config(&RetryConfig::default(), |_| async move {
            count.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TusError::server_error(502, "bad gateway"))
        })
        .await;

        assert!(matches!(result, Err(TusError::ServerError { status_code: 502, .. })));
        assert_eq!(count.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_auth_error_not_retried() {
        let count = &AtomicU32::new(0);
        let result = retry_with_config(&RetryConfig::default(), |_| async move {
            count.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TusError::server_error(401, "jwt expired"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_between_attempts() {
        let token = CancellationToken::new();
        let count = &AtomicU32::new(0);

        let result = retry_until_cancelled(&RetryConfig::default(), &token, |attempt| {
            let token = token.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                if attempt == 1 {
                    // 正在进行的尝试不会被打断
                    token.cancel();
                }
                Err::<(), _>(TusError::server_error(503, "unavailable"))
            }
        })
        .await;

        assert!(matches!(result, Err(TusError::Cancelled)));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
