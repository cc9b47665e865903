//! 重试策略 - 业务能力层
//!
//! 指数退避 + 抖动，只重试传输层错误（见 [`AppError::is_retriable`]）。

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;

use crate::error::AppResult;

/// 退避重试策略
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 总尝试次数（含第一次）
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// 抖动上限，占本次延迟的比例
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    /// 不带抖动的第 `attempt` 次失败后的等待时间（attempt 从 1 开始）
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exp);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// 带抖动的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter_ratio <= 0.0 || base.is_zero() {
            return base;
        }
        let max_jitter = base.as_millis() as f64 * self.jitter_ratio;
        let jitter = rand::thread_rng().gen_range(0.0..=max_jitter);
        base + Duration::from_millis(jitter as u64)
    }

    /// 执行 `op`，可重试错误按策略退避后重来
    ///
    /// `op` 收到当前尝试序号（从 1 开始）。
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retriable() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} 失败 (尝试 {}/{}): {}，{:?} 后重试",
                        label, attempt, self.max_attempts, e, delay
                    );
                    sleep(delay).await;
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
    use crate::error::{AppError, Stage};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_millis(700),
            jitter_ratio: 0.0,
        };
        assert_eq!(policy.base_delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay_for(4), Duration::from_millis(700));
        assert_eq!(policy.delay_for(9), Duration::from_millis(700));
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.delay_for(2);
            assert!(d >= Duration::from_millis(1000));
            assert!(d <= Duration::from_millis(1200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transport_errors_until_success() {
        let calls = &AtomicU32::new(0);
        let result = RetryPolicy::default()
            .run("测试调用", move |_| async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(AppError::timeout(Stage::AiCall, Duration::from_secs(1)))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: AppResult<()> = RetryPolicy::default()
            .run("测试调用", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::connection("llm", "refused"))
            })
            .await;
        assert!(matches!(result, Err(AppError::Connection { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_validation_errors() {
        let calls = &AtomicU32::new(0);
        let result: AppResult<()> = RetryPolicy::default()
            .run("测试调用", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Validation("bad".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
