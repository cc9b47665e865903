//! 关闭守卫 - 基础设施层
//!
//! 包住一个需要异步关闭的资源（标签页）。正常路径用 [`CloseGuard::into_inner`]
//! 取回资源自行关闭；如果持有者的 future 在中途被 drop（任务超时、取消），
//! 守卫在 drop 时把关闭操作交给后台任务，资源不会遗留在复用的浏览器里。

use std::ops::Deref;

use futures::future::BoxFuture;
use tracing::{debug, warn};

/// 关闭函数
pub type CloseFn<T> = fn(T) -> BoxFuture<'static, ()>;

pub struct CloseGuard<T: Send + 'static> {
    inner: Option<T>,
    close: CloseFn<T>,
}

impl<T: Send + 'static> CloseGuard<T> {
    pub fn new(inner: T, close: CloseFn<T>) -> Self {
        Self {
            inner: Some(inner),
            close,
        }
    }

    /// 解除守卫，由调用方负责关闭
    pub fn into_inner(mut self) -> T {
        match self.inner.take() {
            Some(inner) => inner,
            None => unreachable!("资源只在 into_inner 或 drop 时取出"),
        }
    }
}

impl<T: Send + 'static> Deref for CloseGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.inner {
            Some(inner) => inner,
            None => unreachable!("资源只在 into_inner 或 drop 时取出"),
        }
    }
}

impl<T: Send + 'static> Drop for CloseGuard<T> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("操作被中断，后台关闭资源");
                runtime.spawn((self.close)(inner));
            }
            Err(_) => warn!("没有可用的运行时，资源未能关闭"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_close(counter: Arc<AtomicUsize>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    /// 让后台任务有机会运行
    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_drop_closes_in_background() {
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = CloseGuard::new(Arc::clone(&counter), counting_close);
        assert_eq!(guard.load(Ordering::SeqCst), 0);

        drop(guard);
        settle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_into_inner_disarms() {
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = CloseGuard::new(Arc::clone(&counter), counting_close);

        let inner = guard.into_inner();
        settle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(Arc::ptr_eq(&inner, &counter));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_owner_still_closes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let guard = CloseGuard::new(Arc::clone(&counter), counting_close);

        // 持有守卫的 future 在截止时间被丢弃，正常关闭路径永远不会执行
        let owner = async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            guard.into_inner()
        };
        let outcome = tokio::time::timeout(Duration::from_secs(1), owner).await;
        assert!(outcome.is_err());

        settle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
