//! 浏览器 worker 池 - 基础设施层
//!
//! 固定容量 N。`acquire` 在信号量上挂起等待，不轮询。
//! [`WorkerHandle`] 是 RAII 守卫：无论成功、出错还是被取消，
//! drop 时 worker 都会回到池里（被标记为失效的除外）。

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, Stage};

/// worker 的创建与销毁
#[async_trait]
pub trait WorkerFactory: Send + Sync + 'static {
    type Worker: Send + Sync + 'static;

    /// 启动一个新 worker
    async fn launch(&self) -> AppResult<Self::Worker>;

    /// 关闭 worker（池关闭或 worker 被丢弃时调用）
    async fn shutdown(&self, worker: Arc<Self::Worker>);
}

/// 池状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub idle: usize,
    pub in_use: usize,
    pub launched: usize,
    pub discarded: usize,
}

struct PoolInner<F: WorkerFactory> {
    factory: F,
    capacity: usize,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Arc<F::Worker>>>,
    launched: AtomicUsize,
    discarded: AtomicUsize,
}

impl<F: WorkerFactory> PoolInner<F> {
    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<Arc<F::Worker>>> {
        // 锁内没有会 panic 的操作，中毒时直接取回数据
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 浏览器 worker 池
pub struct WorkerPool<F: WorkerFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: WorkerFactory> Clone for WorkerPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: WorkerFactory> WorkerPool<F> {
    /// 创建池，worker 在第一次需要时才启动
    pub fn new(factory: F, capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                factory,
                capacity,
                permits: Arc::new(Semaphore::new(capacity)),
                idle: Mutex::new(Vec::with_capacity(capacity)),
                launched: AtomicUsize::new(0),
                discarded: AtomicUsize::new(0),
            }),
        }
    }

    /// 获取一个 worker，等待超过 `wait` 返回 `Timeout`
    pub async fn acquire(&self, wait: Duration) -> AppResult<WorkerHandle<F>> {
        let permit = match timeout(wait, Arc::clone(&self.inner.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(AppError::connection("browser-pool", "worker 池已关闭")),
            Err(_) => return Err(AppError::timeout(Stage::WorkerAcquire, wait)),
        };

        let reused = self.inner.idle().pop();
        let worker = match reused {
            Some(worker) => worker,
            None => {
                // 启动失败时 permit 随函数返回被释放
                let worker = self.inner.factory.launch().await.map_err(|e| match e {
                    conn @ AppError::Connection { .. } => conn,
                    other => AppError::connection("browser", other),
                })?;
                let n = self.inner.launched.fetch_add(1, Ordering::Relaxed) + 1;
                info!("🌐 已启动第 {} 个浏览器 worker", n);
                Arc::new(worker)
            }
        };

        Ok(WorkerHandle {
            worker: Some(worker),
            pool: Arc::clone(&self.inner),
            poisoned: false,
            _permit: permit,
        })
    }

    /// 显式归还（等同于 drop）
    pub fn release(&self, handle: WorkerHandle<F>) {
        drop(handle);
    }

    /// 丢弃失效的 worker，释放其容量
    pub async fn discard(&self, mut handle: WorkerHandle<F>) {
        handle.poison();
        if let Some(worker) = handle.worker.take() {
            self.inner.discarded.fetch_add(1, Ordering::Relaxed);
            drop(handle);
            self.inner.factory.shutdown(worker).await;
        }
    }

    /// 在持有 worker 的范围内执行 `op`
    ///
    /// 错误满足 [`AppError::is_worker_fault`] 时 worker 被丢弃。
    pub async fn with_worker<T, Op, Fut>(&self, wait: Duration, op: Op) -> AppResult<T>
    where
        Op: FnOnce(Arc<F::Worker>) -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let handle = self.acquire(wait).await?;
        let result = op(handle.worker()).await;
        match &result {
            Err(e) if e.is_worker_fault() => {
                warn!("浏览器 worker 失效，丢弃: {}", e);
                self.discard(handle).await;
            }
            _ => self.release(handle),
        }
        result
    }

    /// 关闭所有空闲 worker，之后的 acquire 立即失败
    pub async fn close(&self) {
        self.inner.permits.close();
        let idle: Vec<_> = self.inner.idle().drain(..).collect();
        let count = idle.len();
        for worker in idle {
            self.inner.factory.shutdown(worker).await;
        }
        info!("🔒 worker 池已关闭，释放 {} 个空闲 worker", count);
    }

    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.idle().len();
        let available = self.inner.permits.available_permits();
        PoolStats {
            capacity: self.inner.capacity,
            idle,
            in_use: self.inner.capacity.saturating_sub(available),
            launched: self.inner.launched.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }
}

/// 借出的 worker
///
/// drop 时归还 worker 并释放容量。
pub struct WorkerHandle<F: WorkerFactory> {
    worker: Option<Arc<F::Worker>>,
    pool: Arc<PoolInner<F>>,
    poisoned: bool,
    // 最后释放：worker 先回到空闲列表，等待者才能拿到容量
    _permit: OwnedSemaphorePermit,
}

impl<F: WorkerFactory> WorkerHandle<F> {
    pub fn worker(&self) -> Arc<F::Worker> {
        match &self.worker {
            Some(w) => Arc::clone(w),
            None => unreachable!("worker 只在 drop 或 discard 时取出"),
        }
    }

    /// 标记为失效，drop 时不再归还
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

impl<F: WorkerFactory> Drop for WorkerHandle<F> {
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.poisoned {
            // 通过 poison() 而非 discard() 失效：没有异步上下文可用于 shutdown，
            // 直接丢掉引用，由 worker 自身的 Drop 清理
            self.pool.discarded.fetch_add(1, Ordering::Relaxed);
            debug!("失效的 worker 已丢弃");
            return;
        }
        if self.pool.permits.is_closed() {
            return;
        }
        self.pool.idle().push(worker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractionReason;
    use std::sync::atomic::AtomicBool;

    struct FakeWorker {
        id: usize,
    }

    #[derive(Default)]
    struct FakeFactory {
        next_id: AtomicUsize,
        fail_launch: AtomicBool,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl WorkerFactory for Arc<FakeFactory> {
        type Worker = FakeWorker;

        async fn launch(&self) -> AppResult<FakeWorker> {
            if self.fail_launch.load(Ordering::SeqCst) {
                return Err(AppError::connection("chrome", "executable not found"));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(FakeWorker { id })
        }

        async fn shutdown(&self, _worker: Arc<FakeWorker>) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(capacity: usize) -> (WorkerPool<Arc<FakeFactory>>, Arc<FakeFactory>) {
        let factory = Arc::new(FakeFactory::default());
        (WorkerPool::new(Arc::clone(&factory), capacity), factory)
    }

    #[tokio::test]
    async fn test_worker_is_reused_after_release() {
        let (pool, _) = pool(1);
        let first = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let id = first.worker().id;
        pool.release(first);

        let second = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(second.worker().id, id);
        assert_eq!(pool.stats().launched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_exhausted() {
        let (pool, _) = pool(1);
        let _held = pool.acquire(Duration::from_secs(1)).await.unwrap();

        let err = pool.acquire(Duration::from_secs(5)).await.err().unwrap();
        assert!(matches!(
            err,
            AppError::Timeout {
                stage: Stage::WorkerAcquire,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_waiter_wakes_when_worker_returns() {
        let (pool, _) = pool(1);
        let held = pool.acquire(Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Duration::from_secs(5)).await.map(|h| h.worker().id) })
        };
        tokio::task::yield_now().await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handle_released_on_error_and_cancellation() {
        let (pool, _) = pool(1);

        let result: AppResult<()> = pool
            .with_worker(Duration::from_secs(1), |_| async {
                Err(AppError::extraction(ExtractionReason::HttpStatus, "404"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(pool.stats().idle, 1);

        // 持有 worker 的任务被中途取消
        let task = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.with_worker(Duration::from_secs(1), |_| async {
                    std::future::pending::<AppResult<()>>().await
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        task.abort();
        let _ = task.await;

        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.launched, 1);
    }

    #[tokio::test]
    async fn test_crashed_worker_is_discarded_and_replaced() {
        let (pool, factory) = pool(1);

        let result: AppResult<()> = pool
            .with_worker(Duration::from_secs(1), |_| async {
                Err(AppError::extraction(ExtractionReason::BrowserCrashed, "ws closed"))
            })
            .await;
        assert!(result.is_err());

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.discarded, 1);
        assert_eq!(factory.shutdowns.load(Ordering::SeqCst), 1);

        let next = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(next.worker().id, 1);
    }

    #[tokio::test]
    async fn test_poisoned_handle_is_not_returned() {
        let (pool, _) = pool(2);
        let mut handle = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert!(!handle.is_poisoned());
        handle.poison();
        assert!(handle.is_poisoned());
        drop(handle);

        let stats = pool.stats();
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.discarded, 1);
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn test_launch_failure_frees_slot() {
        let (pool, factory) = pool(1);
        factory.fail_launch.store(true, Ordering::SeqCst);

        let err = pool.acquire(Duration::from_secs(1)).await.err().unwrap();
        assert!(matches!(err, AppError::Connection { .. }));
        assert_eq!(pool.stats().in_use, 0);

        factory.fail_launch.store(false, Ordering::SeqCst);
        assert!(pool.acquire(Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_shuts_down_idle_workers() {
        let (pool, factory) = pool(2);
        let a = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let b = pool.acquire(Duration::from_secs(1)).await.unwrap();
        drop(a);
        drop(b);

        pool.close().await;
        assert_eq!(factory.shutdowns.load(Ordering::SeqCst), 2);
        assert!(pool.acquire(Duration::from_secs(1)).await.is_err());
    }
}
