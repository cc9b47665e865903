pub mod headless;
pub mod pool;

pub use headless::{ChromeLauncher, ChromeWorker};
pub use pool::{PoolStats, WorkerFactory, WorkerHandle, WorkerPool};

/// 生产环境使用的浏览器池
pub type BrowserPool = WorkerPool<ChromeLauncher>;
