use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::browser::pool::WorkerFactory;
use crate::config::Config;
use crate::error::{AppError, AppResult};

/// 一个无头浏览器进程
pub struct ChromeWorker {
    pub browser: Browser,
    handler: JoinHandle<()>,
}

impl Drop for ChromeWorker {
    fn drop(&mut self) {
        // 事件循环结束后 chromiumoxide 会回收子进程
        self.handler.abort();
    }
}

/// 启动无头 Chromium 的 worker 工厂
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    executable: Option<PathBuf>,
    no_sandbox: bool,
}

impl ChromeLauncher {
    pub fn new(config: &Config) -> Self {
        Self {
            executable: config.browser_executable.as_ref().map(PathBuf::from),
            no_sandbox: config.browser_no_sandbox,
        }
    }

    fn browser_config(&self) -> AppResult<BrowserConfig> {
        let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
            "--disable-gpu",           // 无头模式禁用 GPU
            "--disable-dev-shm-usage", // 防止共享内存不足
            "--remote-debugging-port=0",
        ]);
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        if self.no_sandbox {
            // 只在容器等受控环境中关闭沙盒
            builder = builder.no_sandbox();
        }
        builder.build().map_err(|e| {
            error!("配置无头浏览器失败: {}", e);
            AppError::Configuration(format!("配置无头浏览器失败: {}", e))
        })
    }
}

#[async_trait]
impl WorkerFactory for ChromeLauncher {
    type Worker = ChromeWorker;

    async fn launch(&self) -> AppResult<ChromeWorker> {
        info!("🚀 启动无头浏览器...");
        let config = self.browser_config()?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
            error!("启动无头浏览器失败: {}", e);
            AppError::connection("chromium", e)
        })?;
        debug!("无头浏览器启动成功");

        // 在后台处理浏览器事件
        let handler = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(ChromeWorker { browser, handler })
    }

    async fn shutdown(&self, worker: Arc<ChromeWorker>) {
        match Arc::try_unwrap(worker) {
            Ok(mut worker) => {
                if let Err(e) = worker.browser.close().await {
                    warn!("关闭浏览器失败: {}", e);
                }
                let _ = worker.browser.wait().await;
                debug!("浏览器进程已退出");
            }
            // 仍有提取在使用这个 worker，最后一个引用释放时由 Drop 清理
            Err(_) => debug!("worker 仍被引用，延迟关闭"),
        }
    }
}
