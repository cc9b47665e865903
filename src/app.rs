//! 应用装配
//!
//! 所有共享资源（worker 池、模型客户端、提示词目录、存储）在这里构建一次，
//! 通过 [`PipelineContext`] 传给编排层，没有进程级单例。

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::browser::{BrowserPool, ChromeLauncher, WorkerPool};
use crate::config::Config;
use crate::error::AppResult;
use crate::models::AuditReport;
use crate::orchestrator::{AuditService, PipelineContext, PipelineSettings, SubmitOptions};
use crate::services::{
    open_store, BrowserSnapshotSource, FeatureExtractor, LlmService, PromptCatalog, ScoringClient,
    ScoringSettings,
};
use crate::utils::logging::{init_log_file, log_startup, print_report};
use crate::workflow::CategoryFlow;

/// 应用主结构
pub struct App {
    config: Config,
    service: Arc<AuditService>,
    pool: BrowserPool,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> AppResult<Self> {
        // 初始化日志文件
        if let Some(path) = &config.log_file {
            init_log_file(path)?;
        }

        log_startup(config.browser_pool_size, config.category_concurrency);
        info!("⚙️ 配置: {:?}", config);

        let store = open_store(&config.database_url).await?;
        let catalog = PromptCatalog::load(config.prompt_catalog_path.as_deref().map(Path::new)).await?;
        info!("✓ 提示词目录就绪，共 {} 个模板", catalog.len());

        // 浏览器在第一次提取时才启动
        let pool = WorkerPool::new(ChromeLauncher::new(&config), config.browser_pool_size);
        let snapshots = BrowserSnapshotSource::new(
            pool.clone(),
            FeatureExtractor::new(config.navigation_timeout),
            config.worker_acquire_timeout,
        );

        let scoring = ScoringClient::new(
            Arc::new(LlmService::new(&config)),
            ScoringSettings {
                retry: config.retry_policy(),
                call_timeout: config.ai_call_timeout,
                max_output_tokens: config.llm_max_output_tokens,
                max_context_chars: config.llm_max_context_chars,
            },
        );

        let ctx = PipelineContext {
            snapshots: Arc::new(snapshots),
            flow: Arc::new(CategoryFlow::new(Arc::new(scoring))),
            catalog: Arc::new(catalog),
            store,
            settings: PipelineSettings {
                category_concurrency: config.category_concurrency,
                job_timeout: config.job_timeout,
                persistence_timeout: config.persistence_timeout,
                persistence_retry: config.retry_policy(),
            },
        };

        Ok(Self {
            config,
            service: Arc::new(AuditService::new(ctx)),
            pool,
        })
    }

    pub fn service(&self) -> Arc<AuditService> {
        Arc::clone(&self.service)
    }

    /// 审计一个 URL 并等待报告
    pub async fn run(
        &self,
        url: &str,
        analysis_type: &str,
        options: SubmitOptions,
    ) -> AppResult<AuditReport> {
        let id = self.service.submit(url, analysis_type, options).await?;
        // 任务自身有截止时间，这里不再另设上限
        self.service.wait(&id, None).await?;
        let report = self.service.report(&id).await?;

        print_report(&report);
        if let Some(path) = &self.config.log_file {
            info!("\n日志已保存至: {}", path);
        }
        Ok(report)
    }

    /// 取消进行中的任务并关闭浏览器
    pub async fn shutdown(&self) {
        self.service.cancel_all().await;
        self.pool.close().await;
        let stats = self.pool.stats();
        info!(
            "👋 程序退出：共启动 {} 个浏览器，丢弃 {} 个",
            stats.launched, stats.discarded
        );
    }
}
