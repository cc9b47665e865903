//! 单个任务处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责一个审计任务从 `queued` 到终态的完整流水线。
//!
//! ## 核心流程
//!
//! 1. **开始运行**：`queued → running`，写入存储
//! 2. **页面快照**：只提取一次，之后所有类别共享同一份只读快照
//! 3. **类别分发**：每个类别一个任务，用 Semaphore 限制并发数 M
//! 4. **收集结果**：通过 mpsc 收集，直到全部完成或任务截止时间到达
//! 5. **汇总落库**：决定终态、计算总分、写入存储、通知等待者
//!
//! 取消是协作式的：还在等待并发许可的类别直接记为 `timed_out`，
//! 正在评分的类别跑完或者等到自己的超时。

use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use tokio::sync::{mpsc, watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{error, info, warn};

use crate::error::{AppError, AppResult, Stage};
use crate::models::{
    AnalysisJob, CategoryPrompt, CategoryResult, CategoryStatus, JobFailure, JobStatus,
    PageSnapshot,
};
use crate::services::aggregator::{order_results, overall_score};
use crate::services::{JobStore, PromptCatalog, RetryPolicy, SnapshotSource};
use crate::utils::logging::{log_job_complete, log_job_start};
use crate::workflow::{CategoryCtx, CategoryFlow};

/// 流水线参数
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// 单个任务内同时评分的类别数 (M)
    pub category_concurrency: usize,
    pub job_timeout: Duration,
    pub persistence_timeout: Duration,
    pub persistence_retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            category_concurrency: 4,
            job_timeout: Duration::from_secs(300),
            persistence_timeout: Duration::from_secs(10),
            persistence_retry: RetryPolicy::default(),
        }
    }
}

/// 流水线依赖
///
/// 在 `App::initialize` 中构建一次，所有任务共享。
pub struct PipelineContext {
    pub snapshots: Arc<dyn SnapshotSource>,
    pub flow: Arc<CategoryFlow>,
    pub catalog: Arc<PromptCatalog>,
    pub store: Arc<dyn JobStore>,
    pub settings: PipelineSettings,
}

impl PipelineContext {
    /// 带超时与重试的幂等写入
    pub async fn persist(&self, job: &AnalysisJob) -> AppResult<()> {
        let store = self.store.as_ref();
        let limit = self.settings.persistence_timeout;
        let label = format!("[任务 {}] 写入存储", job.id.short());

        self.settings
            .persistence_retry
            .run(&label, move |_| async move {
                match timeout(limit, store.upsert_job(job)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::timeout(Stage::Persistence, limit)),
                }
            })
            .await
    }
}

/// 一个任务的运行时状态
pub(crate) struct JobSlot {
    pub(crate) job: RwLock<AnalysisJob>,
    pub(crate) cancel: watch::Sender<bool>,
    pub(crate) status: watch::Sender<JobStatus>,
}

impl JobSlot {
    pub(crate) fn new(job: AnalysisJob) -> Self {
        let (cancel, _) = watch::channel(false);
        let (status, _) = watch::channel(job.status);
        Self {
            job: RwLock::new(job),
            cancel,
            status,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// 类别收集的结束方式
enum Collected {
    AllReported,
    DeadlineReached,
}

/// 运行一个任务直到终态
pub(crate) async fn process_job(
    ctx: Arc<PipelineContext>,
    slot: Arc<JobSlot>,
    url: Url,
    prompts: Vec<CategoryPrompt>,
) {
    // ========== 步骤 1: queued → running ==========
    let started = {
        let mut job = slot.job.write().await;
        if job.status != JobStatus::Queued {
            // 排队期间已被取消
            return;
        }
        if let Err(e) = job.transition(JobStatus::Running) {
            error!("[任务 {}] {}", job.id.short(), e);
            return;
        }
        job.clone()
    };
    slot.status.send_replace(JobStatus::Running);
    log_job_start(&started);
    if let Err(e) = ctx.persist(&started).await {
        warn!("[任务 {}] 写入 running 状态失败: {}", started.id.short(), e);
    }

    let deadline = Instant::now() + ctx.settings.job_timeout;
    let mut cancel_rx = slot.cancel.subscribe();

    // ========== 步骤 2: 页面快照（只做一次） ==========
    let capture = tokio::select! {
        biased;
        Ok(_) = cancel_rx.wait_for(|c| *c) => None,
        res = timeout_at(deadline, ctx.snapshots.capture(&url)) => Some(res),
    };

    let snapshot = match capture {
        None => {
            info!("[任务 {}] 🛑 提取期间收到取消", started.id.short());
            let results = prompts
                .iter()
                .map(|p| {
                    CategoryResult::timed_out(
                        p.category,
                        Some(p.template_id.clone()),
                        "任务已取消，类别未开始",
                    )
                })
                .collect();
            finish(&ctx, &slot, results, None).await;
            return;
        }
        Some(Err(_)) => {
            let err = AppError::timeout(Stage::Job, ctx.settings.job_timeout);
            error!("[任务 {}] ❌ 页面提取超过任务时限", started.id.short());
            finish(&ctx, &slot, Vec::new(), Some(err)).await;
            return;
        }
        Some(Ok(Err(e))) => {
            error!("[任务 {}] ❌ 页面提取失败: {}", started.id.short(), e);
            finish(&ctx, &slot, Vec::new(), Some(e)).await;
            return;
        }
        Some(Ok(Ok(snapshot))) => Arc::new(snapshot),
    };

    // ========== 步骤 3: 类别分发 ==========
    let total = prompts.len();
    let semaphore = Arc::new(Semaphore::new(ctx.settings.category_concurrency));
    let (tx, mut rx) = mpsc::channel::<CategoryResult>(total.max(1));
    let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(total);

    for (idx, prompt) in prompts.into_iter().enumerate() {
        let category_ctx = CategoryCtx::new(started.id.clone(), idx + 1, total, prompt.category);
        let handle = tokio::spawn(run_category(
            Arc::clone(&ctx.flow),
            Arc::clone(&snapshot),
            prompt,
            category_ctx,
            Arc::clone(&semaphore),
            slot.cancel.subscribe(),
            tx.clone(),
        ));
        handles.push(handle);
    }
    drop(tx);

    // ========== 步骤 4: 收集结果 ==========
    let mut results = Vec::with_capacity(total);
    let collected = loop {
        tokio::select! {
            biased;
            received = rx.recv() => match received {
                Some(result) => results.push(result),
                None => break Collected::AllReported,
            },
            _ = sleep_until(deadline) => break Collected::DeadlineReached,
        }
    };

    let expected = started.expected_categories.clone();
    let results = match collected {
        Collected::AllReported => {
            // 所有发送端都已关闭仍缺结果，说明有类别任务异常退出
            order_results(&expected, results, CategoryStatus::Failed, "评估任务异常退出")
        }
        Collected::DeadlineReached => {
            for handle in &handles {
                handle.abort();
            }
            while let Ok(result) = rx.try_recv() {
                results.push(result);
            }
            warn!(
                "[任务 {}] ⏱️ 到达任务时限，{} 个类别未完成",
                started.id.short(),
                total.saturating_sub(results.len())
            );
            order_results(
                &expected,
                results,
                CategoryStatus::TimedOut,
                "超过任务时限，类别未完成",
            )
        }
    };

    // ========== 步骤 5: 汇总落库 ==========
    finish(&ctx, &slot, results, None).await;
}

/// 单个类别任务
async fn run_category(
    flow: Arc<CategoryFlow>,
    snapshot: Arc<PageSnapshot>,
    prompt: CategoryPrompt,
    ctx: CategoryCtx,
    semaphore: Arc<Semaphore>,
    mut cancel_rx: watch::Receiver<bool>,
    tx: mpsc::Sender<CategoryResult>,
) {
    let permit = tokio::select! {
        biased;
        Ok(_) = cancel_rx.wait_for(|c| *c) => None,
        permit = semaphore.acquire_owned() => permit.ok(),
    };

    let result = match permit {
        Some(_permit) if !*cancel_rx.borrow() => flow.run(&prompt, &snapshot, &ctx).await,
        _ => {
            info!("{} 🛑 任务已取消，跳过", ctx);
            CategoryResult::timed_out(
                prompt.category,
                Some(prompt.template_id.clone()),
                "任务已取消，类别未开始",
            )
        }
    };

    let _ = tx.send(result).await;
}

/// 写入终态
///
/// `failure` 为 `Some` 时任务失败（零结果）；否则由取消标记和类别结果决定终态。
async fn finish(
    ctx: &PipelineContext,
    slot: &JobSlot,
    results: Vec<CategoryResult>,
    failure: Option<AppError>,
) {
    let cancelled = slot.is_cancelled();

    let snapshot = {
        let mut job = slot.job.write().await;
        let next = match &failure {
            Some(_) => JobStatus::Failed,
            None if cancelled => JobStatus::Cancelled,
            None => JobStatus::from_results(&results),
        };

        job.overall_score = overall_score(&results);
        job.categories = results;
        job.failure = match &failure {
            Some(e) => Some(JobFailure::from_error(e)),
            None if cancelled => Some(JobFailure::cancelled("任务在运行中被取消")),
            None => None,
        };
        if let Err(e) = job.transition(next) {
            error!("[任务 {}] {}", job.id.short(), e);
        }
        job.clone()
    };

    if let Err(e) = ctx.persist(&snapshot).await {
        error!("[任务 {}] ❌ 终态写入失败: {}", snapshot.id.short(), e);
        let mut job = slot.job.write().await;
        if job.failure.is_none() {
            job.failure = Some(JobFailure::from_error(&e));
        }
    }

    log_job_complete(&snapshot);
    slot.status.send_replace(snapshot.status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisType, Category};
    use crate::services::MemoryJobStore;
    use crate::services::{CompletionBackend, CompletionRequest, ScoringClient, ScoringSettings};
    use async_trait::async_trait;

    struct StaticSnapshot;

    #[async_trait]
    impl SnapshotSource for StaticSnapshot {
        async fn capture(&self, _url: &Url) -> AppResult<PageSnapshot> {
            Ok(crate::models::snapshot::fixtures::sample_snapshot())
        }
    }

    struct SlowBackend;

    #[async_trait]
    impl CompletionBackend for SlowBackend {
        async fn complete(&self, _request: &CompletionRequest) -> AppResult<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(r#"{"score": 50, "max_score": 100, "issues": []}"#.into())
        }

        fn model_name(&self) -> &str {
            "slow"
        }
    }

    fn context(concurrency: usize) -> Arc<PipelineContext> {
        let scoring = ScoringClient::new(Arc::new(SlowBackend), ScoringSettings::default());
        Arc::new(PipelineContext {
            snapshots: Arc::new(StaticSnapshot),
            flow: Arc::new(CategoryFlow::new(Arc::new(scoring))),
            catalog: Arc::new(PromptCatalog::builtin().unwrap()),
            store: Arc::new(MemoryJobStore::new()),
            settings: PipelineSettings {
                category_concurrency: concurrency,
                ..PipelineSettings::default()
            },
        })
    }

    fn slot_for(ctx: &PipelineContext, analysis_type: AnalysisType) -> (Arc<JobSlot>, Vec<CategoryPrompt>) {
        let prompts = ctx.catalog.resolve_prompts(analysis_type, None).unwrap();
        let job = AnalysisJob::new(
            "https://example.com/",
            analysis_type,
            prompts.iter().map(|p| p.category).collect(),
            None,
        );
        (Arc::new(JobSlot::new(job)), prompts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_skips_categories_waiting_for_permit() {
        let ctx = context(1);
        let (slot, prompts) = slot_for(&ctx, AnalysisType::ContentAnalysis);
        let url = Url::parse("https://example.com/").unwrap();

        let task = tokio::spawn(process_job(Arc::clone(&ctx), Arc::clone(&slot), url, prompts));
        // 第一个类别正在评分，第二个在等待许可
        tokio::time::sleep(Duration::from_secs(1)).await;
        slot.cancel.send_replace(true);
        task.await.unwrap();

        let job = slot.job.read().await;
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.categories.len(), 2);
        assert_eq!(job.categories[0].category, Category::Content);
        assert_eq!(job.categories[0].status, CategoryStatus::Ok);
        assert_eq!(job.categories[1].status, CategoryStatus::TimedOut);
        assert_eq!(job.overall_score, Some(50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_queued_does_not_run() {
        let ctx = context(2);
        let (slot, prompts) = slot_for(&ctx, AnalysisType::ContentAnalysis);
        slot.job.write().await.transition(JobStatus::Cancelled).unwrap();

        let url = Url::parse("https://example.com/").unwrap();
        process_job(Arc::clone(&ctx), Arc::clone(&slot), url, prompts).await;

        assert_eq!(slot.job.read().await.status, JobStatus::Cancelled);
    }
}
