//! 审计服务 - 编排层
//!
//! 对外的任务接口：提交、查询、取消、等待、出报告。
//! 进行中的任务保存在内存登记表里，查询时优先读登记表，其次读存储。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, Stage};
use crate::models::{
    AnalysisJob, AuditReport, CategoryResult, CategoryStatus, JobFailure, JobId, JobStatus,
};
use crate::orchestrator::intake::{self, SubmitOptions};
use crate::orchestrator::job_processor::{process_job, JobSlot, PipelineContext};
use crate::services::{aggregate, aggregate_with};

/// 审计服务
pub struct AuditService {
    ctx: Arc<PipelineContext>,
    jobs: RwLock<HashMap<JobId, Arc<JobSlot>>>,
}

impl AuditService {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// 受理一个审计任务
    ///
    /// 校验失败（URL、分析类型、自定义模板）在创建任务前直接返回 `Validation`。
    pub async fn submit(
        &self,
        url: &str,
        analysis_type: &str,
        options: SubmitOptions,
    ) -> AppResult<JobId> {
        let intake = intake::prepare(&self.ctx.catalog, url, analysis_type, &options)?;

        let expected = intake.prompts.iter().map(|p| p.category).collect();
        let job = AnalysisJob::new(
            intake.url.as_str(),
            intake.analysis_type,
            expected,
            intake.custom_prompt_id.clone(),
        );
        let id = job.id.clone();

        self.ctx.persist(&job).await?;
        info!(
            "[任务 {}] 📥 已受理: {} ({})",
            id.short(),
            intake.url,
            intake.analysis_type
        );

        let slot = Arc::new(JobSlot::new(job));
        self.jobs.write().await.insert(id.clone(), Arc::clone(&slot));

        tokio::spawn(process_job(
            Arc::clone(&self.ctx),
            slot,
            intake.url,
            intake.prompts,
        ));

        Ok(id)
    }

    async fn slot(&self, id: &JobId) -> Option<Arc<JobSlot>> {
        self.jobs.read().await.get(id).cloned()
    }

    /// 查询任务：先查登记表，再查存储
    pub async fn get_status(&self, id: &JobId) -> AppResult<AnalysisJob> {
        if let Some(slot) = self.slot(id).await {
            return Ok(slot.job.read().await.clone());
        }
        self.ctx
            .store
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("任务不存在: {}", id)))
    }

    /// 协作式取消，返回调用时的任务状态
    ///
    /// - `queued`：立即转为 `cancelled`
    /// - `running`：设置取消标记，由流水线收尾
    /// - 终态：不做任何事
    pub async fn cancel(&self, id: &JobId) -> AppResult<JobStatus> {
        let Some(slot) = self.slot(id).await else {
            // 不在本进程内运行，只能返回存储中的状态
            return self.get_status(id).await.map(|job| job.status);
        };

        let mut job = slot.job.write().await;
        match job.status {
            JobStatus::Queued => {
                job.categories = job
                    .expected_categories
                    .iter()
                    .map(|c| CategoryResult::timed_out(*c, None, "任务在开始前被取消"))
                    .collect();
                job.failure = Some(JobFailure::cancelled("任务在开始前被取消"));
                job.transition(JobStatus::Cancelled)?;
                let snapshot = job.clone();
                drop(job);

                slot.cancel.send_replace(true);
                if let Err(e) = self.ctx.persist(&snapshot).await {
                    warn!("[任务 {}] 写入取消状态失败: {}", id.short(), e);
                }
                slot.status.send_replace(JobStatus::Cancelled);
                info!("[任务 {}] 🛑 排队中的任务已取消", id.short());
                Ok(JobStatus::Cancelled)
            }
            JobStatus::Running => {
                drop(job);
                slot.cancel.send_replace(true);
                info!("[任务 {}] 🛑 已请求取消", id.short());
                Ok(JobStatus::Running)
            }
            terminal => Ok(terminal),
        }
    }

    /// 等待任务进入终态
    pub async fn wait(&self, id: &JobId, limit: Option<Duration>) -> AppResult<AnalysisJob> {
        let Some(slot) = self.slot(id).await else {
            return self.get_status(id).await;
        };

        let mut status_rx = slot.status.subscribe();
        let reached = status_rx.wait_for(|s| s.is_terminal());
        match limit {
            Some(limit) => {
                tokio::time::timeout(limit, reached)
                    .await
                    .map_err(|_| AppError::timeout(Stage::Job, limit))?
                    .map_err(|_| AppError::NotFound(format!("任务已被移除: {}", id)))?;
            }
            None => {
                reached
                    .await
                    .map_err(|_| AppError::NotFound(format!("任务已被移除: {}", id)))?;
            }
        }

        let job = slot.job.read().await.clone();
        Ok(job)
    }

    /// 生成展示用报告，任务必须已结束
    pub async fn report(&self, id: &JobId) -> AppResult<AuditReport> {
        let job = self.get_status(id).await?;
        if !job.is_terminal() {
            return Err(AppError::Validation(format!(
                "任务 {} 仍在进行中（{}）",
                id, job.status
            )));
        }

        // 快照阶段失败的任务没有类别结果，每个类别都归因到任务失败
        let summary = match &job.failure {
            Some(failure) if job.status == JobStatus::Failed && job.categories.is_empty() => {
                aggregate_with(
                    &job.expected_categories,
                    &job.categories,
                    CategoryStatus::Failed,
                    &failure.message,
                )
            }
            _ => aggregate(&job.expected_categories, &job.categories),
        };
        Ok(AuditReport {
            overall_score: summary.overall_score,
            breakdown: summary.breakdown,
            job,
        })
    }

    /// 取消所有进行中的任务
    pub async fn cancel_all(&self) {
        let slots: Vec<_> = self.jobs.read().await.values().cloned().collect();
        for slot in slots {
            slot.cancel.send_replace(true);
        }
    }

    /// 登记表中的任务数
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}
