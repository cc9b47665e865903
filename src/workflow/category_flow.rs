//! 类别评估流程 - 流程层
//!
//! 核心职责：定义"一个类别"的完整评估流程
//!
//! 流程顺序：
//! 1. 提示词 + 快照 → AI 评分（含退避重试与一次纠正）
//! 2. 校验得分范围
//! 3. 记录结果

use std::sync::Arc;

use tracing::{info, warn};

use crate::models::{CategoryPrompt, CategoryResult, CategoryStatus, PageSnapshot};
use crate::services::ScoringClient;
use crate::workflow::category_ctx::CategoryCtx;

/// 类别评估流程
///
/// - 编排单个类别的评估
/// - 不持有浏览器资源，只读共享快照
/// - 任何失败都落在该类别的结果里
pub struct CategoryFlow {
    scoring: Arc<ScoringClient>,
}

impl CategoryFlow {
    pub fn new(scoring: Arc<ScoringClient>) -> Self {
        Self { scoring }
    }

    pub async fn run(
        &self,
        prompt: &CategoryPrompt,
        snapshot: &PageSnapshot,
        ctx: &CategoryCtx,
    ) -> CategoryResult {
        info!("{} 🤖 开始评分（模板 {}）", ctx, prompt.template_id);

        let mut result = self.scoring.score(prompt, snapshot).await;

        // 结果必须属于当前类别
        if result.category != ctx.category {
            warn!("{} 评分结果类别不符: {}", ctx, result.category);
            result.category = ctx.category;
        }

        match result.status {
            CategoryStatus::Ok => info!(
                "{} ✓ 得分 {:.1}/{:.1}，问题 {} 个",
                ctx,
                result.score,
                result.max_score,
                result.issues.len()
            ),
            _ => warn!(
                "{} ❌ 评分失败: {}",
                ctx,
                result.detail.as_deref().unwrap_or("未知原因")
            ),
        }
        result
    }
}
