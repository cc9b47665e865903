use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::analysis_type::AnalysisType;
use super::category::{Category, CategoryResult};
use crate::error::{AppError, AppResult, ErrorKind};

/// 任务 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// 生成新的随机 ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 日志里使用的短 ID
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    PartialFailure,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::PartialFailure
                | JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }

    /// 状态机允许的转换
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Running, Completed)
                | (Running, PartialFailure)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    /// 根据全部类别结果决定终态（未被取消时）
    pub fn from_results(results: &[CategoryResult]) -> JobStatus {
        let ok = results.iter().filter(|r| r.is_ok()).count();
        if ok == 0 {
            JobStatus::Failed
        } else if ok == results.len() {
            JobStatus::Completed
        } else {
            JobStatus::PartialFailure
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::PartialFailure => "partial_failure",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// 任务失败原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobFailure {
    pub fn from_error(err: &AppError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// 被取消的任务
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            message: message.into(),
        }
    }
}

/// 一次审计任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJob {
    pub id: JobId,
    pub url: String,
    pub analysis_type: AnalysisType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// 受理时确定的类别集合，顺序即展示顺序
    pub expected_categories: Vec<Category>,
    #[serde(default)]
    pub categories: Vec<CategoryResult>,
    pub overall_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
}

impl AnalysisJob {
    /// 创建处于 `queued` 的新任务
    pub fn new(
        url: impl Into<String>,
        analysis_type: AnalysisType,
        expected_categories: Vec<Category>,
        custom_prompt_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            url: url.into(),
            analysis_type,
            status: JobStatus::Queued,
            created_at: now,
            updated_at: now,
            expected_categories,
            categories: Vec::new(),
            overall_score: None,
            custom_prompt_id,
            failure: None,
        }
    }

    /// 执行状态转换，非法转换返回校验错误
    pub fn transition(&mut self, next: JobStatus) -> AppResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "任务 {} 不能从 {} 转换到 {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
