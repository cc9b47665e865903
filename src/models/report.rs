use serde::{Deserialize, Serialize};

use super::category::{Category, CategoryResult, CategoryStatus, Issue};
use super::job::AnalysisJob;

/// 展示颜色提示，由得分率推导，不作为存储状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreColor {
    Green,
    Amber,
    Red,
}

impl ScoreColor {
    /// >= 80% 绿色，>= 60% 琥珀色，其余红色
    pub fn from_ratio(score: f64, max_score: f64) -> Self {
        if max_score <= 0.0 {
            return ScoreColor::Red;
        }
        let ratio = score / max_score;
        if ratio >= 0.8 {
            ScoreColor::Green
        } else if ratio >= 0.6 {
            ScoreColor::Amber
        } else {
            ScoreColor::Red
        }
    }
}

/// 对外暴露的类别得分视图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub category: Category,
    pub score: f64,
    pub max_score: f64,
    pub issues: Vec<Issue>,
    pub color: ScoreColor,
    pub status: CategoryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&CategoryResult> for ScoreBreakdown {
    fn from(r: &CategoryResult) -> Self {
        let color = if r.is_ok() {
            ScoreColor::from_ratio(r.score, r.max_score)
        } else {
            ScoreColor::Red
        };
        Self {
            category: r.category,
            score: r.score,
            max_score: r.max_score,
            issues: r.issues.clone(),
            color,
            status: r.status,
            detail: r.detail.clone(),
        }
    }
}

/// 交给展示层的完整报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub job: AnalysisJob,
    pub overall_score: Option<f64>,
    pub breakdown: Vec<ScoreBreakdown>,
}
