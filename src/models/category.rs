use std::fmt;

use serde::{Deserialize, Serialize};

/// SEO 评分类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// 技术（抓取、索引、规范化）
    Technical,
    /// 内容质量
    Content,
    /// 标题与元标签
    Meta,
    /// 加载性能
    Performance,
    /// 链接结构
    Links,
    /// 本地搜索
    Local,
    /// 竞品对比
    Competitor,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Technical => "technical",
            Category::Content => "content",
            Category::Meta => "meta",
            Category::Performance => "performance",
            Category::Links => "links",
            Category::Local => "local",
            Category::Competitor => "competitor",
        }
    }

    pub fn all() -> [Category; 7] {
        [
            Category::Technical,
            Category::Content,
            Category::Meta,
            Category::Performance,
            Category::Links,
            Category::Local,
            Category::Competitor,
        ]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 类别评分状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Ok,
    Failed,
    TimedOut,
}

/// 问题严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }
}

/// 审计发现的问题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_hint: Option<String>,
}

/// 单个类别的评分结果
///
/// 不变量：`0 <= score <= max_score`。非 `Ok` 结果的分数为 0，
/// 并在 `detail` 中说明原因。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryResult {
    pub category: Category,
    pub score: f64,
    pub max_score: f64,
    #[serde(default)]
    pub issues: Vec<Issue>,
    pub status: CategoryStatus,
    /// 评分时使用的模板
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    /// 失败 / 超时原因
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// 非成功结果使用的满分值
const DEFAULT_MAX_SCORE: f64 = 100.0;

impl CategoryResult {
    /// 成功评分，分数会被夹到 `[0, max_score]`
    pub fn scored(
        category: Category,
        template_id: Option<String>,
        score: f64,
        max_score: f64,
        issues: Vec<Issue>,
    ) -> Self {
        let max_score = if max_score > 0.0 { max_score } else { DEFAULT_MAX_SCORE };
        Self {
            category,
            score: score.clamp(0.0, max_score),
            max_score,
            issues,
            status: CategoryStatus::Ok,
            template_id,
            detail: None,
        }
    }

    pub fn failed(category: Category, template_id: Option<String>, detail: impl Into<String>) -> Self {
        Self::unscored(category, template_id, CategoryStatus::Failed, detail.into())
    }

    pub fn timed_out(category: Category, template_id: Option<String>, detail: impl Into<String>) -> Self {
        Self::unscored(category, template_id, CategoryStatus::TimedOut, detail.into())
    }

    fn unscored(
        category: Category,
        template_id: Option<String>,
        status: CategoryStatus,
        detail: String,
    ) -> Self {
        Self {
            category,
            score: 0.0,
            max_score: DEFAULT_MAX_SCORE,
            issues: Vec::new(),
            status,
            template_id,
            detail: Some(detail),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == CategoryStatus::Ok
    }
}
