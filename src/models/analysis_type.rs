use std::fmt;

use serde::{Deserialize, Serialize};

use super::category::Category;

/// 分析类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisType {
    /// 完整 SEO 审计
    CompleteSeoAudit,
    /// 内容分析
    ContentAnalysis,
    /// 技术 SEO
    TechnicalSeo,
    /// 竞品分析
    CompetitorAnalysis,
    /// 本地 SEO
    LocalSeo,
    /// 自定义提示词
    Custom,
}

/// 外部名称 → 分析类型
static ANALYSIS_TYPES: phf::Map<&'static str, AnalysisType> = phf::phf_map! {
    "complete-seo-audit" => AnalysisType::CompleteSeoAudit,
    "content-analysis" => AnalysisType::ContentAnalysis,
    "technical-seo" => AnalysisType::TechnicalSeo,
    "competitor-analysis" => AnalysisType::CompetitorAnalysis,
    "local-seo" => AnalysisType::LocalSeo,
    "custom" => AnalysisType::Custom,
};

impl AnalysisType {
    /// 从外部名称解析（精确匹配，忽略首尾空白和大小写）
    pub fn parse(s: &str) -> Option<Self> {
        ANALYSIS_TYPES.get(s.trim().to_ascii_lowercase().as_str()).copied()
    }

    /// 外部名称
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisType::CompleteSeoAudit => "complete-seo-audit",
            AnalysisType::ContentAnalysis => "content-analysis",
            AnalysisType::TechnicalSeo => "technical-seo",
            AnalysisType::CompetitorAnalysis => "competitor-analysis",
            AnalysisType::LocalSeo => "local-seo",
            AnalysisType::Custom => "custom",
        }
    }

    /// 该类型固定需要评分的类别，顺序即展示顺序
    ///
    /// `Custom` 的类别由所选模板决定，这里返回空列表。
    pub fn expected_categories(self) -> &'static [Category] {
        match self {
            AnalysisType::CompleteSeoAudit => &[
                Category::Technical,
                Category::Content,
                Category::Meta,
                Category::Performance,
            ],
            AnalysisType::ContentAnalysis => &[Category::Content, Category::Meta],
            AnalysisType::TechnicalSeo => {
                &[Category::Technical, Category::Performance, Category::Links]
            }
            AnalysisType::CompetitorAnalysis => &[Category::Competitor, Category::Content],
            AnalysisType::LocalSeo => &[Category::Local, Category::Meta],
            AnalysisType::Custom => &[],
        }
    }

    /// 全部已知类型
    pub fn all() -> [AnalysisType; 6] {
        [
            AnalysisType::CompleteSeoAudit,
            AnalysisType::ContentAnalysis,
            AnalysisType::TechnicalSeo,
            AnalysisType::CompetitorAnalysis,
            AnalysisType::LocalSeo,
            AnalysisType::Custom,
        ]
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
