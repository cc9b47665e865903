//! 任务受理校验 - 编排层
//!
//! 在创建任务之前完成所有"可以立即拒绝"的检查：
//! URL 格式、分析类型、自定义提示词是否可用。

use reqwest::Url;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::models::{AnalysisType, CategoryPrompt};
use crate::services::PromptCatalog;

/// 提交选项
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// `custom` 分析使用的模板 id
    pub custom_prompt_id: Option<String>,
}

impl SubmitOptions {
    pub fn custom(prompt_id: impl Into<String>) -> Self {
        Self {
            custom_prompt_id: Some(prompt_id.into()),
        }
    }
}

/// 通过校验的提交
#[derive(Debug, Clone)]
pub struct Intake {
    pub url: Url,
    pub analysis_type: AnalysisType,
    /// 按展示顺序排列，受理时捕获的副本
    pub prompts: Vec<CategoryPrompt>,
    pub custom_prompt_id: Option<String>,
}

/// 校验目标 URL：格式正确、http/https、有主机名
pub fn validate_url(raw: &str) -> AppResult<Url> {
    let raw = raw.trim();
    let url = Url::parse(raw).map_err(|e| AppError::Validation(format!("URL 格式错误 '{}': {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Validation(format!(
            "只支持 http/https，实际为 {}",
            url.scheme()
        )));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(AppError::Validation(format!("URL 缺少主机名: {}", raw))),
    }
}

/// 解析分析类型
///
/// 未知类型但带了自定义模板 id 时按 `custom` 处理；
/// 非 custom 类型带了模板 id 时忽略该 id。
pub fn resolve_analysis_type(
    raw: &str,
    custom_prompt_id: Option<&str>,
) -> AppResult<(AnalysisType, Option<String>)> {
    let custom_id = custom_prompt_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    match (AnalysisType::parse(raw), custom_id) {
        (Some(AnalysisType::Custom), id) => Ok((AnalysisType::Custom, id)),
        (Some(other), Some(id)) => {
            warn!("分析类型 {} 不使用自定义模板，忽略 {}", other, id);
            Ok((other, None))
        }
        (Some(other), None) => Ok((other, None)),
        (None, Some(id)) => {
            warn!("未知的分析类型 '{}'，按 custom 处理（模板 {}）", raw, id);
            Ok((AnalysisType::Custom, Some(id)))
        }
        (None, None) => Err(AppError::Validation(format!(
            "未知的分析类型: '{}'",
            raw
        ))),
    }
}

/// 完成全部受理校验
pub fn prepare(
    catalog: &PromptCatalog,
    url: &str,
    analysis_type: &str,
    options: &SubmitOptions,
) -> AppResult<Intake> {
    let url = validate_url(url)?;
    let (analysis_type, custom_prompt_id) =
        resolve_analysis_type(analysis_type, options.custom_prompt_id.as_deref())?;
    let prompts = catalog.resolve_prompts(analysis_type, custom_prompt_id.as_deref())?;

    Ok(Intake {
        url,
        analysis_type,
        prompts,
        custom_prompt_id,
    })
}
