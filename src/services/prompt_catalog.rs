//! 提示词目录 - 业务能力层
//!
//! 模板按明确的类别标签查找，不根据名称或正文猜测类别。
//! 内置模板编译进二进制，用户文件（TOML）按 id 覆盖或追加。

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::models::{AnalysisType, Category, CategoryPrompt, PromptTemplate};

const BUILTIN_PROMPTS: &str = include_str!("../../prompts/default_prompts.toml");

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    templates: Vec<PromptTemplate>,
}

/// 提示词目录
#[derive(Debug, Clone)]
pub struct PromptCatalog {
    templates: Vec<PromptTemplate>,
}

impl PromptCatalog {
    /// 内置模板
    pub fn builtin() -> AppResult<Self> {
        let catalog = Self::from_toml_str(BUILTIN_PROMPTS)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// 从 TOML 文本解析，不做完整性校验
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let file: CatalogFile = toml::from_str(content)?;
        Ok(Self {
            templates: file.templates,
        })
    }

    /// 加载内置模板，并合并可选的用户文件
    pub async fn load(user_file: Option<&Path>) -> AppResult<Self> {
        let mut catalog = Self::from_toml_str(BUILTIN_PROMPTS)?;

        if let Some(path) = user_file {
            let content = fs::read_to_string(path).await.map_err(|e| {
                AppError::Configuration(format!("无法读取提示词文件 {}: {}", path.display(), e))
            })?;
            let user = Self::from_toml_str(&content)?;
            info!(
                "✓ 从 {} 加载了 {} 个提示词模板",
                path.display(),
                user.templates.len()
            );
            catalog.merge(user);
        }

        catalog.validate()?;
        debug!("提示词目录共 {} 个模板", catalog.templates.len());
        Ok(catalog)
    }

    /// 合并另一个目录，同 id 的模板被替换
    pub fn merge(&mut self, other: PromptCatalog) {
        for template in other.templates {
            match self.templates.iter_mut().find(|t| t.id == template.id) {
                Some(existing) => *existing = template,
                None => self.templates.push(template),
            }
        }
    }

    /// 完整性校验：id 唯一，每个类别恰好一个默认模板
    pub fn validate(&self) -> AppResult<()> {
        let mut seen = HashSet::new();
        for t in &self.templates {
            if t.id.trim().is_empty() {
                return Err(AppError::Configuration("提示词模板 id 不能为空".into()));
            }
            if !seen.insert(t.id.as_str()) {
                return Err(AppError::Configuration(format!(
                    "提示词模板 id 重复: {}",
                    t.id
                )));
            }
        }

        for category in Category::all() {
            let defaults: Vec<_> = self
                .templates
                .iter()
                .filter(|t| t.category == category && t.is_default)
                .collect();
            match defaults.len() {
                0 => {
                    return Err(AppError::Configuration(format!(
                        "类别 {} 没有默认提示词模板",
                        category
                    )))
                }
                1 if defaults[0].body.trim().is_empty() => {
                    return Err(AppError::Configuration(format!(
                        "类别 {} 的默认模板 {} 正文为空",
                        category, defaults[0].id
                    )))
                }
                1 => {}
                n => {
                    return Err(AppError::Configuration(format!(
                        "类别 {} 有 {} 个默认模板，只能有一个",
                        category, n
                    )))
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&PromptTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// 某个类别的默认模板
    pub fn default_for(&self, category: Category) -> AppResult<&PromptTemplate> {
        self.templates
            .iter()
            .find(|t| t.category == category && t.is_default)
            .ok_or_else(|| {
                AppError::Configuration(format!("类别 {} 没有默认提示词模板", category))
            })
    }

    /// 为一次任务选出各类别的模板副本
    ///
    /// - 普通分析类型：按期望类别顺序取默认模板
    /// - `custom`：使用指定 id 的模板，类别取模板自身的标签
    pub fn resolve_prompts(
        &self,
        analysis_type: AnalysisType,
        custom_prompt_id: Option<&str>,
    ) -> AppResult<Vec<CategoryPrompt>> {
        if analysis_type == AnalysisType::Custom {
            let id = custom_prompt_id
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| AppError::Validation("custom 分析必须指定提示词模板 id".into()))?;
            let template = self
                .get(id)
                .ok_or_else(|| AppError::Validation(format!("提示词模板不存在: {}", id)))?;
            if template.body.trim().is_empty() {
                return Err(AppError::Validation(format!("提示词模板 {} 正文为空", id)));
            }
            return Ok(vec![CategoryPrompt::from(template)]);
        }

        analysis_type
            .expected_categories()
            .iter()
            .map(|category| self.default_for(*category).map(CategoryPrompt::from))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
