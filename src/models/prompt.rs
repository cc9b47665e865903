use serde::{Deserialize, Serialize};

use super::category::Category;

/// 提示词模板
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    /// 明确的类别标签，选择模板时按标签查找
    pub category: Category,
    /// 是否为该类别的默认模板
    #[serde(default)]
    pub is_default: bool,
    pub body: String,
}

/// 任务受理时捕获的模板副本
///
/// 任务运行期间只使用这份副本，目录后续变化不会影响已受理的任务。
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryPrompt {
    pub category: Category,
    pub template_id: String,
    pub template_name: String,
    pub body: String,
}

impl From<&PromptTemplate> for CategoryPrompt {
    fn from(t: &PromptTemplate) -> Self {
        Self {
            category: t.category,
            template_id: t.id.clone(),
            template_name: t.name.clone(),
            body: t.body.clone(),
        }
    }
}
