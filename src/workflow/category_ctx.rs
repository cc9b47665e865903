//! 类别评估上下文
//!
//! 封装"我正在评估哪个任务的哪个类别"这一信息

use std::fmt::Display;

use crate::models::{Category, JobId};

/// 类别评估上下文
#[derive(Debug, Clone)]
pub struct CategoryCtx {
    /// 任务ID
    pub job_id: JobId,

    /// 类别在本任务中的序号（从1开始，仅用于日志显示）
    pub index: usize,

    /// 本任务的类别总数
    pub total: usize,

    pub category: Category,
}

impl CategoryCtx {
    pub fn new(job_id: JobId, index: usize, total: usize, category: Category) -> Self {
        Self {
            job_id,
            index,
            total,
            category,
        }
    }
}

impl Display for CategoryCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[任务 {} 类别 {}/{} {}]",
            self.job_id.short(),
            self.index,
            self.total,
            self.category
        )
    }
}
