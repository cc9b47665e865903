//! # SEO Audit
//!
//! 对单个 URL 做 SEO 审计：无头浏览器提取页面特征，AI 按类别评分，汇总成报告。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page），只暴露能力
//! - `JsExecutor` - 标签页的唯一持有者，提供 eval() 能力
//! - `browser/` - 固定容量的无头浏览器 worker 池（RAII 归还）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，互不依赖流程
//! - `FeatureExtractor` - 页面 → 快照
//! - `PromptCatalog` - 类别 → 提示词模板
//! - `ScoringClient` / `LlmService` - 快照 + 提示词 → 类别得分
//! - `aggregator` - 类别得分 → 总分与明细
//! - `JobStore` - 任务持久化
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个类别"的完整评估流程
//! - `CategoryCtx` - 上下文封装（job_id + 类别）
//! - `CategoryFlow` - 流程编排（score → 校验 → 记录）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/audit_service` - 任务受理、查询、取消
//! - `orchestrator/job_processor` - 单个任务的状态机与类别并发
//!
//! ## 模块结构

pub mod app;
pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::App;
pub use config::Config;
pub use error::{AppError, AppResult, ErrorKind};
pub use infrastructure::JsExecutor;
pub use models::{AnalysisJob, AnalysisType, AuditReport, Category, JobId, JobStatus, PageSnapshot};
pub use orchestrator::{AuditService, PipelineContext, PipelineSettings, SubmitOptions};
pub use workflow::{CategoryCtx, CategoryFlow};
