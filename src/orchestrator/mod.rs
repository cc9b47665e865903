//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责任务受理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `audit_service` - 审计服务
//! - 受理任务（submit）、查询（get_status）、取消（cancel）
//! - 等待终态（wait）、生成报告（report）
//! - 维护进行中任务的登记表
//!
//! ### `job_processor` - 单个任务处理器
//! - 状态机 `queued → running → 终态`
//! - 一次页面快照，按类别并发分发（Semaphore）
//! - 截止时间与协作式取消
//! - 汇总并写入存储
//!
//! ### `intake` - 受理校验
//! - URL、分析类型、自定义模板
//!
//! ## 层次关系
//!
//! ```text
//! audit_service (处理 Vec<Job>)
//!     ↓
//! job_processor (处理 Vec<Category>)
//!     ↓
//! workflow::CategoryFlow (处理单个 Category)
//!     ↓
//! services (能力层：extract / score / aggregate / persist)
//!     ↓
//! infrastructure + browser (JsExecutor、worker 池)
//! ```

pub mod audit_service;
pub mod intake;
pub mod job_processor;

// 重新导出主要类型
pub use audit_service::AuditService;
pub use intake::SubmitOptions;
pub use job_processor::{PipelineContext, PipelineSettings};
