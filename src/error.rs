//! 错误类型
//!
//! 整条审计流水线共用一个错误枚举 [`AppError`]，按故障性质分类：
//! 配置、连接、超时、校验、页面提取、模型服务、持久化。
//! 部分失败（`partial_failure`）是任务状态，不是错误。

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 可能超时的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// 等待浏览器 worker
    WorkerAcquire,
    /// 页面导航
    Navigation,
    /// AI 评分调用
    AiCall,
    /// 持久化写入
    Persistence,
    /// 整个任务
    Job,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::WorkerAcquire => "worker_acquire",
            Stage::Navigation => "navigation",
            Stage::AiCall => "ai_call",
            Stage::Persistence => "persistence",
            Stage::Job => "job",
        };
        f.write_str(name)
    }
}

/// 页面提取失败原因代码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionReason {
    /// 导航超时
    NavigationTimeout,
    /// DNS / 连接等导航失败
    NavigationFailed,
    /// 最终 HTTP 状态码不在 2xx/3xx
    HttpStatus,
    /// 提取脚本执行失败
    ScriptFailed,
    /// 浏览器进程或连接崩溃
    BrowserCrashed,
}

impl fmt::Display for ExtractionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ExtractionReason::NavigationTimeout => "navigation_timeout",
            ExtractionReason::NavigationFailed => "navigation_failed",
            ExtractionReason::HttpStatus => "http_status",
            ExtractionReason::ScriptFailed => "script_failed",
            ExtractionReason::BrowserCrashed => "browser_crashed",
        };
        f.write_str(code)
    }
}

/// 错误分类名，写入任务记录的 `failure.kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ConfigurationError,
    ConnectionError,
    TimeoutError,
    ValidationError,
    ExtractionError,
    ProviderError,
    NotFound,
    PersistenceError,
    Cancelled,
}

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 启动前的配置错误（致命）
    #[error("配置错误: {0}")]
    Configuration(String),

    /// 浏览器 / AI / 存储不可达
    #[error("连接错误 ({target}): {message}")]
    Connection { target: String, message: String },

    /// 某个阶段超时
    #[error("{stage} 阶段超时 (限制 {after:?})")]
    Timeout { stage: Stage, after: Duration },

    /// 输入不合法，或 AI 回复不符合约定格式
    #[error("校验失败: {0}")]
    Validation(String),

    /// 页面加载 / 提取失败
    #[error("页面提取失败 [{reason}]: {message}")]
    Extraction {
        reason: ExtractionReason,
        message: String,
    },

    /// 模型服务拒绝请求
    #[error("模型服务错误 (状态 {status:?}): {message}")]
    Provider { status: Option<u16>, message: String },

    /// 任务不存在
    #[error("任务不存在: {0}")]
    NotFound(String),

    /// 持久化读写失败
    #[error("持久化错误: {0}")]
    Persistence(String),
}

impl AppError {
    /// 分类名
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Configuration(_) => ErrorKind::ConfigurationError,
            AppError::Connection { .. } => ErrorKind::ConnectionError,
            AppError::Timeout { .. } => ErrorKind::TimeoutError,
            AppError::Validation(_) => ErrorKind::ValidationError,
            AppError::Extraction { .. } => ErrorKind::ExtractionError,
            AppError::Provider { .. } => ErrorKind::ProviderError,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Persistence(_) => ErrorKind::PersistenceError,
        }
    }

    /// 传输层错误可以退避重试：超时、连接失败、限流、5xx
    pub fn is_retriable(&self) -> bool {
        match self {
            AppError::Connection { .. } | AppError::Timeout { .. } => true,
            AppError::Provider { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            AppError::Persistence(_) => true,
            _ => false,
        }
    }

    /// 会让浏览器 worker 失效的错误，这类 worker 不再归还到池中
    pub fn is_worker_fault(&self) -> bool {
        matches!(
            self,
            AppError::Extraction {
                reason: ExtractionReason::BrowserCrashed,
                ..
            }
        )
    }

    pub fn timeout(stage: Stage, after: Duration) -> Self {
        AppError::Timeout { stage, after }
    }

    pub fn connection(target: impl Into<String>, message: impl fmt::Display) -> Self {
        AppError::Connection {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub fn extraction(reason: ExtractionReason, message: impl fmt::Display) -> Self {
        AppError::Extraction {
            reason,
            message: message.to_string(),
        }
    }
}

// ========== 从常见错误类型转换 ==========

impl From<chromiumoxide::error::CdpError> for AppError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        use chromiumoxide::error::CdpError;
        let reason = match &err {
            CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
                ExtractionReason::BrowserCrashed
            }
            CdpError::Timeout => ExtractionReason::NavigationTimeout,
            _ => ExtractionReason::ScriptFailed,
        };
        AppError::extraction(reason, err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON 解析失败: {}", err))
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Configuration(format!("TOML 解析失败: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Persistence(err.to_string())
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
