//! 程序配置
//!
//! 所有配置来自环境变量，启动时一次性读取。
//! 缺少必填凭据（`DATABASE_URL`、`LLM_API_KEY`）或数值无法解析时，
//! 直接返回 [`AppError::Configuration`]，不会拖到第一次使用时才暴露。

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::services::retry::RetryPolicy;

/// 程序配置
#[derive(Clone)]
pub struct Config {
    // --- 存储 ---
    /// 任务存储地址，`memory://` 或 `file://<目录>`
    pub database_url: String,

    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 单次回复的最大 token 数
    pub llm_max_output_tokens: u32,
    /// 发送给模型的页面快照最大字符数
    pub llm_max_context_chars: usize,

    // --- 浏览器 ---
    /// 浏览器 worker 池容量 (N)
    pub browser_pool_size: usize,
    /// 浏览器可执行文件路径，不设置时自动探测
    pub browser_executable: Option<String>,
    /// 是否关闭沙盒，只应在受控环境（容器）中打开
    pub browser_no_sandbox: bool,

    // --- 并发与超时 ---
    /// 单个任务内同时评分的类别数 (M)
    pub category_concurrency: usize,
    pub worker_acquire_timeout: Duration,
    pub navigation_timeout: Duration,
    pub ai_call_timeout: Duration,
    pub persistence_timeout: Duration,
    pub job_timeout: Duration,

    // --- 重试 ---
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,

    // --- 其他 ---
    /// 自定义提示词目录（TOML）
    pub prompt_catalog_path: Option<String>,
    /// 运行日志文件
    pub log_file: Option<String>,
}

impl Config {
    /// 从进程环境变量读取配置
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源读取配置
    pub fn from_lookup<L>(lookup: L) -> AppResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            database_url: required(&get, "DATABASE_URL")?,
            llm_api_key: required(&get, "LLM_API_KEY")?,
            llm_api_base_url: get("LLM_API_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            llm_model_name: get("LLM_MODEL_NAME").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            llm_max_output_tokens: parsed(&get, "LLM_MAX_OUTPUT_TOKENS", 1024)?,
            llm_max_context_chars: parsed(&get, "LLM_MAX_CONTEXT_CHARS", 12_000)?,
            browser_pool_size: parsed(&get, "BROWSER_POOL_SIZE", 2)?,
            browser_executable: get("BROWSER_EXECUTABLE"),
            browser_no_sandbox: parsed(&get, "BROWSER_NO_SANDBOX", false)?,
            category_concurrency: parsed(&get, "CATEGORY_CONCURRENCY", 4)?,
            worker_acquire_timeout: secs(&get, "WORKER_ACQUIRE_TIMEOUT_SECS", 30)?,
            navigation_timeout: secs(&get, "NAVIGATION_TIMEOUT_SECS", 30)?,
            ai_call_timeout: secs(&get, "AI_CALL_TIMEOUT_SECS", 60)?,
            persistence_timeout: secs(&get, "PERSISTENCE_TIMEOUT_SECS", 10)?,
            job_timeout: secs(&get, "JOB_TIMEOUT_SECS", 300)?,
            retry_max_attempts: parsed(&get, "RETRY_MAX_ATTEMPTS", 3)?,
            retry_base_delay: Duration::from_millis(parsed(&get, "RETRY_BASE_DELAY_MS", 500)?),
            retry_max_delay: Duration::from_millis(parsed(&get, "RETRY_MAX_DELAY_MS", 8_000)?),
            prompt_catalog_path: get("PROMPT_CATALOG_PATH"),
            log_file: get("LOG_FILE"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.browser_pool_size == 0 {
            return Err(AppError::Configuration("BROWSER_POOL_SIZE 必须大于 0".into()));
        }
        if self.category_concurrency == 0 {
            return Err(AppError::Configuration("CATEGORY_CONCURRENCY 必须大于 0".into()));
        }
        if self.retry_max_attempts == 0 {
            return Err(AppError::Configuration("RETRY_MAX_ATTEMPTS 必须大于 0".into()));
        }
        Ok(())
    }

    /// 传输层重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: self.retry_base_delay,
            max_delay: self.retry_max_delay,
            ..RetryPolicy::default()
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("llm_api_key", &"<redacted>")
            .field("llm_api_base_url", &self.llm_api_base_url)
            .field("llm_model_name", &self.llm_model_name)
            .field("browser_pool_size", &self.browser_pool_size)
            .field("category_concurrency", &self.category_concurrency)
            .field("job_timeout", &self.job_timeout)
            .finish_non_exhaustive()
    }
}

// ========== 解析辅助函数 ==========

fn required<G>(get: &G, key: &str) -> AppResult<String>
where
    G: Fn(&str) -> Option<String>,
{
    get(key).ok_or_else(|| AppError::Configuration(format!("缺少必填环境变量 {}", key)))
}

fn parsed<G, T>(get: &G, key: &str, default: T) -> AppResult<T>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            AppError::Configuration(format!(
                "环境变量 {} 解析失败: 值 '{}' 无法转换为 {}",
                key,
                raw,
                std::any::type_name::<T>()
            ))
        }),
    }
}

fn secs<G>(get: &G, key: &str, default: u64) -> AppResult<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    parsed(get, key, default).map(Duration::from_secs)
}
