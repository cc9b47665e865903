//! AI 评分客户端 - 业务能力层
//!
//! 提示词 + 页面快照 → 类别得分。
//!
//! - 传输层错误（超时、连接、限流、5xx）按 [`RetryPolicy`] 退避重试
//! - 回复不符合语法时带纠正指令重试一次
//! - 任何失败都只落到当前类别的结果里，不会向上抛出

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, Stage};
use crate::models::{CategoryPrompt, CategoryResult, PageSnapshot};
use crate::services::llm_service::{ChatMessage, CompletionBackend, CompletionRequest};
use crate::services::reply_parser::{self, ScoredReply, REPLY_GRAMMAR};
use crate::services::retry::RetryPolicy;
use crate::utils::logging::truncate_text;

/// 评分客户端配置
#[derive(Debug, Clone)]
pub struct ScoringSettings {
    pub retry: RetryPolicy,
    /// 单次模型调用超时
    pub call_timeout: Duration,
    pub max_output_tokens: u32,
    /// 快照 JSON 的最大字符数
    pub max_context_chars: usize,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
            max_output_tokens: 1024,
            max_context_chars: 12_000,
        }
    }
}

/// AI 评分客户端
pub struct ScoringClient {
    backend: Arc<dyn CompletionBackend>,
    settings: ScoringSettings,
}

impl ScoringClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: ScoringSettings) -> Self {
        Self { backend, settings }
    }

    /// 对一个类别评分，失败时返回 `failed` 结果
    pub async fn score(&self, prompt: &CategoryPrompt, snapshot: &PageSnapshot) -> CategoryResult {
        match self.try_score(prompt, snapshot).await {
            Ok(reply) => CategoryResult::scored(
                prompt.category,
                Some(prompt.template_id.clone()),
                reply.score,
                reply.max_score,
                reply.issues,
            ),
            Err(e) => {
                warn!("类别 {} 评分失败: {}", prompt.category, e);
                CategoryResult::failed(prompt.category, Some(prompt.template_id.clone()), e.to_string())
            }
        }
    }

    async fn try_score(&self, prompt: &CategoryPrompt, snapshot: &PageSnapshot) -> AppResult<ScoredReply> {
        let mut messages = self.build_messages(prompt, snapshot);

        let reply = self.call_with_retry(prompt, &messages).await?;
        let violation = match reply_parser::parse_reply(&reply) {
            Ok(parsed) => return Ok(parsed),
            Err(e) => e,
        };

        // 只纠正一次
        warn!(
            "类别 {} 的回复未通过校验: {}，回复: {}",
            prompt.category,
            violation,
            truncate_text(&reply, 120)
        );
        messages.push(ChatMessage::assistant(reply));
        messages.push(ChatMessage::user(reply_parser::corrective_instruction(&violation)));

        let second = self.call_with_retry(prompt, &messages).await?;
        reply_parser::parse_reply(&second)
    }

    /// 带超时和退避重试的单次调用
    async fn call_with_retry(&self, prompt: &CategoryPrompt, messages: &[ChatMessage]) -> AppResult<String> {
        let request = CompletionRequest {
            messages: messages.to_vec(),
            max_output_tokens: self.settings.max_output_tokens,
        };
        let request = &request;
        let backend = self.backend.as_ref();
        let label = format!("类别 {} 的模型调用", prompt.category);
        let call_timeout = self.settings.call_timeout;

        self.settings
            .retry
            .run(&label, move |attempt| async move {
                debug!(
                    "调用模型 {} (类别 {}, 第 {} 次)",
                    backend.model_name(),
                    prompt.category,
                    attempt
                );
                match timeout(call_timeout, backend.complete(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::timeout(Stage::AiCall, call_timeout)),
                }
            })
            .await
    }

    fn build_messages(&self, prompt: &CategoryPrompt, snapshot: &PageSnapshot) -> Vec<ChatMessage> {
        let system = format!(
            "你是一名资深 SEO 审计专家，只根据提供的页面数据评估指定类别。\n{}",
            REPLY_GRAMMAR
        );
        let user = format!(
            "Category: {}\nTemplate: {}\n\n{}\n\n页面数据（JSON）：\n{}",
            prompt.category,
            prompt.template_name,
            prompt.body.trim(),
            snapshot.to_prompt_json(self.settings.max_context_chars)
        );
        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }
}
