//! LLM 服务 - 业务能力层
//!
//! 只负责"把消息发给模型、拿回文本"，不关心评分语义。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult, Stage};

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// 一条对话消息
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// 一次补全请求
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// 回复的最大 token 数
    pub max_output_tokens: u32,
}

/// 模型调用接口
///
/// 评分客户端只依赖这个 trait，方便替换服务商或在测试中注入假实现。
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// 发送请求，返回模型回复的文本
    async fn complete(&self, request: &CompletionRequest) -> AppResult<String>;

    /// 模型名称（用于日志）
    fn model_name(&self) -> &str;
}

/// LLM 服务
///
/// 职责：
/// - 持有 OpenAI 兼容客户端
/// - 把 [`CompletionRequest`] 转成聊天补全调用
/// - 把服务商错误映射为 [`AppError`]
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    call_timeout: Duration,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        let client = Client::with_config(openai_config);

        Self {
            client,
            model_name: config.llm_model_name.clone(),
            call_timeout: config.ai_call_timeout,
        }
    }

    fn build_messages(
        &self,
        messages: &[ChatMessage],
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut out = Vec::with_capacity(messages.len());
        for msg in messages {
            let converted = match msg.role {
                ChatRole::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(msg.content.as_str())
                        .build()?,
                ),
                ChatRole::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(msg.content.as_str())
                        .build()?,
                ),
                ChatRole::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(msg.content.as_str())
                        .build()?,
                ),
            };
            out.push(converted);
        }
        Ok(out)
    }

    /// 服务商错误分类
    fn map_error(&self, err: OpenAIError) -> AppError {
        match err {
            OpenAIError::Reqwest(e) => {
                if e.is_timeout() {
                    AppError::timeout(Stage::AiCall, self.call_timeout)
                } else if let Some(status) = e.status() {
                    AppError::Provider {
                        status: Some(status.as_u16()),
                        message: e.to_string(),
                    }
                } else {
                    AppError::connection(&self.model_name, e)
                }
            }
            OpenAIError::ApiError(api) => {
                let tag = format!(
                    "{} {}",
                    api.r#type.as_deref().unwrap_or_default(),
                    api.code.as_deref().unwrap_or_default()
                );
                let status = if tag.contains("rate_limit") {
                    429
                } else if tag.contains("server_error") || tag.contains("overloaded") {
                    503
                } else {
                    400
                };
                AppError::Provider {
                    status: Some(status),
                    message: api.message,
                }
            }
            other => AppError::Provider {
                status: Some(400),
                message: other.to_string(),
            },
        }
    }
}

#[async_trait]
impl CompletionBackend for LlmService {
    async fn complete(&self, request: &CompletionRequest) -> AppResult<String> {
        debug!(
            "调用 LLM API，模型: {}，消息数: {}",
            self.model_name,
            request.messages.len()
        );

        let messages = self
            .build_messages(&request.messages)
            .map_err(|e| AppError::Validation(format!("构建请求消息失败: {}", e)))?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(0.2)
            .max_tokens(request.max_output_tokens)
            .build()
            .map_err(|e| AppError::Validation(format!("构建请求失败: {}", e)))?;

        let response = self.client.chat().create(chat_request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            self.map_error(e)
        })?;

        debug!("LLM API 调用成功");

        // 内容为空时交给解析器按格式错误处理
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        Ok(content.trim().to_string())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service() -> LlmService {
        let config = OpenAIConfig::new()
            .with_api_key("sk-test")
            .with_api_base("http://127.0.0.1:9/v1");

        LlmService {
            client: Client::with_config(config),
            model_name: "gpt-4o-mini".to_string(),
            call_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_build_messages_keeps_order_and_roles() {
        let service = create_test_service();
        let messages = service
            .build_messages(&[
                ChatMessage::system("sys"),
                ChatMessage::user("score this page"),
                ChatMessage::assistant("bad answer"),
                ChatMessage::user("fix it"),
            ])
            .unwrap();
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[2], ChatCompletionRequestMessage::Assistant(_)));
        assert!(matches!(messages[3], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_invalid_argument_is_not_retriable() {
        let service = create_test_service();
        let err = service.map_error(OpenAIError::InvalidArgument("bad".into()));
        assert!(!err.is_retriable());
    }

    /// 连接不存在的端点，应当得到可重试的连接错误
    #[tokio::test]
    #[ignore]
    async fn test_unreachable_endpoint_is_retriable() {
        let _ = tracing_subscriber::fmt::try_init();
        let service = create_test_service();
        let err = service
            .complete(&CompletionRequest {
                messages: vec![ChatMessage::user("ping")],
                max_output_tokens: 16,
            })
            .await
            .unwrap_err();
        assert!(err.is_retriable(), "{}", err);
    }
}
