//! AI 回复解析 - 业务能力层
//!
//! 模型的自由文本回复不是可靠的传输格式，这里按固定语法严格校验：
//!
//! ```text
//! {"score": <数字>, "max_score": <正数>,
//!  "issues": [{"severity": "critical|high|medium|low|info",
//!              "message": "<非空>", "location": "<可选>"}]}
//! ```
//!
//! 整个回复必须是这个 JSON 对象，或者是只包住它的一个 ``` 代码块。
//! 不做"尽力而为"的字符串抓取。

use regex::Regex;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::{Issue, Severity};

/// 单个回复允许的最大问题数
pub const MAX_ISSUES: usize = 50;

/// 写进系统提示词的回复语法说明
pub const REPLY_GRAMMAR: &str = r#"只返回一个 JSON 对象，不要输出任何其他文字：
{"score": <0 到 max_score 之间的数字>, "max_score": <大于 0 的数字，通常为 100>,
 "issues": [{"severity": "critical|high|medium|low|info", "message": "<问题描述>", "location": "<可选，页面位置>"}]}"#;

/// 通过校验的回复
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredReply {
    pub score: f64,
    pub max_score: f64,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReply {
    score: f64,
    max_score: f64,
    issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIssue {
    severity: String,
    message: String,
    #[serde(default)]
    location: Option<String>,
}

const FENCE_PATTERN: &str = r"(?s)\A```[A-Za-z]*[ \t]*\r?\n(.*?)\r?\n?```\z";

/// 取出回复中的 JSON 文本
fn json_body(reply: &str) -> AppResult<&str> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("回复为空".into()));
    }
    let fence = Regex::new(FENCE_PATTERN)
        .map_err(|e| AppError::Configuration(format!("代码块正则无效: {}", e)))?;
    let body = match fence.captures(trimmed) {
        Some(caps) => caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default(),
        None => trimmed,
    };
    if !(body.starts_with('{') && body.ends_with('}')) {
        return Err(AppError::Validation(
            "回复必须是单个 JSON 对象，不能包含其他文字".into(),
        ));
    }
    Ok(body)
}

/// 严格解析模型回复
pub fn parse_reply(reply: &str) -> AppResult<ScoredReply> {
    let body = json_body(reply)?;
    let raw: RawReply = serde_json::from_str(body)
        .map_err(|e| AppError::Validation(format!("回复不符合约定结构: {}", e)))?;

    if !raw.max_score.is_finite() || raw.max_score <= 0.0 {
        return Err(AppError::Validation(format!(
            "max_score 必须是正数，实际为 {}",
            raw.max_score
        )));
    }
    if !raw.score.is_finite() || raw.score < 0.0 || raw.score > raw.max_score {
        return Err(AppError::Validation(format!(
            "score {} 超出范围 [0, {}]",
            raw.score, raw.max_score
        )));
    }
    if raw.issues.len() > MAX_ISSUES {
        return Err(AppError::Validation(format!(
            "issues 数量 {} 超过上限 {}",
            raw.issues.len(),
            MAX_ISSUES
        )));
    }

    let mut issues = Vec::with_capacity(raw.issues.len());
    for (idx, item) in raw.issues.into_iter().enumerate() {
        let severity = Severity::parse(&item.severity).ok_or_else(|| {
            AppError::Validation(format!(
                "issues[{}].severity 非法: '{}'",
                idx, item.severity
            ))
        })?;
        let message = item.message.trim().to_string();
        if message.is_empty() {
            return Err(AppError::Validation(format!("issues[{}].message 为空", idx)));
        }
        issues.push(Issue {
            severity,
            message,
            location_hint: item
                .location
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty()),
        });
    }

    Ok(ScoredReply {
        score: raw.score,
        max_score: raw.max_score,
        issues,
    })
}

/// 校验失败后发给模型的纠正指令
pub fn corrective_instruction(violation: &AppError) -> String {
    format!(
        "上一条回复无法通过校验（{}）。请严格按照约定格式重新回答。\n{}",
        violation, REPLY_GRAMMAR
    )
}
