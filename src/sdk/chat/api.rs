//! 外部补全服务（ECS）
//!
//! 无状态的“消息列表 -> 文本”调用。控制器只依赖 [`CompletionService`]，
//! 默认实现是兼容 OpenAI `chat/completions` 接口的 HTTP 客户端。

use crate::sdk::chat::models::ChatRole;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

/// 发送给补全服务的一条上下文消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMessage {
    pub role: ChatRole,
    pub content: String,
}

impl CompletionMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// 单次请求参数
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub api_key: Option<String>,
}

impl CompletionOptions {
    /// 发请求前校验参数，返回可用的 API key
    pub fn validate(&self) -> Result<&str, CompletionError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(CompletionError::InvalidOptions(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if !(1..=4096).contains(&self.max_tokens) {
            return Err(CompletionError::InvalidOptions(format!(
                "max_tokens must be within 1..=4096, got {}",
                self.max_tokens
            )));
        }
        match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(CompletionError::MissingCredential),
        }
    }
}

/// 补全调用失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("no API key configured")]
    MissingCredential,

    #[error("API key was rejected")]
    InvalidCredential,

    #[error("invalid completion options: {0}")]
    InvalidOptions(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
}

impl CompletionError {
    /// 展示给用户的提示（写入错误消息）
    pub fn user_message(&self) -> &'static str {
        match self {
            CompletionError::MissingCredential => {
                "The assistant is not configured yet: no API key has been set."
            }
            CompletionError::InvalidCredential => {
                "The assistant could not sign in. Please check the API key."
            }
            CompletionError::InvalidOptions(_) => {
                "The assistant settings are invalid. Please review them and try again."
            }
            CompletionError::Network(_) => {
                "Could not reach the assistant. Check your connection and try again."
            }
            CompletionError::MalformedResponse(_) => {
                "The assistant returned an unexpected response. Please try again."
            }
        }
    }
}

/// 补全服务接口
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        messages: &[CompletionMessage],
        options: &CompletionOptions,
    ) -> Result<String, CompletionError>;
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [CompletionMessage],
    temperature: f32,
    max_tokens: u32,
}

/// 兼容 OpenAI 的补全客户端
pub struct OpenAiCompletionClient {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiCompletionClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletionClient {
    async fn complete(
        &self,
        messages: &[CompletionMessage],
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let api_key = options.validate()?;
        let operation_id = Uuid::new_v4().to_string();
        let url = self.url();

        info!(
            "[ChatAPI] 📡 请求补全，模型: {}, 上下文 {} 条",
            options.model,
            messages.len()
        );
        debug!("[ChatAPI]   请求URL: {}, 操作ID: {}", url, operation_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .header("operationID", &operation_id)
            .json(&CompletionRequest {
                model: &options.model,
                messages,
                temperature: options.temperature,
                max_tokens: options.max_tokens,
            })
            .send()
            .await
            .map_err(|e| {
                error!("[ChatAPI] 请求发送失败: {}", e);
                CompletionError::Network(e.to_string())
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            error!("[ChatAPI] 凭据被拒绝，HTTP状态: {}", status);
            return Err(CompletionError::InvalidCredential);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CompletionError::Network(format!("读取响应 body 失败: {}", e)))?;
        if !status.is_success() {
            let body_str = String::from_utf8_lossy(&body);
            error!("[ChatAPI] 补全请求失败，HTTP状态: {}, 响应: {}", status, body_str);
            return Err(CompletionError::Network(format!("HTTP {}", status)));
        }

        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;
        let content = extract_content(&value)?;
        debug!("[ChatAPI] ✅ 补全完成，{} 字符", content.chars().count());
        Ok(content)
    }
}

/// 取 `choices[0].message.content`
fn extract_content(value: &serde_json::Value) -> Result<String, CompletionError> {
    value
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .ok_or_else(|| {
            CompletionError::MalformedResponse("missing choices[0].message.content".to_string())
        })
}
