//! 聊天消息模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 消息发送方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// 一条聊天消息
///
/// 助手回复在补全完成前是一条 `pending` 占位消息，完成后原地替换为正文，
/// 失败则替换为 `error = true` 的提示文本，ID 保持不变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub role: ChatRole,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub error: bool,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            created_at: at,
            role: ChatRole::User,
            pending: false,
            error: false,
        }
    }

    /// 助手占位消息
    pub fn placeholder(at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: String::new(),
            created_at: at,
            role: ChatRole::Assistant,
            pending: true,
            error: false,
        }
    }

    /// 占位消息落定为最终回复
    pub fn resolve(&mut self, text: String) {
        self.text = text;
        self.pending = false;
        self.error = false;
    }

    /// 占位消息落定为错误提示
    pub fn fail(&mut self, summary: String) {
        self.text = summary;
        self.pending = false;
        self.error = true;
    }

    /// 是否可以作为补全上下文
    pub fn is_context(&self) -> bool {
        !self.pending && !self.error
    }
}

/// 补全服务配置
#[derive(Clone, Debug)]
pub struct CompletionConfig {
    /// 兼容 OpenAI 的 API 基础地址
    pub base_url: String,
    pub model: String,
    /// 0.0 ~ 2.0
    pub temperature: f32,
    /// 1 ~ 4096
    pub max_tokens: u32,
    /// 为空时发送消息会得到“缺少凭据”的错误提示
    pub api_key: Option<String>,
    /// 每次请求前置的系统提示
    pub system_prompt: Option<String>,
    /// 作为上下文发送的最近消息条数
    pub context_window: usize,
}

impl CompletionConfig {
    /// 创建默认配置
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            api_key,
            system_prompt: Some(
                "You are a farm management assistant. Give practical, concise advice about \
                 crops, soil, irrigation, pests and weather."
                    .to_string(),
            ),
            context_window: 10,
        }
    }
}
