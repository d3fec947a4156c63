//! AI 助手聊天模块
//!
//! 没有远端订阅：历史记录保存在本地存储和内存中，每次发送调用一次外部补全服务。

pub mod api;
pub mod listener;
pub mod models;
pub mod service;

pub use api::{
    CompletionError, CompletionMessage, CompletionOptions, CompletionService,
    OpenAiCompletionClient,
};
pub use listener::{ChatListener, EmptyChatListener};
pub use models::{ChatMessage, ChatRole, CompletionConfig};
pub use service::ChatSyncer;
