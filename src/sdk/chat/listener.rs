//! 聊天监听器回调接口

use async_trait::async_trait;

/// 聊天监听器
#[async_trait]
pub trait ChatListener: Send + Sync {
    /// 消息列表发生变化，参数为 JSON 数组字符串（按时间正序）
    async fn on_message_list_changed(&self, messages_json: String);

    /// 是否有补全请求在途
    async fn on_sending_changed(&self, sending: bool);
}

/// 默认空实现（无操作）
pub struct EmptyChatListener;

#[async_trait]
impl ChatListener for EmptyChatListener {
    async fn on_message_list_changed(&self, _messages_json: String) {}

    async fn on_sending_changed(&self, _sending: bool) {}
}
