//! 告警监听器回调接口

use crate::sdk::sync::SyncState;
use async_trait::async_trait;

/// 告警监听器
#[async_trait]
pub trait AlertListener: Send + Sync {
    /// 告警列表发生变化，参数为 JSON 数组字符串
    async fn on_alert_list_changed(&self, alerts_json: String);

    /// 未读数量（每次列表变化后重新计算）
    async fn on_unread_count_changed(&self, count: usize);

    async fn on_sync_state_changed(&self, state: SyncState);

    /// 变更提交失败，参数为 JSON 对象字符串
    async fn on_mutation_failed(&self, failure_json: String);
}

/// 默认空实现（无操作）
pub struct EmptyAlertListener;

#[async_trait]
impl AlertListener for EmptyAlertListener {
    async fn on_alert_list_changed(&self, _alerts_json: String) {}

    async fn on_unread_count_changed(&self, _count: usize) {}

    async fn on_sync_state_changed(&self, _state: SyncState) {}

    async fn on_mutation_failed(&self, _failure_json: String) {}
}
