//! 农场监听器回调接口

use crate::sdk::sync::SyncState;
use async_trait::async_trait;

/// 农场监听器
#[async_trait]
pub trait FarmListener: Send + Sync {
    /// 农场列表发生变化，参数为 JSON 数组字符串（已过滤、已排序）
    async fn on_farm_list_changed(&self, farms_json: String);

    /// 当前选中的农场变化（`None` 表示没有可选农场）
    async fn on_selected_farm_changed(&self, farm_id: Option<String>);

    /// 同步状态变化
    async fn on_sync_state_changed(&self, state: SyncState);

    /// 变更提交失败，参数为 JSON 对象字符串
    async fn on_mutation_failed(&self, failure_json: String);
}

/// 默认空实现（无操作）
pub struct EmptyFarmListener;

#[async_trait]
impl FarmListener for EmptyFarmListener {
    async fn on_farm_list_changed(&self, _farms_json: String) {}

    async fn on_selected_farm_changed(&self, _farm_id: Option<String>) {}

    async fn on_sync_state_changed(&self, _state: SyncState) {}

    async fn on_mutation_failed(&self, _failure_json: String) {}
}
