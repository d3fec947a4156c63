//! 集合同步器回调接口

use crate::sdk::sync::{MutationFailure, SyncState};
use async_trait::async_trait;

/// 集合同步器监听器
#[async_trait]
pub trait CollectionListener<T>: Send + Sync {
    /// 内存视图发生变化（缓存加载、远端推送、乐观变更、回滚）
    async fn on_view_changed(&self, items: Vec<T>);

    /// 状态机迁移
    async fn on_sync_state_changed(&self, state: SyncState);

    /// 变更提交远端失败
    async fn on_mutation_failed(&self, failure: MutationFailure);
}

/// 空实现（默认监听器）
pub struct EmptyCollectionListener;

#[async_trait]
impl<T: Send + 'static> CollectionListener<T> for EmptyCollectionListener {
    async fn on_view_changed(&self, _items: Vec<T>) {}
    async fn on_sync_state_changed(&self, _state: SyncState) {}
    async fn on_mutation_failed(&self, _failure: MutationFailure) {}
}
