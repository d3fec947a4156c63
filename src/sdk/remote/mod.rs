//! 远端集合数据源（RCS）
//!
//! 对远端实时文档库的抽象：一次性拉取、订阅（每次推送完整集合）、增删改。
//! 具体线路协议由 [`api::HttpCollectionSource`] 实现，上层只依赖 trait。

pub mod api;
pub mod subscription;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub use api::HttpCollectionSource;

/// 订阅/拉取过滤条件（目前只按所属用户过滤）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFilter {
    pub owner_user_id: String,
}

impl CollectionFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            owner_user_id: user_id.into(),
        }
    }
}

/// 订阅回调接口
///
/// 数据源必须等待上一次 `on_data` 返回后才能投递下一次，保证顺序。
#[async_trait]
pub trait SubscriptionSink<T>: Send + Sync {
    /// 推送当前完整集合（不是增量）
    async fn on_data(&self, items: Vec<T>);

    /// 推送错误，订阅不会因此被隐式关闭
    async fn on_error(&self, error: String);
}

/// 远端集合数据源接口
#[async_trait]
pub trait RemoteCollection<T>: Send + Sync {
    /// 一次性拉取完整集合
    async fn fetch_all(&self, filter: &CollectionFilter) -> Result<Vec<T>>;

    /// 建立订阅，返回的句柄用于取消
    async fn subscribe(
        &self,
        filter: &CollectionFilter,
        sink: Arc<dyn SubscriptionSink<T>>,
    ) -> Result<Subscription>;

    /// 创建实体，返回服务端分配的 ID
    async fn create(&self, item: &T) -> Result<String>;

    /// 局部更新（patch 为 JSON 对象）
    async fn update(&self, id: &str, patch: &serde_json::Value) -> Result<()>;

    /// 删除实体
    async fn delete(&self, id: &str) -> Result<()>;
}

/// 订阅句柄
///
/// `unsubscribe` 消费句柄本身，因此取消动作最多执行一次；
/// 未显式取消就被丢弃时同样会取消。
pub struct Subscription {
    id: String,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(id: impl Into<String>, cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id: id.into(),
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 取消订阅
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
