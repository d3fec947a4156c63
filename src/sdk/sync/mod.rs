//! 通用集合同步器
//!
//! 每个实体族（农场、告警）各有一个实例：先读本地缓存，再订阅远端完整集合，
//! 每次推送都整体替换内存视图（按所属用户过滤、按创建时间倒序）并写回缓存。
//! 本地变更先乐观应用再提交远端，失败时按 [`RollbackPolicy`] 处理。

pub mod listener;
pub mod patch;
pub mod service;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use listener::{CollectionListener, EmptyCollectionListener};
pub use patch::apply_patch;
pub use service::CollectionSyncer;

/// 可被集合同步器管理的实体
pub trait SyncEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 日志前缀，例如 "[FarmSync]"
    const LOG_TAG: &'static str;
    /// 序列化后表示所属用户的字段名，patch 不允许修改
    const OWNER_FIELD: &'static str;

    /// 本地缓存 key（按用户分区）
    fn cache_key(user_id: &str) -> String;

    fn id(&self) -> &str;
    fn set_id(&mut self, id: String);
    fn owner_id(&self) -> &str;
    fn set_owner_id(&mut self, owner_id: String);
    fn created_at(&self) -> DateTime<Utc>;
    fn set_updated_at(&mut self, at: DateTime<Utc>);
}

/// 同步器状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Uninitialized,
    LoadingCache,
    SubscribingRemote,
    Live,
    Degraded,
    TornDown,
}

impl SyncState {
    /// 是否接受变更请求
    pub fn accepts_mutations(self) -> bool {
        matches!(
            self,
            SyncState::SubscribingRemote | SyncState::Live | SyncState::Degraded
        )
    }

    /// 激活流程是否仍在进行中
    pub fn is_activating(self) -> bool {
        matches!(self, SyncState::LoadingCache | SyncState::SubscribingRemote)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncState::Uninitialized => "uninitialized",
            SyncState::LoadingCache => "loading-cache",
            SyncState::SubscribingRemote => "subscribing-remote",
            SyncState::Live => "live",
            SyncState::Degraded => "degraded",
            SyncState::TornDown => "torn-down",
        };
        f.write_str(s)
    }
}

/// 乐观变更失败后的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RollbackPolicy {
    /// 撤销临时变更（若期间没有收到新的权威推送）
    #[default]
    Revert,
    /// 保留乐观状态，等待下一次权威推送覆盖
    KeepOptimistic,
}

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

/// 变更提交失败的描述，回调给上层用于提示用户
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationFailure {
    pub kind: MutationKind,
    pub id: String,
    pub error: String,
    /// 本地乐观状态是否已撤销
    pub reverted: bool,
}

/// 按所属用户过滤并按创建时间倒序排列（同一时间按 ID 排序，保证结果稳定）
pub fn normalize_view<T: SyncEntity>(items: Vec<T>, user_id: &str) -> Vec<T> {
    let mut view: Vec<T> = items
        .into_iter()
        .filter(|item| item.owner_id() == user_id)
        .collect();
    sort_view(&mut view);
    view
}

pub(crate) fn sort_view<T: SyncEntity>(view: &mut [T]) {
    view.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| a.id().cmp(b.id()))
    });
}
