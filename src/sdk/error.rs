//! 同步控制器对外暴露的错误类型
//!
//! 内部的 DAO / HTTP / WebSocket 层统一使用 `anyhow::Result`，
//! 到控制器边界再收敛为 [`SyncError`]，方便上层按类别处理。

use thiserror::Error;

/// 控制器边界错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 当前没有登录用户
    #[error("no authenticated user")]
    NotAuthenticated,

    /// 控制器尚未激活或已被销毁
    #[error("controller is not active")]
    NotActive,

    /// 当前视图中找不到该实体
    #[error("entity not found: {0}")]
    NotFound(String),

    /// 已有一个补全请求在途（聊天控制器只允许一个）
    #[error("a completion request is already in flight")]
    RequestInFlight,

    /// 调用参数不合法（空消息、非对象 patch 等）
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 局部字段补丁无法应用到实体上
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// 远端集合调用失败（create/update/delete/fetch）
    #[error("remote call failed: {0:#}")]
    Remote(#[source] anyhow::Error),

    /// 本地存储失败（仅在调用方显式要求结果时出现，缓存读写失败按未命中处理）
    #[error("local store failed: {0:#}")]
    Store(#[source] anyhow::Error),
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
