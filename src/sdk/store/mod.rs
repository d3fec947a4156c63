//! 本地持久化存储（LPS）
//!
//! 设备范围内的键值存储，进程重启后依然存在。所有操作均为异步且可能失败，
//! 上层通过 [`CacheStore`] 把失败记录日志后当作缓存未命中处理。

pub mod cache;
pub mod dao;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

pub use cache::CacheStore;
pub use dao::SqliteLocalStore;
pub use memory::MemoryLocalStore;

/// 本地键值存储接口
///
/// 同一个 key 的写入按调用顺序后写覆盖先写；不同 key 之间不保证顺序。
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// 读取 key，不存在时返回 `None`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// 写入 key（覆盖旧值）
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 删除 key，key 不存在不算错误
    async fn delete(&self, key: &str) -> Result<()>;
}

/// 缓存 key 命名规则：每个实体族一个 key，按用户分区
pub mod keys {
    /// 天气快照
    pub const WEATHER_SNAPSHOT: &str = "weather:snapshot";
    /// 天气快照最后更新时间（毫秒时间戳），用于新鲜度判断
    pub const WEATHER_LAST_UPDATED: &str = "weather:last_updated";

    pub fn farms(user_id: &str) -> String {
        format!("farms:{}", user_id)
    }

    pub fn alerts(user_id: &str) -> String {
        format!("alerts:{}", user_id)
    }

    pub fn chat(user_id: &str) -> String {
        format!("chat:{}", user_id)
    }
}
