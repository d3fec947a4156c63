//! JSON 缓存读写辅助
//!
//! 所有失败（存储异常、反序列化失败）都只记录日志，统一按缓存未命中处理，
//! 不会向调用方抛出。

use crate::sdk::store::LocalStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// 对 [`LocalStore`] 的 JSON 封装
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<dyn LocalStore>,
}

impl CacheStore {
    pub fn new(inner: Arc<dyn LocalStore>) -> Self {
        Self { inner }
    }

    /// 读取并反序列化，任何失败都返回 `None`
    pub async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.inner.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("[LocalStore] 缓存未命中: {}", key);
                return None;
            }
            Err(e) => {
                warn!("[LocalStore] 读取缓存失败，按未命中处理: {}: {:#}", key, e);
                return None;
            }
        };

        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    "[LocalStore] 缓存内容损坏，按未命中处理: {} ({} bytes): {}",
                    key,
                    bytes.len(),
                    e
                );
                None
            }
        }
    }

    /// 序列化并写入，返回是否成功
    pub async fn save_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[LocalStore] 序列化缓存失败: {}: {}", key, e);
                return false;
            }
        };
        self.save_bytes(key, &bytes).await
    }

    /// 写入已序列化的数据，返回是否成功
    pub async fn save_bytes(&self, key: &str, bytes: &[u8]) -> bool {
        match self.inner.set(key, bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!("[LocalStore] 写入缓存失败: {}: {:#}", key, e);
                false
            }
        }
    }

    /// 删除 key，返回是否成功
    pub async fn remove(&self, key: &str) -> bool {
        match self.inner.delete(key).await {
            Ok(()) => true,
            Err(e) => {
                warn!("[LocalStore] 删除缓存失败: {}: {:#}", key, e);
                false
            }
        }
    }
}
