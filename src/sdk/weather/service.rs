//! 天气缓存服务层
//!
//! 快照和“最后更新时间”分两个 key 保存。新鲜度只看最后更新时间；
//! 刷新失败时无论新旧都返回已持久化的快照。

use crate::sdk::store::{keys, CacheStore};
use crate::sdk::weather::api::{WeatherConfig, WeatherSource};
use crate::sdk::weather::models::WeatherSnapshot;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 天气缓存
#[derive(Clone)]
pub struct WeatherCache {
    source: Arc<dyn WeatherSource>,
    cache: CacheStore,
    config: WeatherConfig,
    /// 同一时间只允许一个拉取
    fetch_lock: Arc<Mutex<()>>,
}

impl WeatherCache {
    pub fn new(source: Arc<dyn WeatherSource>, cache: CacheStore, config: WeatherConfig) -> Self {
        Self {
            source,
            cache,
            config,
            fetch_lock: Arc::new(Mutex::new(())),
        }
    }

    /// 获取预报
    ///
    /// `use_cache` 为真且缓存仍在新鲜度窗口内时不访问网络。返回 `None`
    /// 表示拉取失败且从未持久化过任何快照。
    pub async fn get_forecast(&self, use_cache: bool) -> Option<WeatherSnapshot> {
        let _guard = self.fetch_lock.lock().await;

        let cached = self.cached_snapshot().await;
        if use_cache {
            if let Some(snapshot) = &cached {
                if self.is_fresh(snapshot, Utc::now()).await {
                    debug!("[WeatherCache] 缓存仍新鲜，直接使用");
                    return cached;
                }
            }
        }

        match self.source.fetch_forecast(&self.config.location).await {
            Ok(snapshot) => {
                info!(
                    "[WeatherCache] ✅ 天气已更新: {}，{} 天预报",
                    snapshot.location.name,
                    snapshot.daily.len()
                );
                self.store(&snapshot).await;
                Some(snapshot)
            }
            Err(e) => {
                match &cached {
                    Some(s) => warn!(
                        "[WeatherCache] ⚠️ 拉取失败，使用 {} 分钟前的缓存: {:#}",
                        s.age(Utc::now()).num_minutes(),
                        e
                    ),
                    None => warn!("[WeatherCache] 拉取失败且没有缓存: {:#}", e),
                }
                cached
            }
        }
    }

    /// 强制刷新（忽略新鲜度）
    pub async fn refresh(&self) -> Option<WeatherSnapshot> {
        self.get_forecast(false).await
    }

    /// 已持久化的快照（不访问网络，不论新旧）
    pub async fn cached_snapshot(&self) -> Option<WeatherSnapshot> {
        self.cache.load_json(keys::WEATHER_SNAPSHOT).await
    }

    /// 删除本地快照
    pub async fn clear(&self) {
        let _guard = self.fetch_lock.lock().await;
        self.cache.remove(keys::WEATHER_SNAPSHOT).await;
        self.cache.remove(keys::WEATHER_LAST_UPDATED).await;
        info!("[WeatherCache] 本地天气缓存已清除");
    }

    async fn is_fresh(&self, snapshot: &WeatherSnapshot, now: DateTime<Utc>) -> bool {
        if snapshot.location != self.config.location {
            debug!("[WeatherCache] 缓存地点已变化，视为过期");
            return false;
        }
        let last_updated = self
            .cache
            .load_json::<i64>(keys::WEATHER_LAST_UPDATED)
            .await
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or(snapshot.fetched_at);
        now.signed_duration_since(last_updated) <= self.config.freshness_window
    }

    async fn store(&self, snapshot: &WeatherSnapshot) {
        let saved = self.cache.save_json(keys::WEATHER_SNAPSHOT, snapshot).await
            && self
                .cache
                .save_json(
                    keys::WEATHER_LAST_UPDATED,
                    &snapshot.fetched_at.timestamp_millis(),
                )
                .await;
        if !saved {
            warn!("[WeatherCache] 天气快照写入本地缓存失败");
        }
    }
}
