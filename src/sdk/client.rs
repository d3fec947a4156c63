//! 会话级客户端
//!
//! 每次登录会话构造一个 [`FarmClient`]，由它创建并持有四个控制器，
//! 调用方通过 `set_current_user` 驱动它们的激活和清理。

use crate::sdk::alert::{Alert, AlertListener, AlertSyncer, EmptyAlertListener};
use crate::sdk::chat::{
    ChatListener, ChatSyncer, CompletionConfig, CompletionService, EmptyChatListener,
    OpenAiCompletionClient,
};
use crate::sdk::error::SyncResult;
use crate::sdk::farm::{EmptyFarmListener, Farm, FarmListener, FarmSyncer};
use crate::sdk::remote::api::{build_authenticated_client, CollectionEndpoint};
use crate::sdk::remote::{HttpCollectionSource, RemoteCollection};
use crate::sdk::store::{CacheStore, LocalStore, MemoryLocalStore, SqliteLocalStore};
use crate::sdk::sync::RollbackPolicy;
use crate::sdk::weather::{
    OpenWeatherClient, WeatherCache, WeatherConfig, WeatherLocation, WeatherSource,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info, warn};

/// 客户端配置
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// 认证 token
    pub token: String,
    /// HTTP API 基础地址
    pub api_base_url: String,
    /// WebSocket 服务器 URL
    pub ws_url: String,
    /// 压缩方式，例如 "gzip" 或空字符串表示不压缩
    pub compression: String,
    /// 本地缓存使用的 SQLite 数据库 URL
    ///
    /// 例如：`sqlite://farmhub.db?mode=rwc`
    pub db_url: String,
    /// 乐观变更失败时的处理策略
    pub rollback_policy: RollbackPolicy,
    pub completion: CompletionConfig,
    pub weather: WeatherConfig,
}

impl ClientConfig {
    /// 创建默认配置
    pub fn new(token: String) -> Self {
        Self {
            token,
            api_base_url: "http://localhost:10002".to_string(),
            ws_url: "ws://localhost:10001".to_string(),
            compression: "gzip".to_string(),
            db_url: "sqlite://farmhub.db?mode=rwc".to_string(),
            rollback_policy: RollbackPolicy::default(),
            completion: CompletionConfig::new(None),
            weather: WeatherConfig::new(
                String::new(),
                WeatherLocation {
                    name: "Fresno".to_string(),
                    latitude: 36.7378,
                    longitude: -119.7871,
                },
            ),
        }
    }

    fn endpoint(&self, collection: &str) -> CollectionEndpoint {
        CollectionEndpoint {
            collection: collection.to_string(),
            api_base_url: self.api_base_url.clone(),
            ws_url: self.ws_url.clone(),
            token: self.token.clone(),
            compression: self.compression.clone(),
        }
    }
}

/// 控制器依赖的外部协作方
pub struct ClientParts {
    pub store: Arc<dyn LocalStore>,
    pub farms: Arc<dyn RemoteCollection<Farm>>,
    pub alerts: Arc<dyn RemoteCollection<Alert>>,
    pub completion: Arc<dyn CompletionService>,
    pub weather: Arc<dyn WeatherSource>,
}

/// 农场管理客户端
pub struct FarmClient {
    config: ClientConfig,
    farm_listener: Arc<dyn FarmListener>,
    alert_listener: Arc<dyn AlertListener>,
    chat_listener: Arc<dyn ChatListener>,
    farms: Option<FarmSyncer>,
    alerts: Option<AlertSyncer>,
    chat: Option<ChatSyncer>,
    weather: Option<WeatherCache>,
}

impl FarmClient {
    /// 创建新的客户端
    /// - `config`: 客户端配置
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            farm_listener: Arc::new(EmptyFarmListener),
            alert_listener: Arc::new(EmptyAlertListener),
            chat_listener: Arc::new(EmptyChatListener),
            farms: None,
            alerts: None,
            chat: None,
            weather: None,
        }
    }

    /// 用注入的协作方直接组装（测试或自定义后端）
    pub fn from_parts(config: ClientConfig, parts: ClientParts) -> Self {
        let mut client = Self::new(config);
        client.attach(parts);
        client
    }

    /// 注册农场监听器（需在 connect 之前调用）
    pub fn set_farm_listener(&mut self, listener: Arc<dyn FarmListener>) {
        if self.is_connected() {
            warn!("[Client] 已连接，新的农场监听器将在下次 connect 后生效");
        }
        self.farm_listener = listener;
    }

    /// 注册告警监听器（需在 connect 之前调用）
    pub fn set_alert_listener(&mut self, listener: Arc<dyn AlertListener>) {
        if self.is_connected() {
            warn!("[Client] 已连接，新的告警监听器将在下次 connect 后生效");
        }
        self.alert_listener = listener;
    }

    /// 注册聊天监听器（需在 connect 之前调用）
    pub fn set_chat_listener(&mut self, listener: Arc<dyn ChatListener>) {
        if self.is_connected() {
            warn!("[Client] 已连接，新的聊天监听器将在下次 connect 后生效");
        }
        self.chat_listener = listener;
    }

    /// 打开本地缓存、创建 HTTP 客户端并组装控制器
    ///
    /// 数据库打不开时退化为内存缓存（本次进程内仍可离线使用，重启后丢失）。
    pub async fn connect(&mut self) -> Result<()> {
        info!("[Client] 🔗 打开本地缓存: {}", self.config.db_url);
        let store: Arc<dyn LocalStore> = match SqliteLocalStore::open(&self.config.db_url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(
                    "[Client] ⚠️ 打开本地数据库失败，改用内存缓存: {:#}",
                    e
                );
                Arc::new(MemoryLocalStore::new())
            }
        };

        // 集合接口带 token 头；第三方接口用不带 token 的客户端
        let http_client = build_authenticated_client(&self.config.token)?;
        let plain_client = reqwest::Client::builder()
            .build()
            .context("创建 HTTP 客户端失败")?;

        let parts = ClientParts {
            store,
            farms: Arc::new(HttpCollectionSource::<Farm>::new(
                http_client.clone(),
                self.config.endpoint("farms"),
            )),
            alerts: Arc::new(HttpCollectionSource::<Alert>::new(
                http_client,
                self.config.endpoint("alerts"),
            )),
            completion: Arc::new(OpenAiCompletionClient::new(
                plain_client.clone(),
                self.config.completion.base_url.clone(),
            )),
            weather: Arc::new(OpenWeatherClient::new(
                plain_client,
                self.config.weather.base_url.clone(),
                self.config.weather.api_key.clone(),
            )),
        };
        self.attach(parts);
        info!("[Client] ✅ 客户端已就绪");
        Ok(())
    }

    /// 组装四个控制器（替换已有的控制器）
    pub fn attach(&mut self, parts: ClientParts) {
        let cache = CacheStore::new(parts.store);
        let policy = self.config.rollback_policy;
        self.farms = Some(FarmSyncer::with_listener(
            parts.farms,
            cache.clone(),
            self.farm_listener.clone(),
            policy,
        ));
        self.alerts = Some(AlertSyncer::with_listener(
            parts.alerts,
            cache.clone(),
            self.alert_listener.clone(),
            policy,
        ));
        self.chat = Some(ChatSyncer::with_listener(
            parts.completion,
            cache.clone(),
            self.config.completion.clone(),
            self.chat_listener.clone(),
        ));
        self.weather = Some(WeatherCache::new(
            parts.weather,
            cache,
            self.config.weather.clone(),
        ));
    }

    pub fn is_connected(&self) -> bool {
        self.farms.is_some()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn farms(&self) -> Option<&FarmSyncer> {
        self.farms.as_ref()
    }

    pub fn alerts(&self) -> Option<&AlertSyncer> {
        self.alerts.as_ref()
    }

    pub fn chat(&self) -> Option<&ChatSyncer> {
        self.chat.as_ref()
    }

    pub fn weather(&self) -> Option<&WeatherCache> {
        self.weather.as_ref()
    }

    /// 登录状态变化，分发给所有按用户区分的控制器
    ///
    /// 所有控制器都会收到通知；返回遇到的第一个错误。
    pub async fn set_current_user(&self, user_id: Option<&str>) -> SyncResult<()> {
        let (Some(farms), Some(alerts), Some(chat)) = (&self.farms, &self.alerts, &self.chat)
        else {
            warn!("[Client] 尚未连接，忽略用户切换");
            return Ok(());
        };
        match user_id {
            Some(uid) => info!("[Client] 👤 切换用户: {}", uid),
            None => info!("[Client] 👤 用户已登出"),
        }

        let (f, a, c) = tokio::join!(
            farms.set_current_user(user_id),
            alerts.set_current_user(user_id),
            chat.set_current_user(user_id),
        );
        for (name, result) in [("farms", &f), ("alerts", &a), ("chat", &c)] {
            if let Err(e) = result {
                error!("[Client] {} 控制器切换用户失败: {}", name, e);
            }
        }
        f.and(a).and(c)
    }

    /// 销毁所有控制器的会话状态（取消订阅，清空内存视图）
    pub async fn teardown(&self) {
        info!("[Client] 🛑 关闭会话");
        if let Some(farms) = &self.farms {
            farms.teardown().await;
        }
        if let Some(alerts) = &self.alerts {
            alerts.teardown().await;
        }
        if let Some(chat) = &self.chat {
            chat.teardown().await;
        }
    }
}
