//! 单元测试共用的假实现（仅在 `cfg(test)` 下编译）

use crate::sdk::alert::AlertListener;
use crate::sdk::chat::api::{CompletionError, CompletionMessage, CompletionOptions, CompletionService};
use crate::sdk::chat::ChatListener;
use crate::sdk::farm::FarmListener;
use crate::sdk::remote::{CollectionFilter, RemoteCollection, Subscription, SubscriptionSink};
use crate::sdk::store::LocalStore;
use crate::sdk::sync::{apply_patch, CollectionListener, MutationFailure, SyncEntity, SyncState};
use crate::sdk::weather::{
    CurrentConditions, WeatherLocation, WeatherSnapshot, WeatherSource,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use tokio::sync::watch;

static INIT_LOGGER: Once = Once::new();

/// 测试日志：当前 crate 打开 debug，输出交给测试框架捕获
pub fn init_test_logger() {
    INIT_LOGGER.call_once(|| {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::EnvFilter;

        let filter_layer = EnvFilter::new("info,farmhub_sdk_core_rust=debug,sqlx=warn");
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .with_test_writer();

        let _ = tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .try_init();
    });
}

/// 秒级时间戳转 UTC 时间
pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

/// 让出调度直到条件成立（最多约 1 秒）
pub async fn wait_until<F, Fut>(mut cond: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if cond().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// 开关闸门：关闭时被拦截的调用一直等待，打开后全部放行
pub struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            open: watch::Sender::new(true),
        }
    }

    pub fn close(&self) {
        self.open.send_replace(false);
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }

    pub async fn pass(&self) {
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

// ========== 本地存储 ==========

/// 所有操作都失败的本地存储
pub struct FailingLocalStore;

#[async_trait]
impl LocalStore for FailingLocalStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Err(anyhow!("disk unavailable: {}", key))
    }

    async fn set(&self, key: &str, _value: &[u8]) -> Result<()> {
        Err(anyhow!("disk unavailable: {}", key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Err(anyhow!("disk unavailable: {}", key))
    }
}

// ========== 通用测试实体 ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestItem {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TestItem {
    pub fn new(id: &str, owner: &str, title: &str, created_secs: i64) -> Self {
        Self {
            id: id.to_string(),
            owner_id: owner.to_string(),
            title: title.to_string(),
            created_at: ts(created_secs),
            updated_at: ts(created_secs),
        }
    }
}

impl SyncEntity for TestItem {
    const LOG_TAG: &'static str = "[TestSync]";
    const OWNER_FIELD: &'static str = "ownerId";

    fn cache_key(user_id: &str) -> String {
        format!("test:{}", user_id)
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn set_owner_id(&mut self, owner_id: String) {
        self.owner_id = owner_id;
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

// ========== 远端集合 ==========

struct FakeCollectionState<T> {
    items: Vec<T>,
    sinks: Vec<(usize, Arc<dyn SubscriptionSink<T>>)>,
}

/// 内存版远端集合：测试通过 `emit*` 主动推送
pub struct FakeRemoteCollection<T> {
    state: Arc<Mutex<FakeCollectionState<T>>>,
    pub gate: Gate,
    pub fail_fetch: AtomicBool,
    pub fail_subscribe: AtomicBool,
    pub fail_create: AtomicBool,
    pub fail_update: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fetch_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    pub unsubscribe_calls: Arc<AtomicUsize>,
    pub create_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    next_id: AtomicUsize,
}

impl<T: SyncEntity> FakeRemoteCollection<T> {
    pub fn new() -> Self {
        Self::with_items(Vec::new())
    }

    pub fn with_items(items: Vec<T>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeCollectionState {
                items,
                sinks: Vec::new(),
            })),
            gate: Gate::new(),
            fail_fetch: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fetch_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: Arc::new(AtomicUsize::new(0)),
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn items(&self) -> Vec<T> {
        self.state.lock().unwrap().items.clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().unwrap().sinks.len()
    }

    /// 替换服务端集合并推送给所有订阅者
    pub async fn emit(&self, items: Vec<T>) {
        let sinks = {
            let mut state = self.state.lock().unwrap();
            state.items = items.clone();
            state.sinks.iter().map(|(_, s)| s.clone()).collect::<Vec<_>>()
        };
        for sink in sinks {
            sink.on_data(items.clone()).await;
        }
    }

    /// 推送服务端当前集合
    pub async fn emit_current(&self) {
        let items = self.items();
        self.emit(items).await;
    }

    pub async fn emit_error(&self, error: &str) {
        let sinks = {
            let state = self.state.lock().unwrap();
            state.sinks.iter().map(|(_, s)| s.clone()).collect::<Vec<_>>()
        };
        for sink in sinks {
            sink.on_error(error.to_string()).await;
        }
    }
}

#[async_trait]
impl<T: SyncEntity> RemoteCollection<T> for FakeRemoteCollection<T> {
    async fn fetch_all(&self, filter: &CollectionFilter) -> Result<Vec<T>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(anyhow!("network unreachable"));
        }
        Ok(self
            .items()
            .into_iter()
            .filter(|item| item.owner_id() == filter.owner_user_id)
            .collect())
    }

    async fn subscribe(
        &self,
        _filter: &CollectionFilter,
        sink: Arc<dyn SubscriptionSink<T>>,
    ) -> Result<Subscription> {
        let n = self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(anyhow!("subscription refused"));
        }
        self.state.lock().unwrap().sinks.push((n, sink));

        let state = self.state.clone();
        let unsubscribed = self.unsubscribe_calls.clone();
        Ok(Subscription::new(format!("fake-sub-{}", n), move || {
            unsubscribed.fetch_add(1, Ordering::SeqCst);
            state.lock().unwrap().sinks.retain(|(id, _)| *id != n);
        }))
    }

    async fn create(&self, item: &T) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("create rejected"));
        }
        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut stored = item.clone();
        stored.set_id(id.clone());
        self.state.lock().unwrap().items.push(stored);
        Ok(id)
    }

    async fn update(&self, id: &str, patch: &serde_json::Value) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        // 成败在调用进入时决定，闸门放行后不再改变
        let fail = self.fail_update.load(Ordering::SeqCst);
        self.gate.pass().await;
        if fail {
            return Err(anyhow!("update rejected"));
        }
        let mut state = self.state.lock().unwrap();
        let item = state
            .items
            .iter_mut()
            .find(|item| item.id() == id)
            .ok_or_else(|| anyhow!("no such document: {}", id))?;
        *item = apply_patch(item, patch, T::OWNER_FIELD)?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(anyhow!("delete rejected"));
        }
        self.state.lock().unwrap().items.retain(|item| item.id() != id);
        Ok(())
    }
}

// ========== 补全服务 ==========

/// 按队列依次返回预设结果；队列为空时回复 "ok"
pub struct FakeCompletion {
    replies: Mutex<VecDeque<std::result::Result<String, CompletionError>>>,
    requests: Mutex<Vec<Vec<CompletionMessage>>>,
    pub gate: Gate,
    pub calls: AtomicUsize,
}

impl FakeCompletion {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            gate: Gate::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn push_reply(&self, reply: std::result::Result<String, CompletionError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn requests(&self) -> Vec<Vec<CompletionMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn complete(
        &self,
        messages: &[CompletionMessage],
        _options: &CompletionOptions,
    ) -> std::result::Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(messages.to_vec());
        self.gate.pass().await;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }
}

// ========== 天气数据源 ==========

/// 固定内容的天气快照（只有 `fetched_at` 不同）
pub fn sample_snapshot(fetched_secs: i64) -> WeatherSnapshot {
    WeatherSnapshot {
        current: CurrentConditions {
            temperature: 21.5,
            feels_like: 21.0,
            humidity: 60,
            wind_speed: 3.2,
            description: "clear sky".to_string(),
            icon: "01d".to_string(),
        },
        daily: Vec::new(),
        fetched_at: ts(fetched_secs),
        location: sample_location(),
    }
}

pub fn sample_location() -> WeatherLocation {
    WeatherLocation {
        name: "Fresno".to_string(),
        latitude: 36.74,
        longitude: -119.78,
    }
}

pub struct FakeWeatherSource {
    snapshot: Mutex<Option<WeatherSnapshot>>,
    pub gate: Gate,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeWeatherSource {
    pub fn new(snapshot: Option<WeatherSnapshot>) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            gate: Gate::new(),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_snapshot(&self, snapshot: WeatherSnapshot) {
        *self.snapshot.lock().unwrap() = Some(snapshot);
    }
}

#[async_trait]
impl WeatherSource for FakeWeatherSource {
    async fn fetch_forecast(&self, _location: &WeatherLocation) -> Result<WeatherSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("weather service unreachable"));
        }
        let mut snapshot = self
            .snapshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("no forecast configured"))?;
        snapshot.fetched_at = Utc::now();
        Ok(snapshot)
    }
}

// ========== 监听器 ==========

/// 记录所有回调的监听器，同时实现各个实体族的监听接口
#[derive(Default)]
pub struct RecordingListener {
    pub views: Mutex<Vec<String>>,
    pub states: Mutex<Vec<SyncState>>,
    pub failures: Mutex<Vec<String>>,
    pub unread_counts: Mutex<Vec<usize>>,
    pub selected: Mutex<Vec<Option<String>>>,
    pub sending: Mutex<Vec<bool>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_view(&self) -> Option<String> {
        self.views.lock().unwrap().last().cloned()
    }

    pub fn view_count(&self) -> usize {
        self.views.lock().unwrap().len()
    }

    pub fn states(&self) -> Vec<SyncState> {
        self.states.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }

    pub fn unread_counts(&self) -> Vec<usize> {
        self.unread_counts.lock().unwrap().clone()
    }

    pub fn selected(&self) -> Vec<Option<String>> {
        self.selected.lock().unwrap().clone()
    }

    pub fn sending(&self) -> Vec<bool> {
        self.sending.lock().unwrap().clone()
    }
}

#[async_trait]
impl<T: Serialize + Send + 'static> CollectionListener<T> for RecordingListener {
    async fn on_view_changed(&self, items: Vec<T>) {
        let json = serde_json::to_string(&items).unwrap();
        self.views.lock().unwrap().push(json);
    }

    async fn on_sync_state_changed(&self, state: SyncState) {
        self.states.lock().unwrap().push(state);
    }

    async fn on_mutation_failed(&self, failure: MutationFailure) {
        let json = serde_json::to_string(&failure).unwrap();
        self.failures.lock().unwrap().push(json);
    }
}

#[async_trait]
impl FarmListener for RecordingListener {
    async fn on_farm_list_changed(&self, farms_json: String) {
        self.views.lock().unwrap().push(farms_json);
    }

    async fn on_selected_farm_changed(&self, farm_id: Option<String>) {
        self.selected.lock().unwrap().push(farm_id);
    }

    async fn on_sync_state_changed(&self, state: SyncState) {
        self.states.lock().unwrap().push(state);
    }

    async fn on_mutation_failed(&self, failure_json: String) {
        self.failures.lock().unwrap().push(failure_json);
    }
}

#[async_trait]
impl AlertListener for RecordingListener {
    async fn on_alert_list_changed(&self, alerts_json: String) {
        self.views.lock().unwrap().push(alerts_json);
    }

    async fn on_unread_count_changed(&self, count: usize) {
        self.unread_counts.lock().unwrap().push(count);
    }

    async fn on_sync_state_changed(&self, state: SyncState) {
        self.states.lock().unwrap().push(state);
    }

    async fn on_mutation_failed(&self, failure_json: String) {
        self.failures.lock().unwrap().push(failure_json);
    }
}

#[async_trait]
impl ChatListener for RecordingListener {
    async fn on_message_list_changed(&self, messages_json: String) {
        self.views.lock().unwrap().push(messages_json);
    }

    async fn on_sending_changed(&self, sending: bool) {
        self.sending.lock().unwrap().push(sending);
    }
}

/// 读取缓存中的原始字节（用于比较持久化结果）
pub async fn raw_bytes(store: &dyn LocalStore, key: &str) -> Option<Vec<u8>> {
    store.get(key).await.unwrap()
}
