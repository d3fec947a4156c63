//! 集合同步服务层
//!
//! 状态机：`Uninitialized → LoadingCache → SubscribingRemote → Live ⇄ Degraded → TornDown`。
//!
//! 所有状态迁移都在 `inner` 锁内完成；跨 await 的流程（读缓存、建立订阅、
//! 提交远端变更）在恢复执行后先比对 `epoch`，已被销毁或重新激活时直接丢弃结果。

use crate::sdk::error::{SyncError, SyncResult};
use crate::sdk::remote::{CollectionFilter, RemoteCollection, Subscription, SubscriptionSink};
use crate::sdk::serialization::{generate_temp_id, is_temp_id};
use crate::sdk::store::CacheStore;
use crate::sdk::sync::listener::{CollectionListener, EmptyCollectionListener};
use crate::sdk::sync::patch::{apply_patch, revert_fields};
use crate::sdk::sync::{
    normalize_view, sort_view, MutationFailure, MutationKind, RollbackPolicy, SyncEntity,
    SyncState,
};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 集合同步器（可廉价克隆，克隆体共享同一份状态）
pub struct CollectionSyncer<T: SyncEntity> {
    core: Arc<SyncCore<T>>,
}

impl<T: SyncEntity> Clone for CollectionSyncer<T> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
        }
    }
}

struct SyncCore<T: SyncEntity> {
    remote: Arc<dyn RemoteCollection<T>>,
    cache: CacheStore,
    listener: Arc<dyn CollectionListener<T>>,
    policy: RollbackPolicy,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    state: SyncState,
    user_id: Option<String>,
    /// 每次激活/销毁递增，用于识别过期的异步结果
    epoch: u64,
    /// 每次权威数据整体替换视图时递增
    revision: u64,
    view: Vec<T>,
    /// 尚未被远端确认的实体 ID
    provisional: HashSet<String>,
    /// 创建确认前对临时 ID 做的更新，拿到服务端 ID 后补发
    deferred: HashMap<String, Vec<PendingUpdate<T>>>,
    subscription: Option<Subscription>,
}

impl<T> Inner<T> {
    fn position(&self, id: &str) -> Option<usize>
    where
        T: SyncEntity,
    {
        self.view.iter().position(|item| item.id() == id)
    }

    fn drop_subscription(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
    }

    fn clear_session(&mut self) {
        self.view.clear();
        self.provisional.clear();
        self.deferred.clear();
    }
}

/// 一次乐观更新的快照，失败时据此回滚
struct PendingUpdate<T> {
    id: String,
    patch: serde_json::Value,
    prior: T,
    written: T,
}

impl<T: SyncEntity> CollectionSyncer<T> {
    /// 创建新的同步器（使用默认空监听器）
    pub fn new(remote: Arc<dyn RemoteCollection<T>>, cache: CacheStore) -> Self {
        Self::with_listener(
            remote,
            cache,
            Arc::new(EmptyCollectionListener),
            RollbackPolicy::default(),
        )
    }

    /// 创建新的同步器（带自定义监听器）
    pub fn with_listener(
        remote: Arc<dyn RemoteCollection<T>>,
        cache: CacheStore,
        listener: Arc<dyn CollectionListener<T>>,
        policy: RollbackPolicy,
    ) -> Self {
        Self {
            core: Arc::new(SyncCore {
                remote,
                cache,
                listener,
                policy,
                inner: Mutex::new(Inner {
                    state: SyncState::Uninitialized,
                    user_id: None,
                    epoch: 0,
                    revision: 0,
                    view: Vec::new(),
                    provisional: HashSet::new(),
                    deferred: HashMap::new(),
                    subscription: None,
                }),
            }),
        }
    }

    // ========== 读取 ==========

    /// 当前视图（拷贝）
    pub async fn items(&self) -> Vec<T> {
        self.core.inner.lock().await.view.clone()
    }

    /// 按 ID 查找
    pub async fn get(&self, id: &str) -> Option<T> {
        let inner = self.core.inner.lock().await;
        inner.view.iter().find(|item| item.id() == id).cloned()
    }

    pub async fn state(&self) -> SyncState {
        self.core.inner.lock().await.state
    }

    /// 是否处于降级状态（订阅失败，仍在提供缓存数据）
    pub async fn is_degraded(&self) -> bool {
        self.state().await == SyncState::Degraded
    }

    pub async fn user_id(&self) -> Option<String> {
        self.core.inner.lock().await.user_id.clone()
    }

    /// 该实体是否仍处于未确认的乐观状态
    pub async fn is_provisional(&self, id: &str) -> bool {
        self.core.inner.lock().await.provisional.contains(id)
    }

    // ========== 生命周期 ==========

    /// 激活：读取本地缓存填充视图，然后订阅远端
    ///
    /// 激活流程进行中时重复调用会被忽略；已处于 Live/Degraded 时重新走一遍完整流程。
    pub async fn activate(&self, user_id: &str) -> SyncResult<()> {
        if user_id.is_empty() {
            return Err(SyncError::NotAuthenticated);
        }

        let epoch = {
            let mut inner = self.core.inner.lock().await;
            if inner.state.is_activating() && inner.user_id.as_deref() == Some(user_id) {
                debug!(
                    "{} 激活流程进行中（{}），忽略重复激活",
                    T::LOG_TAG,
                    inner.state
                );
                return Ok(());
            }

            inner.drop_subscription();
            if inner.user_id.as_deref() != Some(user_id) {
                inner.clear_session();
            }
            inner.epoch += 1;
            inner.user_id = Some(user_id.to_string());
            inner.state = SyncState::LoadingCache;
            inner.epoch
        };
        info!("{} 🔄 激活同步器，用户ID: {}", T::LOG_TAG, user_id);
        self.core
            .listener
            .on_sync_state_changed(SyncState::LoadingCache)
            .await;

        // 1. 读取本地缓存（失败按未命中处理）
        let cached: Option<Vec<T>> = self.core.cache.load_json(&T::cache_key(user_id)).await;

        let cached_view = {
            let mut inner = self.core.inner.lock().await;
            if inner.epoch != epoch {
                debug!("{} 激活期间被销毁或重新激活，放弃缓存结果", T::LOG_TAG);
                return Ok(());
            }
            let cached_view = cached.map(|items| {
                let view = normalize_view(items, user_id);
                info!("{} 📦 本地缓存命中，共 {} 条", T::LOG_TAG, view.len());
                inner.view = view.clone();
                view
            });
            inner.state = SyncState::SubscribingRemote;
            cached_view
        };
        if let Some(view) = cached_view {
            self.core.listener.on_view_changed(view).await;
        }
        self.core
            .listener
            .on_sync_state_changed(SyncState::SubscribingRemote)
            .await;

        // 2. 订阅远端
        let sink: Arc<dyn SubscriptionSink<T>> = Arc::new(SyncerSink {
            core: Arc::downgrade(&self.core),
            epoch,
        });
        let filter = CollectionFilter::for_user(user_id);
        match self.core.remote.subscribe(&filter, sink).await {
            Ok(sub) => {
                let mut inner = self.core.inner.lock().await;
                if inner.epoch != epoch {
                    debug!("{} 订阅建立时同步器已失效，立即取消订阅", T::LOG_TAG);
                    drop(inner);
                    sub.unsubscribe();
                    return Ok(());
                }
                info!("{} ✅ 订阅已建立: {}", T::LOG_TAG, sub.id());
                inner.subscription = Some(sub);
            }
            Err(e) => {
                warn!("{} 订阅远端失败，进入降级状态: {:#}", T::LOG_TAG, e);
                self.core.mark_degraded(epoch, &format!("{:#}", e)).await;
            }
        }
        Ok(())
    }

    /// 销毁：取消订阅（恰好一次）并清空内存视图，之后可重新激活
    pub async fn teardown(&self) {
        {
            let mut inner = self.core.inner.lock().await;
            if inner.state == SyncState::TornDown {
                return;
            }
            inner.drop_subscription();
            inner.epoch += 1;
            inner.clear_session();
            inner.user_id = None;
            inner.state = SyncState::TornDown;
        }
        info!("{} 同步器已销毁", T::LOG_TAG);
        self.core.listener.on_view_changed(Vec::new()).await;
        self.core
            .listener
            .on_sync_state_changed(SyncState::TornDown)
            .await;
    }

    /// 登录状态变化：`None` 清空内存视图（保留本地缓存）并回到 Uninitialized
    pub async fn set_current_user(&self, user_id: Option<&str>) -> SyncResult<()> {
        match user_id {
            Some(uid) => {
                {
                    let inner = self.core.inner.lock().await;
                    let same_user = inner.user_id.as_deref() == Some(uid);
                    if same_user && inner.state != SyncState::Uninitialized
                        && inner.state != SyncState::TornDown
                    {
                        return Ok(());
                    }
                }
                self.activate(uid).await
            }
            None => {
                {
                    let mut inner = self.core.inner.lock().await;
                    inner.drop_subscription();
                    inner.epoch += 1;
                    inner.clear_session();
                    inner.user_id = None;
                    inner.state = SyncState::Uninitialized;
                }
                info!("{} 用户已登出，清空内存视图", T::LOG_TAG);
                self.core.listener.on_view_changed(Vec::new()).await;
                self.core
                    .listener
                    .on_sync_state_changed(SyncState::Uninitialized)
                    .await;
                Ok(())
            }
        }
    }

    /// 一次性全量拉取，走与订阅推送相同的替换流程；失败进入降级状态
    pub async fn refresh(&self) -> SyncResult<()> {
        let (epoch, user_id) = {
            let inner = self.core.inner.lock().await;
            let user_id = inner.user_id.clone().ok_or(SyncError::NotAuthenticated)?;
            if !inner.state.accepts_mutations() {
                return Err(SyncError::NotActive);
            }
            (inner.epoch, user_id)
        };

        match self
            .core
            .remote
            .fetch_all(&CollectionFilter::for_user(&user_id))
            .await
        {
            Ok(items) => {
                self.core.apply_snapshot(epoch, items).await;
                Ok(())
            }
            Err(e) => {
                warn!("{} 全量拉取失败: {:#}", T::LOG_TAG, e);
                self.core.mark_degraded(epoch, &format!("{:#}", e)).await;
                Err(SyncError::Remote(e))
            }
        }
    }

    // ========== 乐观变更 ==========

    /// 乐观创建：先以临时 ID 插入视图，再提交远端；成功后改写为服务端 ID
    pub async fn create(&self, item: T) -> SyncResult<String> {
        let (epoch, temp_id, item, view) = {
            let mut inner = self.core.inner.lock().await;
            let user_id = Self::require_active(&inner)?;
            let mut item = item;
            let temp_id = generate_temp_id();
            item.set_id(temp_id.clone());
            item.set_owner_id(user_id.clone());
            inner.view.push(item.clone());
            sort_view(&mut inner.view);
            inner.provisional.insert(temp_id.clone());
            self.core.persist(&user_id, &inner.view).await;
            (inner.epoch, temp_id, item, inner.view.clone())
        };
        debug!("{} 乐观创建: {}", T::LOG_TAG, temp_id);
        self.core.listener.on_view_changed(view).await;

        match self.core.remote.create(&item).await {
            Ok(server_id) => {
                info!("{} 创建已确认: {} -> {}", T::LOG_TAG, temp_id, server_id);
                let (changed, deferred, revision) = {
                    let mut inner = self.core.inner.lock().await;
                    inner.provisional.remove(&temp_id);
                    let mut deferred = inner.deferred.remove(&temp_id).unwrap_or_default();
                    if inner.epoch != epoch {
                        deferred.clear();
                    }
                    for p in &mut deferred {
                        p.id = server_id.clone();
                    }
                    let changed = match (inner.epoch == epoch, inner.position(&temp_id)) {
                        (true, Some(pos)) => {
                            inner.view[pos].set_id(server_id.clone());
                            if !deferred.is_empty() {
                                inner.provisional.insert(server_id.clone());
                            }
                            if let Some(uid) = inner.user_id.clone() {
                                self.core.persist(&uid, &inner.view).await;
                            }
                            Some(inner.view.clone())
                        }
                        _ => None,
                    };
                    (changed, deferred, inner.revision)
                };
                if let Some(view) = changed {
                    self.core.listener.on_view_changed(view).await;
                }

                if !deferred.is_empty() {
                    info!(
                        "{} 补发创建期间的更新 {} 条: {}",
                        T::LOG_TAG,
                        deferred.len(),
                        server_id
                    );
                    let (_, failed) = self.core.submit_updates(epoch, revision, deferred).await;
                    if let Some(e) = failed {
                        warn!("{} 补发更新失败: {}: {:#}", T::LOG_TAG, server_id, e);
                    }
                }
                Ok(server_id)
            }
            Err(e) => {
                warn!("{} 创建失败: {}: {:#}", T::LOG_TAG, temp_id, e);
                {
                    let mut inner = self.core.inner.lock().await;
                    inner.provisional.remove(&temp_id);
                    inner.deferred.remove(&temp_id);
                }
                let reverted = self
                    .core
                    .revert(epoch, None, |inner| {
                        match inner.position(&temp_id) {
                            Some(pos) => {
                                inner.view.remove(pos);
                                true
                            }
                            None => false,
                        }
                    })
                    .await;
                self.core
                    .report_failure(MutationKind::Create, &temp_id, &e, reverted)
                    .await;
                Err(SyncError::Remote(e))
            }
        }
    }

    /// 乐观局部更新（patch 为 JSON 对象）
    pub async fn update(&self, id: &str, patch: serde_json::Value) -> SyncResult<()> {
        self.update_many(vec![(id.to_string(), patch)]).await.map(|_| ())
    }

    /// 批量乐观更新：一次性应用并通知，再并发提交远端
    ///
    /// 仍在创建中的实体只在本地生效，创建确认后再提交远端；
    /// 创建已失败但仍留在视图中的临时实体（`KeepOptimistic`）只改本地。
    /// 任何一条失败都会返回第一个错误；成功的条目不受影响。
    pub async fn update_many(
        &self,
        updates: Vec<(String, serde_json::Value)>,
    ) -> SyncResult<usize> {
        if updates.is_empty() {
            return Ok(0);
        }

        let (epoch, revision, pending, deferred, view) = {
            let mut inner = self.core.inner.lock().await;
            let user_id = Self::require_active(&inner)?;
            let now = chrono::Utc::now();

            // 先全部校验再应用，保证要么全部生效要么都不生效
            let mut staged = Vec::with_capacity(updates.len());
            for (id, patch) in updates {
                let local_only = is_temp_id(&id);
                let pos = inner
                    .position(&id)
                    .ok_or_else(|| SyncError::NotFound(id.clone()))?;
                let prior = inner.view[pos].clone();
                let mut written = apply_patch(&prior, &patch, T::OWNER_FIELD)?;
                written.set_updated_at(now);
                staged.push((
                    pos,
                    local_only,
                    PendingUpdate {
                        id,
                        patch,
                        prior,
                        written,
                    },
                ));
            }

            let mut pending = Vec::with_capacity(staged.len());
            let mut deferred = 0;
            for (pos, local_only, p) in staged {
                inner.view[pos] = p.written.clone();
                if !local_only {
                    inner.provisional.insert(p.id.clone());
                    pending.push(p);
                    continue;
                }
                deferred += 1;
                if inner.provisional.contains(&p.id) {
                    inner.deferred.entry(p.id.clone()).or_default().push(p);
                }
            }
            sort_view(&mut inner.view);
            self.core.persist(&user_id, &inner.view).await;
            (
                inner.epoch,
                inner.revision,
                pending,
                deferred,
                inner.view.clone(),
            )
        };
        debug!(
            "{} 乐观更新 {} 条（待创建确认 {} 条）",
            T::LOG_TAG,
            pending.len() + deferred,
            deferred
        );
        self.core.listener.on_view_changed(view).await;

        match self.core.submit_updates(epoch, revision, pending).await {
            (_, Some(e)) => Err(SyncError::Remote(e)),
            (applied, None) => Ok(applied + deferred),
        }
    }

    /// 乐观删除
    pub async fn delete(&self, id: &str) -> SyncResult<()> {
        let (epoch, revision, removed, view) = {
            let mut inner = self.core.inner.lock().await;
            let user_id = Self::require_active(&inner)?;
            if is_temp_id(id) {
                return Err(SyncError::InvalidInput(format!(
                    "{} is still being created",
                    id
                )));
            }
            let pos = inner
                .position(id)
                .ok_or_else(|| SyncError::NotFound(id.to_string()))?;
            let removed = inner.view.remove(pos);
            self.core.persist(&user_id, &inner.view).await;
            (inner.epoch, inner.revision, removed, inner.view.clone())
        };
        debug!("{} 乐观删除: {}", T::LOG_TAG, id);
        self.core.listener.on_view_changed(view).await;

        match self.core.remote.delete(id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("{} 删除失败: {}: {:#}", T::LOG_TAG, id, e);
                let reverted = self
                    .core
                    .revert(epoch, Some(revision), |inner| {
                        if inner.position(removed.id()).is_some() {
                            return false;
                        }
                        inner.view.push(removed);
                        sort_view(&mut inner.view);
                        true
                    })
                    .await;
                self.core
                    .report_failure(MutationKind::Delete, id, &e, reverted)
                    .await;
                Err(SyncError::Remote(e))
            }
        }
    }

    fn require_active(inner: &Inner<T>) -> SyncResult<String> {
        let user_id = inner.user_id.clone().ok_or(SyncError::NotAuthenticated)?;
        if !inner.state.accepts_mutations() {
            return Err(SyncError::NotActive);
        }
        Ok(user_id)
    }
}

impl<T: SyncEntity> SyncCore<T> {
    /// 权威数据到达：整体替换、过滤、排序、写缓存
    async fn apply_snapshot(&self, epoch: u64, items: Vec<T>) {
        let (view, entered_live) = {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch {
                debug!("{} 丢弃过期推送（epoch 不匹配）", T::LOG_TAG);
                return;
            }
            let user_id = match inner.user_id.clone() {
                Some(uid) => uid,
                None => return,
            };
            let received = items.len();
            let view = normalize_view(items, &user_id);
            debug!(
                "{} 收到权威数据 {} 条，属于当前用户 {} 条",
                T::LOG_TAG,
                received,
                view.len()
            );
            inner.view = view;
            inner.revision += 1;
            inner.provisional.clear();
            let entered_live = inner.state != SyncState::Live;
            inner.state = SyncState::Live;
            // 持久化完成前持有锁，保证下一次推送不会与本次交错写入
            self.persist(&user_id, &inner.view).await;
            (inner.view.clone(), entered_live)
        };

        self.listener.on_view_changed(view).await;
        if entered_live {
            info!("{} ✅ 进入 Live 状态", T::LOG_TAG);
            self.listener.on_sync_state_changed(SyncState::Live).await;
        }
    }

    /// 并发提交已在本地生效的更新；失败的条目按策略逐字段回滚
    ///
    /// 返回成功条数和第一个错误。
    async fn submit_updates(
        &self,
        epoch: u64,
        revision: u64,
        pending: Vec<PendingUpdate<T>>,
    ) -> (usize, Option<anyhow::Error>) {
        let results = join_all(
            pending
                .iter()
                .map(|p| {
                    let remote = self.remote.clone();
                    async move { remote.update(&p.id, &p.patch).await }
                })
                .collect::<Vec<_>>(),
        )
        .await;

        let mut applied = 0;
        let mut first_error = None;
        for (p, result) in pending.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    applied += 1;
                    let mut inner = self.inner.lock().await;
                    if inner.epoch == epoch {
                        inner.provisional.remove(&p.id);
                    }
                }
                Err(e) => {
                    warn!("{} 更新失败: {}: {:#}", T::LOG_TAG, p.id, e);
                    let PendingUpdate {
                        id, prior, written, ..
                    } = p;
                    let reverted = self
                        .revert(epoch, Some(revision), |inner| {
                            inner.provisional.remove(&id);
                            let Some(pos) = inner.position(&id) else {
                                return false;
                            };
                            // 之后的更新写过的字段保持不动
                            match revert_fields(&inner.view[pos], &prior, &written) {
                                Ok(Some(restored)) => {
                                    inner.view[pos] = restored;
                                    sort_view(&mut inner.view);
                                    true
                                }
                                Ok(None) => false,
                                Err(err) => {
                                    warn!("{} 回滚 {} 失败: {}", T::LOG_TAG, id, err);
                                    false
                                }
                            }
                        })
                        .await;
                    self.report_failure(MutationKind::Update, &id, &e, reverted)
                        .await;
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        (applied, first_error)
    }

    /// 订阅错误：保留视图与缓存，进入降级状态
    async fn mark_degraded(&self, epoch: u64, error: &str) {
        let changed = {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch {
                return;
            }
            match inner.state {
                SyncState::SubscribingRemote | SyncState::Live => {
                    inner.state = SyncState::Degraded;
                    true
                }
                _ => false,
            }
        };
        if changed {
            warn!("{} ⚠️ 连接降级，继续提供缓存数据: {}", T::LOG_TAG, error);
            self.listener
                .on_sync_state_changed(SyncState::Degraded)
                .await;
        }
    }

    /// 按策略回滚；`since_revision` 为 Some 时，若期间视图已被权威数据替换则放弃回滚
    async fn revert<F>(&self, epoch: u64, since_revision: Option<u64>, undo: F) -> bool
    where
        F: FnOnce(&mut Inner<T>) -> bool,
    {
        if self.policy == RollbackPolicy::KeepOptimistic {
            return false;
        }
        let view = {
            let mut inner = self.inner.lock().await;
            if inner.epoch != epoch {
                return false;
            }
            if let Some(rev) = since_revision {
                if inner.revision != rev {
                    debug!("{} 期间已收到权威数据，跳过回滚", T::LOG_TAG);
                    return false;
                }
            }
            if !undo(&mut inner) {
                return false;
            }
            if let Some(uid) = inner.user_id.clone() {
                self.persist(&uid, &inner.view).await;
            }
            inner.view.clone()
        };
        self.listener.on_view_changed(view).await;
        true
    }

    async fn report_failure(&self, kind: MutationKind, id: &str, error: &anyhow::Error, reverted: bool) {
        self.listener
            .on_mutation_failed(MutationFailure {
                kind,
                id: id.to_string(),
                error: format!("{:#}", error),
                reverted,
            })
            .await;
    }

    async fn persist(&self, user_id: &str, view: &[T]) {
        if !self.cache.save_json(&T::cache_key(user_id), view).await {
            warn!("{} 视图写入本地缓存失败（下次启动可能读到旧数据）", T::LOG_TAG);
        }
    }
}

/// 订阅回调适配：持有弱引用，同步器释放后推送自动失效
struct SyncerSink<T: SyncEntity> {
    core: Weak<SyncCore<T>>,
    epoch: u64,
}

#[async_trait]
impl<T: SyncEntity> SubscriptionSink<T> for SyncerSink<T> {
    async fn on_data(&self, items: Vec<T>) {
        if let Some(core) = self.core.upgrade() {
            core.apply_snapshot(self.epoch, items).await;
        }
    }

    async fn on_error(&self, error: String) {
        if let Some(core) = self.core.upgrade() {
            core.mark_degraded(self.epoch, &error).await;
        }
    }
}
