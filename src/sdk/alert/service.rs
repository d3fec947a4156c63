//! 告警同步服务层

use crate::sdk::alert::listener::{AlertListener, EmptyAlertListener};
use crate::sdk::alert::models::{unread_count, Alert, AlertType, NewAlert};
use crate::sdk::error::{SyncError, SyncResult};
use crate::sdk::remote::RemoteCollection;
use crate::sdk::serialization::is_temp_id;
use crate::sdk::store::CacheStore;
use crate::sdk::sync::{
    CollectionListener, CollectionSyncer, MutationFailure, RollbackPolicy, SyncState,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

/// 告警同步器
#[derive(Clone)]
pub struct AlertSyncer {
    syncer: CollectionSyncer<Alert>,
}

impl AlertSyncer {
    pub fn new(remote: Arc<dyn RemoteCollection<Alert>>, cache: CacheStore) -> Self {
        Self::with_listener(
            remote,
            cache,
            Arc::new(EmptyAlertListener),
            RollbackPolicy::default(),
        )
    }

    pub fn with_listener(
        remote: Arc<dyn RemoteCollection<Alert>>,
        cache: CacheStore,
        listener: Arc<dyn AlertListener>,
        policy: RollbackPolicy,
    ) -> Self {
        let adapter = Arc::new(AlertViewAdapter { listener });
        Self {
            syncer: CollectionSyncer::with_listener(remote, cache, adapter, policy),
        }
    }

    pub async fn activate(&self, user_id: &str) -> SyncResult<()> {
        self.syncer.activate(user_id).await
    }

    pub async fn teardown(&self) {
        self.syncer.teardown().await
    }

    pub async fn set_current_user(&self, user_id: Option<&str>) -> SyncResult<()> {
        self.syncer.set_current_user(user_id).await
    }

    pub async fn refresh(&self) -> SyncResult<()> {
        self.syncer.refresh().await
    }

    pub async fn state(&self) -> SyncState {
        self.syncer.state().await
    }

    pub async fn is_degraded(&self) -> bool {
        self.syncer.is_degraded().await
    }

    /// 当前用户的告警（最新在前）
    pub async fn alerts(&self) -> Vec<Alert> {
        self.syncer.items().await
    }

    pub async fn get_alert(&self, alert_id: &str) -> Option<Alert> {
        self.syncer.get(alert_id).await
    }

    /// 未读数量，每次从当前集合重新计算
    pub async fn unread_count(&self) -> usize {
        unread_count(&self.syncer.items().await)
    }

    /// 按类型统计未读数量（没有未读的类型不出现）
    pub async fn unread_count_by_type(&self) -> BTreeMap<AlertType, usize> {
        let mut counts = BTreeMap::new();
        for alert in self.syncer.items().await.iter().filter(|a| !a.read) {
            *counts.entry(alert.alert_type).or_insert(0) += 1;
        }
        counts
    }

    pub async fn alerts_by_category(&self, category: &str) -> Vec<Alert> {
        self.syncer
            .items()
            .await
            .into_iter()
            .filter(|a| a.category == category)
            .collect()
    }

    /// 新建告警，返回服务端分配的 ID
    pub async fn create_alert(&self, alert: NewAlert) -> SyncResult<String> {
        if alert.title.trim().is_empty() {
            return Err(SyncError::InvalidInput("alert title is empty".to_string()));
        }
        self.syncer
            .create(alert.into_alert(chrono::Utc::now()))
            .await
    }

    /// 标记已读（已读的告警直接返回）
    pub async fn mark_as_read(&self, alert_id: &str) -> SyncResult<()> {
        let alert = self
            .syncer
            .get(alert_id)
            .await
            .ok_or_else(|| SyncError::NotFound(alert_id.to_string()))?;
        if alert.read {
            return Ok(());
        }
        self.syncer.update(alert_id, json!({ "read": true })).await
    }

    /// 全部标记已读：本地一次性生效（未读数立即归零），远端并发提交
    ///
    /// 仍在创建中的告警在创建确认后补发。返回标记的条数。
    pub async fn mark_all_as_read(&self) -> SyncResult<usize> {
        let updates: Vec<(String, serde_json::Value)> = self
            .syncer
            .items()
            .await
            .into_iter()
            .filter(|a| !a.read)
            .map(|a| (a.id, json!({ "read": true })))
            .collect();
        if updates.is_empty() {
            return Ok(0);
        }
        info!("[AlertSync] 全部标记已读: {} 条", updates.len());
        self.syncer.update_many(updates).await
    }

    pub async fn delete_alert(&self, alert_id: &str) -> SyncResult<()> {
        self.syncer.delete(alert_id).await
    }

    /// 删除所有已读告警，返回删除条数；遇到第一个失败即停止
    ///
    /// 仍在创建中的告警留到下次清理。
    pub async fn clear_read_alerts(&self) -> SyncResult<usize> {
        let read_ids: Vec<String> = self
            .syncer
            .items()
            .await
            .into_iter()
            .filter(|a| a.read && !is_temp_id(&a.id))
            .map(|a| a.id)
            .collect();
        let mut deleted = 0;
        for id in read_ids {
            self.syncer.delete(&id).await?;
            deleted += 1;
        }
        if deleted > 0 {
            info!("[AlertSync] 已清理已读告警 {} 条", deleted);
        }
        Ok(deleted)
    }
}

struct AlertViewAdapter {
    listener: Arc<dyn AlertListener>,
}

#[async_trait]
impl CollectionListener<Alert> for AlertViewAdapter {
    async fn on_view_changed(&self, alerts: Vec<Alert>) {
        let unread = unread_count(&alerts);
        match serde_json::to_string(&alerts) {
            Ok(json) => self.listener.on_alert_list_changed(json).await,
            Err(e) => error!("[AlertSync] 告警列表序列化失败: {}", e),
        }
        self.listener.on_unread_count_changed(unread).await;
    }

    async fn on_sync_state_changed(&self, state: SyncState) {
        self.listener.on_sync_state_changed(state).await;
    }

    async fn on_mutation_failed(&self, failure: MutationFailure) {
        match serde_json::to_string(&failure) {
            Ok(json) => self.listener.on_mutation_failed(json).await,
            Err(e) => error!("[AlertSync] 失败信息序列化失败: {}", e),
        }
    }
}
