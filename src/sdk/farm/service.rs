//! 农场同步服务层

use crate::sdk::error::{SyncError, SyncResult};
use crate::sdk::farm::listener::{EmptyFarmListener, FarmListener};
use crate::sdk::farm::models::{Farm, FarmStatus, NewFarm, SensorReadings};
use crate::sdk::remote::RemoteCollection;
use crate::sdk::store::CacheStore;
use crate::sdk::sync::{
    CollectionListener, CollectionSyncer, MutationFailure, RollbackPolicy, SyncState,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// 农场同步器
#[derive(Clone)]
pub struct FarmSyncer {
    syncer: CollectionSyncer<Farm>,
    selected: Arc<Mutex<Option<String>>>,
    listener: Arc<dyn FarmListener>,
}

impl FarmSyncer {
    pub fn new(remote: Arc<dyn RemoteCollection<Farm>>, cache: CacheStore) -> Self {
        Self::with_listener(
            remote,
            cache,
            Arc::new(EmptyFarmListener),
            RollbackPolicy::default(),
        )
    }

    pub fn with_listener(
        remote: Arc<dyn RemoteCollection<Farm>>,
        cache: CacheStore,
        listener: Arc<dyn FarmListener>,
        policy: RollbackPolicy,
    ) -> Self {
        let selected = Arc::new(Mutex::new(None));
        let adapter = Arc::new(FarmViewAdapter {
            selected: selected.clone(),
            listener: listener.clone(),
        });
        Self {
            syncer: CollectionSyncer::with_listener(remote, cache, adapter, policy),
            selected,
            listener,
        }
    }

    // ========== 生命周期 ==========

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

    // ========== 读取 ==========

    /// 当前用户的农场（按创建时间倒序）
    pub async fn farms(&self) -> Vec<Farm> {
        self.syncer.items().await
    }

    pub async fn get_farm(&self, farm_id: &str) -> Option<Farm> {
        self.syncer.get(farm_id).await
    }

    pub async fn active_farms(&self) -> Vec<Farm> {
        self.farms()
            .await
            .into_iter()
            .filter(|f| f.status == FarmStatus::Active)
            .collect()
    }

    /// 所有农场面积之和（英亩）
    pub async fn total_acreage(&self) -> f64 {
        self.farms().await.iter().map(|f| f.acreage).sum()
    }

    pub async fn selected_farm_id(&self) -> Option<String> {
        self.selected.lock().await.clone()
    }

    pub async fn selected_farm(&self) -> Option<Farm> {
        let id = self.selected_farm_id().await?;
        self.syncer.get(&id).await
    }

    /// 切换当前选中的农场
    pub async fn select_farm(&self, farm_id: &str) -> SyncResult<()> {
        if self.syncer.get(farm_id).await.is_none() {
            return Err(SyncError::NotFound(farm_id.to_string()));
        }
        let changed = {
            let mut selected = self.selected.lock().await;
            if selected.as_deref() == Some(farm_id) {
                false
            } else {
                *selected = Some(farm_id.to_string());
                true
            }
        };
        if changed {
            debug!("[FarmSync] 选中农场: {}", farm_id);
            self.listener
                .on_selected_farm_changed(Some(farm_id.to_string()))
                .await;
        }
        Ok(())
    }

    // ========== 变更 ==========

    /// 新建农场，返回服务端分配的 ID
    pub async fn create_farm(&self, farm: NewFarm) -> SyncResult<String> {
        if farm.name.trim().is_empty() {
            return Err(SyncError::InvalidInput("farm name is empty".to_string()));
        }
        if !(farm.acreage.is_finite() && farm.acreage >= 0.0) {
            return Err(SyncError::InvalidInput(format!(
                "invalid acreage: {}",
                farm.acreage
            )));
        }
        info!("[FarmSync] 新建农场: {}", farm.name);
        self.syncer
            .create(farm.into_farm(chrono::Utc::now()))
            .await
    }

    /// 局部更新（字段名使用 camelCase，例如 `{"name": "..."}`）
    pub async fn update_farm(&self, farm_id: &str, patch: serde_json::Value) -> SyncResult<()> {
        self.syncer.update(farm_id, patch).await
    }

    pub async fn update_sensor_readings(
        &self,
        farm_id: &str,
        readings: SensorReadings,
    ) -> SyncResult<()> {
        self.syncer
            .update(farm_id, json!({ "sensorData": readings }))
            .await
    }

    pub async fn set_farm_status(&self, farm_id: &str, status: FarmStatus) -> SyncResult<()> {
        self.syncer.update(farm_id, json!({ "status": status })).await
    }

    pub async fn delete_farm(&self, farm_id: &str) -> SyncResult<()> {
        info!("[FarmSync] 删除农场: {}", farm_id);
        self.syncer.delete(farm_id).await
    }
}

/// 把通用视图回调转换成农场回调，并在每次视图变化后校正选中指针
struct FarmViewAdapter {
    selected: Arc<Mutex<Option<String>>>,
    listener: Arc<dyn FarmListener>,
}

#[async_trait]
impl CollectionListener<Farm> for FarmViewAdapter {
    async fn on_view_changed(&self, farms: Vec<Farm>) {
        let reassigned = {
            let mut selected = self.selected.lock().await;
            let still_present = selected
                .as_deref()
                .is_some_and(|id| farms.iter().any(|f| f.id == id));
            if still_present {
                None
            } else {
                let fallback = farms.first().map(|f| f.id.clone());
                if *selected == fallback {
                    None
                } else {
                    *selected = fallback.clone();
                    Some(fallback)
                }
            }
        };

        match serde_json::to_string(&farms) {
            Ok(json) => self.listener.on_farm_list_changed(json).await,
            Err(e) => error!("[FarmSync] 农场列表序列化失败: {}", e),
        }
        if let Some(selected) = reassigned {
            debug!("[FarmSync] 选中农场已失效，改为: {:?}", selected);
            self.listener.on_selected_farm_changed(selected).await;
        }
    }

    async fn on_sync_state_changed(&self, state: SyncState) {
        self.listener.on_sync_state_changed(state).await;
    }

    async fn on_mutation_failed(&self, failure: MutationFailure) {
        match serde_json::to_string(&failure) {
            Ok(json) => self.listener.on_mutation_failed(json).await,
            Err(e) => error!("[FarmSync] 失败信息序列化失败: {}", e),
        }
    }
}
