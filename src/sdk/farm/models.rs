//! 农场实体模型

use crate::sdk::store::keys;
use crate::sdk::sync::SyncEntity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 农场状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FarmStatus {
    #[default]
    Active,
    Inactive,
}

/// 经纬度
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// 传感器读数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReadings {
    /// 土壤湿度（%）
    pub moisture: f64,
    pub ph: f64,
    /// 温度（℃）
    pub temperature: f64,
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,
    pub last_updated: DateTime<Utc>,
}

/// 农场（远端集合 `farms` 中的一条文档）
///
/// 可选字段不使用 `skip_serializing_if`：局部补丁按已有字段校验，
/// `null` 也需要出现在序列化结果里。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Farm {
    pub id: String,
    pub name: String,
    pub location: String,
    /// 面积（英亩）
    pub acreage: f64,
    #[serde(default)]
    pub crops: Vec<String>,
    pub soil_type: String,
    pub irrigation_type: String,
    pub owner_id: String,
    #[serde(default)]
    pub status: FarmStatus,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub sensor_data: Option<SensorReadings>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncEntity for Farm {
    const LOG_TAG: &'static str = "[FarmSync]";
    const OWNER_FIELD: &'static str = "ownerId";

    fn cache_key(user_id: &str) -> String {
        keys::farms(user_id)
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

/// 新建农场的输入（ID、所属用户和时间戳由同步器填写）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFarm {
    pub name: String,
    pub location: String,
    pub acreage: f64,
    #[serde(default)]
    pub crops: Vec<String>,
    pub soil_type: String,
    pub irrigation_type: String,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

impl NewFarm {
    pub(crate) fn into_farm(self, now: DateTime<Utc>) -> Farm {
        Farm {
            id: String::new(),
            name: self.name,
            location: self.location,
            acreage: self.acreage,
            crops: self.crops,
            soil_type: self.soil_type,
            irrigation_type: self.irrigation_type,
            owner_id: String::new(),
            status: FarmStatus::Active,
            coordinates: self.coordinates,
            sensor_data: None,
            created_at: now,
            updated_at: now,
        }
    }
}
