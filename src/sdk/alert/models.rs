//! 告警实体模型

use crate::sdk::store::keys;
use crate::sdk::sync::SyncEntity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 告警类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Info,
    Warning,
    Critical,
    Success,
}

/// 告警优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// 告警（远端集合 `alerts` 中的一条文档）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub category: String,
    #[serde(default)]
    pub priority: AlertPriority,
    #[serde(default)]
    pub read: bool,
    /// 点击后跳转的目标（例如某个农场的 ID）
    #[serde(default)]
    pub action: Option<String>,
    /// 附带的结构化数据
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncEntity for Alert {
    const LOG_TAG: &'static str = "[AlertSync]";
    const OWNER_FIELD: &'static str = "userId";

    fn cache_key(user_id: &str) -> String {
        keys::alerts(user_id)
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn owner_id(&self) -> &str {
        &self.user_id
    }

    fn set_owner_id(&mut self, owner_id: String) {
        self.user_id = owner_id;
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

/// 新建告警的输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAlert {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub category: String,
    #[serde(default)]
    pub priority: AlertPriority,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl NewAlert {
    pub(crate) fn into_alert(self, now: DateTime<Utc>) -> Alert {
        Alert {
            id: String::new(),
            user_id: String::new(),
            title: self.title,
            message: self.message,
            alert_type: self.alert_type,
            category: self.category,
            priority: self.priority,
            read: false,
            action: self.action,
            payload: self.payload,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 未读数量（派生值，每次都从集合重新计算）
pub fn unread_count(alerts: &[Alert]) -> usize {
    alerts.iter().filter(|a| !a.read).count()
}
