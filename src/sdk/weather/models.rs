//! 天气快照模型

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 预报地点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// 当前天气
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentConditions {
    /// ℃
    pub temperature: f64,
    pub feels_like: f64,
    /// %
    pub humidity: u8,
    /// m/s
    pub wind_speed: f64,
    pub description: String,
    pub icon: String,
}

/// 单日预报
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyForecast {
    pub date: DateTime<Utc>,
    pub temp_min: f64,
    pub temp_max: f64,
    pub humidity: u8,
    /// 降水概率 0.0 ~ 1.0
    pub precipitation_chance: f64,
    pub description: String,
    pub icon: String,
}

/// 天气快照：当前天气 + 7 日预报 + 获取时间 + 地点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshot {
    pub current: CurrentConditions,
    pub daily: Vec<DailyForecast>,
    pub fetched_at: DateTime<Utc>,
    pub location: WeatherLocation,
}

impl WeatherSnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.fetched_at)
    }

    /// 超过新鲜度窗口即为过期（过期数据仍可在刷新失败时使用）
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.age(now) > window
    }
}
