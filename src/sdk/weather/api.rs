//! 天气数据源
//!
//! 默认实现调用 OpenWeather One Call 接口，把响应映射为 [`WeatherSnapshot`]。

use crate::sdk::weather::models::{
    CurrentConditions, DailyForecast, WeatherLocation, WeatherSnapshot,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error, info};

/// 预报天数
pub const FORECAST_DAYS: usize = 7;

/// 天气配置
#[derive(Clone, Debug)]
pub struct WeatherConfig {
    pub base_url: String,
    pub api_key: String,
    pub location: WeatherLocation,
    /// 缓存新鲜度窗口，窗口内直接使用缓存
    pub freshness_window: chrono::Duration,
}

impl WeatherConfig {
    /// 创建默认配置（新鲜度窗口 1 小时）
    pub fn new(api_key: String, location: WeatherLocation) -> Self {
        Self {
            base_url: "https://api.openweathermap.org".to_string(),
            api_key,
            location,
            freshness_window: chrono::Duration::hours(1),
        }
    }
}

/// 天气数据源接口
#[async_trait]
pub trait WeatherSource: Send + Sync {
    async fn fetch_forecast(&self, location: &WeatherLocation) -> Result<WeatherSnapshot>;
}

#[derive(Deserialize)]
struct OneCallResponse {
    current: OneCallCurrent,
    #[serde(default)]
    daily: Vec<OneCallDaily>,
}

#[derive(Deserialize)]
struct OneCallCurrent {
    temp: f64,
    feels_like: f64,
    humidity: u8,
    wind_speed: f64,
    #[serde(default)]
    weather: Vec<OneCallWeather>,
}

#[derive(Deserialize)]
struct OneCallDaily {
    dt: i64,
    temp: OneCallTemp,
    humidity: u8,
    #[serde(default)]
    pop: f64,
    #[serde(default)]
    weather: Vec<OneCallWeather>,
}

#[derive(Deserialize)]
struct OneCallTemp {
    min: f64,
    max: f64,
}

#[derive(Deserialize, Clone, Default)]
struct OneCallWeather {
    description: String,
    icon: String,
}

/// OpenWeather 客户端
pub struct OpenWeatherClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenWeatherClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherClient {
    async fn fetch_forecast(&self, location: &WeatherLocation) -> Result<WeatherSnapshot> {
        if self.api_key.trim().is_empty() {
            return Err(anyhow!("未配置天气 API key"));
        }
        let url = format!(
            "{}/data/3.0/onecall",
            self.base_url.trim_end_matches('/')
        );
        info!("[WeatherAPI] 📡 请求天气预报: {}", location.name);
        debug!("[WeatherAPI]   请求URL: {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", location.latitude.to_string()),
                ("lon", location.longitude.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
                ("exclude", "minutely,hourly,alerts".to_string()),
            ])
            .send()
            .await
            .context("请求失败")?;

        let status = response.status();
        let body = response.bytes().await.context("读取响应 body 失败")?;
        if !status.is_success() {
            let body_str = String::from_utf8_lossy(&body);
            error!("[WeatherAPI] 天气请求失败，HTTP状态: {}, 响应: {}", status, body_str);
            return Err(anyhow!("HTTP 错误 {}: {}", status, body_str));
        }

        let parsed: OneCallResponse =
            serde_json::from_slice(&body).context("解析天气响应失败")?;
        Ok(into_snapshot(parsed, location.clone(), Utc::now()))
    }
}

fn into_snapshot(
    resp: OneCallResponse,
    location: WeatherLocation,
    fetched_at: DateTime<Utc>,
) -> WeatherSnapshot {
    let summary = |weather: &[OneCallWeather]| weather.first().cloned().unwrap_or_default();

    let now = summary(&resp.current.weather);
    let current = CurrentConditions {
        temperature: resp.current.temp,
        feels_like: resp.current.feels_like,
        humidity: resp.current.humidity,
        wind_speed: resp.current.wind_speed,
        description: now.description,
        icon: now.icon,
    };

    let daily = resp
        .daily
        .into_iter()
        .take(FORECAST_DAYS)
        .filter_map(|day| {
            let date = DateTime::<Utc>::from_timestamp(day.dt, 0)?;
            let w = summary(&day.weather);
            Some(DailyForecast {
                date,
                temp_min: day.temp.min,
                temp_max: day.temp.max,
                humidity: day.humidity,
                precipitation_chance: day.pop,
                description: w.description,
                icon: w.icon,
            })
        })
        .collect();

    WeatherSnapshot {
        current,
        daily,
        fetched_at,
        location,
    }
}
