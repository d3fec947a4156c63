//! 天气预报缓存模块

pub mod api;
pub mod models;
pub mod service;

pub use api::{OpenWeatherClient, WeatherConfig, WeatherSource};
pub use models::{CurrentConditions, DailyForecast, WeatherLocation, WeatherSnapshot};
pub use service::WeatherCache;
