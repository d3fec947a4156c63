//! 农场模块
//!
//! 当前用户名下农场列表的缓存与同步，以及“当前选中农场”指针。

pub mod listener;
pub mod models;
pub mod service;

pub use listener::{EmptyFarmListener, FarmListener};
pub use models::{Coordinates, Farm, FarmStatus, NewFarm, SensorReadings};
pub use service::FarmSyncer;
