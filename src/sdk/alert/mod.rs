//! 告警/通知模块

pub mod listener;
pub mod models;
pub mod service;

pub use listener::{AlertListener, EmptyAlertListener};
pub use models::{unread_count, Alert, AlertPriority, AlertType, NewAlert};
pub use service::AlertSyncer;
