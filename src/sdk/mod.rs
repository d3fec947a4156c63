pub mod alert;
pub mod chat;
pub mod client;
pub mod db;
pub mod error;
pub mod farm;
pub mod remote;
pub mod serialization;
pub mod store;
pub mod sync;
pub mod types;
pub mod weather;

#[cfg(test)]
pub(crate) mod testing;

// 重新导出客户端和错误类型
pub use client::{ClientConfig, ClientParts, FarmClient};
pub use error::{SyncError, SyncResult};

// 重新导出各控制器
pub use alert::AlertSyncer;
pub use chat::ChatSyncer;
pub use farm::FarmSyncer;
pub use sync::{CollectionSyncer, RollbackPolicy, SyncState};
pub use weather::WeatherCache;
