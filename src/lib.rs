pub mod sdk;

// 重新导出常用类型，方便外部使用
pub use sdk::{
    alert::{Alert, AlertListener, AlertType, NewAlert},
    chat::{ChatListener, ChatMessage, ChatRole, CompletionConfig},
    client::{ClientConfig, ClientParts, FarmClient},
    error::{SyncError, SyncResult},
    farm::{Farm, FarmListener, FarmStatus, NewFarm},
    store::{LocalStore, MemoryLocalStore, SqliteLocalStore},
    sync::{RollbackPolicy, SyncState},
    weather::{WeatherCache, WeatherConfig, WeatherLocation, WeatherSnapshot},
};
