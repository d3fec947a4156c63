//! 本地键值存储数据访问层（DAO）
//!
//! 基于 sqlx / SQLite 的 `local_kv` 表，表结构由 `migrations/` 管理。

use crate::sdk::db::create_sqlite_pool_with_migration;
use crate::sdk::store::LocalStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};
use tracing::debug;

/// SQLite 键值存储
pub struct SqliteLocalStore {
    db: Pool<Sqlite>,
}

impl SqliteLocalStore {
    /// 使用已有连接池创建（表结构需已迁移）
    pub fn new(db: Pool<Sqlite>) -> Self {
        Self { db }
    }

    /// 打开数据库并执行迁移
    pub async fn open(db_url: &str) -> Result<Self> {
        let db = create_sqlite_pool_with_migration(db_url).await?;
        Ok(Self::new(db))
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM local_kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await
            .with_context(|| format!("读取缓存失败: {}", key))?;

        let value = row.map(|r| r.get::<Vec<u8>, _>("value"));
        debug!(
            "[LocalStore] get {} -> {}",
            key,
            value
                .as_ref()
                .map(|v| format!("{} bytes", v.len()))
                .unwrap_or_else(|| "miss".to_string())
        );
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let sql = r#"
            INSERT INTO local_kv (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
        "#;
        sqlx::query(sql)
            .bind(key)
            .bind(value)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&self.db)
            .await
            .with_context(|| format!("写入缓存失败: {}", key))?;
        debug!("[LocalStore] set {} ({} bytes)", key, value.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM local_kv WHERE key = ?")
            .bind(key)
            .execute(&self.db)
            .await
            .with_context(|| format!("删除缓存失败: {}", key))?;
        debug!("[LocalStore] delete {}", key);
        Ok(())
    }
}
