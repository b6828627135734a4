use crate::error::{StoreError, StoreResult};
use crate::sql_store::migrations::MigrationRunner;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nova_core::{ConfigBackend, CoreResult, StoredDocument};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;

/// SQLite-backed document storage, one row per user
#[derive(Debug, Clone)]
pub struct SqlConfigBackend {
    pool: SqlitePool,
}

impl SqlConfigBackend {
    /// Connect and run pending migrations
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        Self::new_with_config(database_url, None).await
    }

    pub async fn new_with_config(
        database_url: &str,
        max_connections: Option<u32>,
    ) -> StoreResult<Self> {
        let max_conn = max_connections.unwrap_or(10);

        // sqlite:// file URLs get create_if_missing; other forms (sqlite::memory:) parse as-is
        let options = if let Some(path_str) = database_url.strip_prefix("sqlite://") {
            SqliteConnectOptions::new()
                .filename(PathBuf::from(path_str))
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::from_str(database_url)?.create_if_missing(true)
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_conn)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL;")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL;")
            .execute(&pool)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create from an existing pool (migrations are not run)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> StoreResult<usize> {
        MigrationRunner::new(self.pool.clone()).migrate().await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ConfigBackend for SqlConfigBackend {
    async fn fetch(&self, user_id: &str) -> CoreResult<Option<StoredDocument>> {
        let row = sqlx::query("SELECT document, updated_at FROM user_configs WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row.try_get("document").map_err(StoreError::Database)?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(StoreError::Database)?;
        let document = serde_json::from_str(&raw).map_err(StoreError::Serialization)?;
        Ok(Some(StoredDocument {
            document,
            updated_at,
        }))
    }

    async fn persist(&self, user_id: &str, document: &StoredDocument) -> CoreResult<()> {
        let raw = serde_json::to_string(&document.document).map_err(StoreError::Serialization)?;
        sqlx::query(
            r#"
            INSERT INTO user_configs (user_id, document, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&raw)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Database)?;
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> CoreResult<bool> {
        let result = sqlx::query("DELETE FROM user_configs WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_user_ids(&self) -> CoreResult<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT user_id FROM user_configs ORDER BY user_id")
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::Database)?;
        Ok(ids)
    }
}
