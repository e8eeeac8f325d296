// SQLite-backed store for channels excluded from moderation at runtime.
//
// Tables:
// - excluded_channels: channel id, display name and when it was excluded

use crate::core::moderation::{ExcludedChannel, ExcludedChannelStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteExcludedChannelStore {
    pool: Pool<Sqlite>,
}

fn storage_error(e: sqlx::Error) -> StoreError {
    StoreError::StorageError(e.to_string())
}

impl SqliteExcludedChannelStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Create the table if it doesn't exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS excluded_channels (
                channel_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                excluded_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    /// Just the ids, for rebuilding the exclusion policy.
    pub async fn excluded_ids(&self) -> Result<Vec<u64>, StoreError> {
        Ok(self
            .list_excluded()
            .await?
            .into_iter()
            .map(|channel| channel.id)
            .collect())
    }
}

#[async_trait]
impl ExcludedChannelStore for SqliteExcludedChannelStore {
    async fn exclude(&self, channel: ExcludedChannel) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO excluded_channels (channel_id, name, excluded_at)
            VALUES (?, ?, ?)
            ON CONFLICT(channel_id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(channel.id as i64)
        .bind(&channel.name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn include(&self, channel_id: u64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM excluded_channels WHERE channel_id = ?")
            .bind(channel_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn is_excluded(&self, channel_id: u64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM excluded_channels WHERE channel_id = ?")
            .bind(channel_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(row.is_some())
    }

    async fn list_excluded(&self) -> Result<Vec<ExcludedChannel>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT channel_id, name
            FROM excluded_channels
            ORDER BY name, channel_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(rows
            .into_iter()
            .map(|row| ExcludedChannel {
                id: row.get::<i64, _>("channel_id") as u64,
                name: row.get("name"),
            })
            .collect())
    }
}
