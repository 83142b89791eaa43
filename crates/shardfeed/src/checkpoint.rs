//! Per-shard checkpoints
//!
//! Maps shard id to the high-water mark of the last fully ingested pass.
//! A missing row means the shard was never synced.

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::error::{HarvestError, Result};
use shardfeed_common::Watermark;

/// Resume-point storage
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// High-water mark for `shard_id`, or the epoch sentinel when absent.
    async fn get(&self, shard_id: i64) -> Result<Watermark>;

    /// Insert or replace the mark for `shard_id`; durable once this returns.
    async fn set(&self, shard_id: i64, mark: &Watermark) -> Result<()>;
}

/// SQLite-backed checkpoint table
///
/// The pool holds a single connection, so writes from concurrent workers are
/// serialized in the order they arrive.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (creating if needed) the checkpoint database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                HarvestError::checkpoint(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                HarvestError::checkpoint(format!("cannot open {}: {e}", path.display()))
            })?;

        let store = Self { pool };
        store.ensure_schema().await?;

        debug!(path = %path.display(), "Checkpoint store ready");
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shard_checkpoints (
                shard_id INTEGER PRIMARY KEY,
                high_water_mark TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(HarvestError::checkpoint)?;

        Ok(())
    }

    /// All stored checkpoints, ordered by shard id.
    pub async fn list(&self) -> Result<Vec<(i64, Watermark)>> {
        let rows = sqlx::query(
            "SELECT shard_id, high_water_mark FROM shard_checkpoints ORDER BY shard_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(HarvestError::checkpoint)?;

        rows.into_iter()
            .map(|row| -> Result<(i64, Watermark)> {
                let shard_id: i64 = row.get("shard_id");
                let raw: String = row.get("high_water_mark");
                Ok((shard_id, Watermark::parse(&raw)?))
            })
            .collect()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get(&self, shard_id: i64) -> Result<Watermark> {
        let row = sqlx::query("SELECT high_water_mark FROM shard_checkpoints WHERE shard_id = ?1")
            .bind(shard_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(HarvestError::checkpoint)?;

        match row {
            Some(row) => {
                let raw: String = row.get("high_water_mark");
                Ok(Watermark::parse(&raw)?)
            }
            None => Ok(Watermark::epoch()),
        }
    }

    async fn set(&self, shard_id: i64, mark: &Watermark) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO shard_checkpoints (shard_id, high_water_mark)
            VALUES (?1, ?2)
            ON CONFLICT(shard_id) DO UPDATE SET high_water_mark = excluded.high_water_mark
            "#,
        )
        .bind(shard_id)
        .bind(mark.as_str())
        .execute(&self.pool)
        .await
        .map_err(HarvestError::checkpoint)?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (SqliteCheckpointStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::open(temp_dir.path().join("checkpoints.sqlite"))
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_missing_shard_reads_as_epoch() {
        let (store, _temp) = create_test_store().await;
        let mark = store.get(42).await.unwrap();
        assert!(mark.is_epoch());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (store, _temp) = create_test_store().await;
        let mark = Watermark::parse("2023-11-02T10:00:00.250Z").unwrap();

        store.set(7, &mark).await.unwrap();
        assert_eq!(store.get(7).await.unwrap(), mark);
        assert!(store.get(8).await.unwrap().is_epoch());
    }

    #[tokio::test]
    async fn test_set_overwrites_previous_value() {
        let (store, _temp) = create_test_store().await;
        let first = Watermark::parse("2023-01-01T00:00:00Z").unwrap();
        let second = Watermark::parse("2023-06-01T00:00:00Z").unwrap();

        store.set(1, &first).await.unwrap();
        store.set(1, &second).await.unwrap();

        assert_eq!(store.get(1).await.unwrap(), second);
        assert_eq!(store.list().await.unwrap(), vec![(1, second)]);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("checkpoints.sqlite");
        let mark = Watermark::parse("2022-02-22T22:22:22Z").unwrap();

        {
            let store = SqliteCheckpointStore::open(&path).await.unwrap();
            store.set(3, &mark).await.unwrap();
            store.close().await;
        }

        let reopened = SqliteCheckpointStore::open(&path).await.unwrap();
        assert_eq!(reopened.get(3).await.unwrap(), mark);
    }

    #[tokio::test]
    async fn test_concurrent_writers_on_disjoint_keys() {
        let (store, _temp) = create_test_store().await;
        let store = std::sync::Arc::new(store);

        let writes = (0..16).map(|shard_id| {
            let store = store.clone();
            async move {
                let mark = Watermark::parse(&format!("2024-01-{:02}T00:00:00Z", shard_id + 1))
                    .unwrap();
                store.set(shard_id, &mark).await.unwrap();
            }
        });
        futures::future::join_all(writes).await;

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 16);
        assert_eq!(all[4].1.as_str(), "2024-01-05T00:00:00.000Z");
    }
}
