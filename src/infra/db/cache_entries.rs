use async_trait::async_trait;
use sqlx::{FromRow, sqlite::SqlitePool};

use crate::{
    cache::{CacheError, CacheStorage, CachedResponse, StoredEntry},
    domain::post::{from_epoch_millis, to_epoch_millis},
};

/// Cache tiers persisted in the `cache_entries` table.
#[derive(Clone)]
pub struct SqliteCacheStorage {
    pool: SqlitePool,
    quota_bytes: Option<u64>,
}

#[derive(Debug, FromRow)]
struct EntryRow {
    status: i64,
    headers: String,
    body: Vec<u8>,
    inserted_at: i64,
}

impl TryFrom<EntryRow> for StoredEntry {
    type Error = CacheError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let headers: Vec<(String, String)> =
            serde_json::from_str(&row.headers).map_err(CacheError::storage)?;
        let status = u16::try_from(row.status).map_err(CacheError::storage)?;
        let inserted_at = from_epoch_millis(row.inserted_at).map_err(CacheError::storage)?;
        Ok(StoredEntry {
            response: CachedResponse::new(status, headers, row.body),
            inserted_at,
        })
    }
}

impl SqliteCacheStorage {
    pub fn new(pool: SqlitePool, quota_bytes: Option<u64>) -> Self {
        Self { pool, quota_bytes }
    }
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    async fn tier_names(&self) -> Result<Vec<String>, CacheError> {
        sqlx::query_scalar("SELECT DISTINCT tier FROM cache_entries ORDER BY tier")
            .fetch_all(&self.pool)
            .await
            .map_err(CacheError::storage)
    }

    async fn get(&self, tier: &str, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        let row = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT status, headers, body, inserted_at
            FROM cache_entries
            WHERE tier = ? AND key = ?
            "#,
        )
        .bind(tier)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(CacheError::storage)?;

        row.map(StoredEntry::try_from).transpose()
    }

    async fn put(&self, tier: &str, key: &str, entry: StoredEntry) -> Result<(), CacheError> {
        let size = entry.response.size() as i64;
        let headers = serde_json::to_string(&entry.response.headers).map_err(CacheError::storage)?;
        let mut tx = self.pool.begin().await.map_err(CacheError::storage)?;

        if let Some(quota) = self.quota_bytes {
            let others: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(size), 0) FROM cache_entries WHERE NOT (tier = ? AND key = ?)",
            )
            .bind(tier)
            .bind(key)
            .fetch_one(&mut *tx)
            .await
            .map_err(CacheError::storage)?;

            if (others + size) as u64 > quota {
                return Err(CacheError::QuotaExceeded {
                    tier: tier.to_string(),
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO cache_entries (tier, key, status, headers, body, size, inserted_at, seq)
            VALUES (?, ?, ?, ?, ?, ?, ?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM cache_entries))
            ON CONFLICT(tier, key) DO UPDATE SET
                status = excluded.status,
                headers = excluded.headers,
                body = excluded.body,
                size = excluded.size,
                inserted_at = excluded.inserted_at,
                seq = excluded.seq
            "#,
        )
        .bind(tier)
        .bind(key)
        .bind(i64::from(entry.response.status))
        .bind(headers)
        .bind(entry.response.body.to_vec())
        .bind(size)
        .bind(to_epoch_millis(entry.inserted_at))
        .execute(&mut *tx)
        .await
        .map_err(CacheError::storage)?;

        tx.commit().await.map_err(CacheError::storage)
    }

    async fn delete(&self, tier: &str, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE tier = ? AND key = ?")
            .bind(tier)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(CacheError::storage)?;
        Ok(result.rows_affected() > 0)
    }

    async fn keys(&self, tier: &str) -> Result<Vec<String>, CacheError> {
        sqlx::query_scalar("SELECT key FROM cache_entries WHERE tier = ? ORDER BY seq ASC")
            .bind(tier)
            .fetch_all(&self.pool)
            .await
            .map_err(CacheError::storage)
    }

    async fn delete_tier(&self, tier: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE tier = ?")
            .bind(tier)
            .execute(&self.pool)
            .await
            .map_err(CacheError::storage)?;
        Ok(result.rows_affected() > 0)
    }
}
