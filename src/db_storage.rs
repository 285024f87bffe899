use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::cache_store::{CacheEntry, CacheStore};
use crate::errors::CacheError;
use crate::models::ProviderPayload;

/// Postgres-backed cache of provider payloads, one row per plate.
#[derive(Clone)]
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the cache table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vehicle_lookup_cache (
                plate       TEXT PRIMARY KEY,
                providers   TEXT[] NOT NULL,
                payloads    JSONB NOT NULL,
                checksum    TEXT NOT NULL,
                fetched_at  TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Deletes rows for several plates at once. Returns the number removed.
    pub async fn invalidate_many(&self, plates: &[String]) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM vehicle_lookup_cache WHERE plate = ANY($1)")
            .bind(plates)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get(&self, plate: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query(
            r#"
            SELECT plate, payloads, checksum, fetched_at
            FROM vehicle_lookup_cache
            WHERE plate = $1
            "#,
        )
        .bind(plate)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payloads: serde_json::Value = row.try_get("payloads")?;
        let payloads: Vec<ProviderPayload> = serde_json::from_value(payloads)?;
        let fetched_at: DateTime<Utc> = row.try_get("fetched_at")?;

        Ok(Some(CacheEntry {
            plate: row.try_get("plate")?,
            payloads,
            fetched_at,
            checksum: row.try_get("checksum")?,
        }))
    }

    async fn put(&self, plate: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let providers: Vec<String> = entry
            .providers()
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        let payloads = serde_json::to_value(&entry.payloads)?;

        sqlx::query(
            r#"
            INSERT INTO vehicle_lookup_cache (plate, providers, payloads, checksum, fetched_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (plate) DO UPDATE SET
                providers = EXCLUDED.providers,
                payloads = EXCLUDED.payloads,
                checksum = EXCLUDED.checksum,
                fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(plate)
        .bind(&providers)
        .bind(&payloads)
        .bind(&entry.checksum)
        .bind(entry.fetched_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Cached payloads for {} ({:?})", plate, providers);
        Ok(())
    }

    async fn invalidate(&self, plate: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM vehicle_lookup_cache WHERE plate = $1")
            .bind(plate)
            .execute(&self.pool)
            .await?;

        tracing::info!("Invalidated cache entry for {}", plate);
        Ok(())
    }
}
