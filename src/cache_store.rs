//! Keyed store of previously resolved provider payloads.
//!
//! The store never judges freshness: callers apply [`is_fresh`] so a maintenance
//! workflow can bypass the policy by invalidating an entry outright.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};

use crate::cache_validator::{payload_checksum, verify_payloads};
use crate::errors::CacheError;
use crate::models::{ProviderId, ProviderPayload};

/// Default freshness window for cached payloads.
pub const DEFAULT_FRESHNESS_DAYS: i64 = 30;

/// Authoritative cached resolution for one plate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub plate: String,
    pub payloads: Vec<ProviderPayload>,
    pub fetched_at: DateTime<Utc>,
    pub checksum: String,
}

impl CacheEntry {
    pub fn new(
        plate: &str,
        payloads: Vec<ProviderPayload>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, CacheError> {
        let checksum = payload_checksum(&payloads)?;
        Ok(Self {
            plate: plate.to_string(),
            payloads,
            fetched_at,
            checksum,
        })
    }

    /// Providers that contributed to this entry.
    pub fn providers(&self) -> Vec<ProviderId> {
        self.payloads.iter().map(|p| p.provider).collect()
    }

    pub fn is_intact(&self) -> bool {
        verify_payloads(&self.payloads, &self.checksum)
    }
}

/// Inclusive freshness check: an entry exactly `window` old is still fresh.
pub fn is_fresh(fetched_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    now.signed_duration_since(fetched_at) <= window
}

/// Cache persistence collaborator.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, plate: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Upsert; the new entry supersedes whatever was stored for the plate.
    async fn put(&self, plate: &str, entry: CacheEntry) -> Result<(), CacheError>;

    /// Removes the entry for data-correction workflows.
    async fn invalidate(&self, plate: &str) -> Result<(), CacheError>;
}

/// In-process store used when no database is configured, and in tests.
#[derive(Clone)]
pub struct MemoryCacheStore {
    entries: Cache<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new(max_capacity: u64) -> Self {
        // No TTL: the engine applies the freshness window itself.
        let entries = Cache::builder().max_capacity(max_capacity).build();
        Self { entries }
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new(50_000)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, plate: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.get(plate).await)
    }

    async fn put(&self, plate: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(plate.to_string(), entry).await;
        Ok(())
    }

    async fn invalidate(&self, plate: &str) -> Result<(), CacheError> {
        self.entries.invalidate(plate).await;
        Ok(())
    }
}
