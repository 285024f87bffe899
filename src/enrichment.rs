/// Vehicle resolution workflow shared by the HTTP handlers and maintenance tools
///
/// 1. Normalize the plate (fails fast, zero cost)
/// 2. Serve a fresh cache entry when one exists
/// 3. Otherwise join or start the single in-flight fetch for the plate
/// 4. Merge, normalize and derive the profile from the raw payloads
/// 5. Write the payloads back to the cache and report what the fetch cost
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::cache_store::{is_fresh, CacheEntry, CacheStore};
use crate::cost::CostAccountant;
use crate::derived::fill_derived;
use crate::errors::LookupError;
use crate::merge::{apply_merged, merge_payloads};
use crate::models::{CostReport, ProviderPayload, Resolution, ResolveOptions, VehicleProfile};
use crate::normalization::Normalizer;
use crate::orchestrator::ProviderOrchestrator;
use crate::plate::normalize_plate;
use crate::single_flight::SingleFlight;

/// Builds a profile from raw provider payloads: merge, normalize, derive.
///
/// Cache hits go through here too, so a change to the merge or normalization
/// rules applies to cached vehicles without refetching them.
pub fn build_profile(
    plate: &str,
    payloads: &[ProviderPayload],
    resolved_at: DateTime<Utc>,
    normalizer: &Normalizer,
) -> VehicleProfile {
    let mut profile = VehicleProfile::empty(plate, resolved_at);
    apply_merged(&mut profile, &merge_payloads(payloads));
    normalizer.apply(&mut profile);
    fill_derived(&mut profile);
    profile
}

/// Entry point for vehicle lookups. Cheap to clone; clones share caches and state.
#[derive(Clone)]
pub struct LookupEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    cache: Arc<dyn CacheStore>,
    orchestrator: ProviderOrchestrator,
    accountant: Arc<CostAccountant>,
    normalizer: Normalizer,
    freshness: chrono::Duration,
    flights: SingleFlight<Result<Resolution, LookupError>>,
}

impl LookupEngine {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        orchestrator: ProviderOrchestrator,
        accountant: Arc<CostAccountant>,
        normalizer: Normalizer,
        freshness: chrono::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                cache,
                orchestrator,
                accountant,
                normalizer,
                freshness,
                flights: SingleFlight::new(),
            }),
        }
    }

    /// Resolves a plate to a vehicle profile and the cost of doing so.
    pub async fn resolve(
        &self,
        raw_plate: &str,
        options: ResolveOptions,
    ) -> Result<Resolution, LookupError> {
        let plate = normalize_plate(raw_plate)?;

        if !options.force_refresh {
            if let Some(resolution) = self.inner.cached_resolution(&plate).await {
                return Ok(resolution);
            }
        }

        let inner = Arc::clone(&self.inner);
        let key = plate.clone();
        self.inner
            .flights
            .run(&plate, move || async move { inner.fetch_and_store(&key, options).await })
            .await
            .unwrap_or_else(|aborted| {
                tracing::error!("{}: resolution task failed: {}", plate, aborted);
                Err(LookupError::Internal(aborted.to_string()))
            })
    }

    pub fn accountant(&self) -> &Arc<CostAccountant> {
        &self.inner.accountant
    }

    /// Plates with a provider fetch currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }
}

impl EngineInner {
    /// Fresh, intact cache entry rebuilt into a zero-cost resolution.
    ///
    /// Backend errors, tampered entries and stale entries are all treated as a miss.
    async fn cached_resolution(&self, plate: &str) -> Option<Resolution> {
        let entry = match self.cache.get(plate).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!("{}: cache miss", plate);
                return None;
            }
            Err(e) => {
                tracing::warn!("{}: cache read failed, treating as miss: {}", plate, e);
                return None;
            }
        };

        if !entry.is_intact() {
            tracing::warn!("{}: cached payloads failed checksum, refetching", plate);
            return None;
        }

        if !is_fresh(entry.fetched_at, Utc::now(), self.freshness) {
            tracing::debug!("{}: cache entry from {} is stale", plate, entry.fetched_at);
            return None;
        }

        tracing::info!("{}: cache hit ({:?})", plate, entry.providers());
        Some(Resolution {
            profile: build_profile(plate, &entry.payloads, entry.fetched_at, &self.normalizer),
            cost: CostReport::cache_hit(),
        })
    }

    async fn fetch_and_store(
        &self,
        plate: &str,
        options: ResolveOptions,
    ) -> Result<Resolution, LookupError> {
        // Another flight may have filled the cache between our miss and taking the key.
        if !options.force_refresh {
            if let Some(resolution) = self.cached_resolution(plate).await {
                return Ok(resolution);
            }
        }

        let orchestration = self.orchestrator.fetch_all(plate, options.mileage).await?;

        let charged = orchestration.billable_providers();
        for provider in &charged {
            self.accountant.record(plate, *provider);
        }
        let cost = CostReport {
            paid_calls: charged.len() as u32,
            providers_charged: charged,
            cache_hit: false,
        };

        let fetched_at = Utc::now();
        let payloads = orchestration.payloads();
        let profile = build_profile(plate, &payloads, fetched_at, &self.normalizer);

        match CacheEntry::new(plate, payloads, fetched_at) {
            Ok(entry) => {
                if let Err(e) = self.cache.put(plate, entry).await {
                    tracing::warn!("{}: failed to cache payloads: {}", plate, e);
                }
            }
            Err(e) => tracing::warn!("{}: failed to build cache entry: {}", plate, e),
        }

        tracing::info!(
            "{}: resolved '{}' ({} paid calls)",
            plate,
            profile.title,
            cost.paid_calls
        );
        Ok(Resolution { profile, cost })
    }
}
