/// End-to-end resolution scenarios against in-process provider doubles
/// Covers caching, single-flight deduplication, cost accounting and the
/// merge/normalize/derive pipeline without any network access
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vehicle_lookup::cache_store::{CacheEntry, CacheStore, MemoryCacheStore};
use vehicle_lookup::core::enrichment::LookupEngine;
use vehicle_lookup::core::errors::{CacheError, LookupError, ProviderError};
use vehicle_lookup::core::models::{
    Field, FieldSource, ProviderFetch, ProviderId, ProviderPayload, ResolveOptions,
};
use vehicle_lookup::core::normalization::Normalizer;
use vehicle_lookup::cost::CostAccountant;
use vehicle_lookup::integrations::services::{ProviderResult, VehicleDataProvider};
use vehicle_lookup::orchestrator::{ProviderOrchestrator, RetryPolicy};

/// Provider double answering every call with the same outcome after a delay
struct StubProvider {
    id: ProviderId,
    outcome: Result<Value, ProviderError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StubProvider {
    fn ok(id: ProviderId, body: Value) -> Arc<Self> {
        Self::build(id, Ok(body), Duration::ZERO)
    }

    fn failing(id: ProviderId, err: ProviderError) -> Arc<Self> {
        Self::build(id, Err(err), Duration::ZERO)
    }

    fn build(id: ProviderId, outcome: Result<Value, ProviderError>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            id,
            outcome,
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn delayed(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        Self::build(self.id, self.outcome.clone(), delay)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VehicleDataProvider for StubProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn fetch(&self, _plate: &str, _mileage: Option<u32>) -> ProviderResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.outcome.clone().map(|body| ProviderFetch {
            payload: ProviderPayload::new(self.id, body),
            billable: true,
        })
    }
}

struct Harness {
    engine: LookupEngine,
    cache: Arc<MemoryCacheStore>,
    accountant: Arc<CostAccountant>,
}

fn harness(providers: Vec<Arc<StubProvider>>, timeout: Duration) -> Harness {
    let cache = Arc::new(MemoryCacheStore::new(100));
    let accountant = Arc::new(CostAccountant::new());
    let providers = providers
        .into_iter()
        .map(|p| p as Arc<dyn VehicleDataProvider>)
        .collect();
    let orchestrator = ProviderOrchestrator::new(providers, timeout, RetryPolicy::none());
    let engine = LookupEngine::new(
        cache.clone(),
        orchestrator,
        Arc::clone(&accountant),
        Normalizer::default(),
        ChronoDuration::days(30),
    );

    Harness {
        engine,
        cache,
        accountant,
    }
}

fn golf_registry() -> Value {
    json!({
        "registrationNumber": "AB12CDE",
        "make": "VOLKSWAGEN",
        "model": "Golf GTE",
        "fuelType": "Petrol",
        "yearOfManufacture": 2020,
        "colour": "WHITE",
        "co2Emissions": 33,
        "engineCapacity": 1395
    })
}

fn focus_history() -> Value {
    json!({
        "responseStatus": "Success",
        "vehicle": {
            "make": "FORD",
            "model": "Focus",
            "variant": "ST-Line X 1.0 EcoBoost mHEV",
            "bodyStyle": "HATCHBACK",
            "fuelType": "Diesel",
            "numberOfDoors": 5,
            "transmission": "null",
            "insuranceGroup": "18E"
        },
        "history": {"stolen": false, "previousKeepers": 0}
    })
}

#[tokio::test]
async fn test_golf_gte_with_history_timeout() {
    let registry = StubProvider::ok(ProviderId::Registry, golf_registry());
    let history = StubProvider::ok(ProviderId::History, json!({})).delayed(Duration::from_secs(2));
    let h = harness(
        vec![registry.clone(), history.clone()],
        Duration::from_millis(200),
    );

    let resolution = h
        .engine
        .resolve("ab12 cde", ResolveOptions::default())
        .await
        .unwrap();
    let profile = resolution.profile;

    assert_eq!(profile.plate, "AB12CDE");
    assert_eq!(profile.model.as_deref(), Some("Golf"));
    assert_eq!(profile.variant.as_deref(), Some("GTE"));
    assert_eq!(profile.fuel_type.as_deref(), Some("Petrol"));
    assert!(!profile.mild_hybrid);
    assert!(profile.plug_in_hybrid);
    assert_eq!(resolution.cost.paid_calls, 1);
    assert_eq!(resolution.cost.providers_charged, vec![ProviderId::Registry]);
    assert!(!resolution.cost.cache_hit);

    // Partial results are cached like any other
    let cached = h.cache.get("AB12CDE").await.unwrap().unwrap();
    assert_eq!(cached.providers(), vec![ProviderId::Registry]);
}

#[tokio::test]
async fn test_mild_hybrid_fuel_from_history() {
    let history = StubProvider::ok(ProviderId::History, focus_history());
    let h = harness(vec![history], Duration::from_secs(1));

    let profile = h
        .engine
        .resolve("FD19XYZ", ResolveOptions::default())
        .await
        .unwrap()
        .profile;

    assert!(profile.mild_hybrid);
    assert_eq!(profile.fuel_type.as_deref(), Some("Diesel Hybrid"));
    assert_eq!(profile.body_type.as_deref(), Some("Hatchback"));
    assert_eq!(profile.transmission, None);
    assert_eq!(profile.insurance_group, Some(18));
    assert_eq!(profile.source_of(Field::InsuranceGroup), Some(FieldSource::History));
    assert_eq!(profile.previous_keepers, Some(0));
    assert_eq!(profile.stolen, Some(false));
}

#[tokio::test]
async fn test_second_lookup_is_free_cache_hit() {
    let registry = StubProvider::ok(ProviderId::Registry, golf_registry());
    let h = harness(vec![registry.clone()], Duration::from_secs(1));

    let first = h
        .engine
        .resolve("AB12CDE", ResolveOptions::default())
        .await
        .unwrap();
    let second = h
        .engine
        .resolve("AB12 CDE", ResolveOptions::default())
        .await
        .unwrap();

    assert_eq!(registry.calls(), 1);
    assert_eq!(second.cost.paid_calls, 0);
    assert!(second.cost.cache_hit);
    assert_eq!(second.profile.model, first.profile.model);
    assert_eq!(second.profile.variant, first.profile.variant);
    assert_eq!(h.accountant.total(), 1);
}

#[tokio::test]
async fn test_stale_entry_refetched() {
    let registry = StubProvider::ok(ProviderId::Registry, golf_registry());
    let h = harness(vec![registry.clone()], Duration::from_secs(1));

    let stale = CacheEntry::new(
        "AB12CDE",
        vec![ProviderPayload::new(ProviderId::Registry, json!({"make": "OLD"}))],
        Utc::now() - ChronoDuration::days(31),
    )
    .unwrap();
    h.cache.put("AB12CDE", stale).await.unwrap();

    let resolution = h
        .engine
        .resolve("AB12CDE", ResolveOptions::default())
        .await
        .unwrap();

    assert_eq!(registry.calls(), 1);
    assert_eq!(resolution.profile.make.as_deref(), Some("VOLKSWAGEN"));
}

#[tokio::test]
async fn test_entry_within_window_served() {
    let registry = StubProvider::ok(ProviderId::Registry, golf_registry());
    let h = harness(vec![registry.clone()], Duration::from_secs(1));

    let entry = CacheEntry::new(
        "AB12CDE",
        vec![ProviderPayload::new(ProviderId::Registry, json!({"make": "SKODA", "model": "Octavia"}))],
        Utc::now() - ChronoDuration::days(29),
    )
    .unwrap();
    h.cache.put("AB12CDE", entry).await.unwrap();

    let resolution = h
        .engine
        .resolve("AB12CDE", ResolveOptions::default())
        .await
        .unwrap();

    assert_eq!(registry.calls(), 0);
    assert_eq!(resolution.profile.make.as_deref(), Some("SKODA"));
    assert!(resolution.cost.cache_hit);
}

#[tokio::test]
async fn test_tampered_entry_treated_as_miss() {
    let registry = StubProvider::ok(ProviderId::Registry, golf_registry());
    let h = harness(vec![registry.clone()], Duration::from_secs(1));

    let mut entry = CacheEntry::new(
        "AB12CDE",
        vec![ProviderPayload::new(ProviderId::Registry, json!({"make": "SKODA"}))],
        Utc::now(),
    )
    .unwrap();
    entry.payloads[0].body = json!({"make": "FERRARI"});
    h.cache.put("AB12CDE", entry).await.unwrap();

    let resolution = h
        .engine
        .resolve("AB12CDE", ResolveOptions::default())
        .await
        .unwrap();

    assert_eq!(registry.calls(), 1);
    assert_eq!(resolution.profile.make.as_deref(), Some("VOLKSWAGEN"));
}

#[tokio::test]
async fn test_force_refresh_bypasses_fresh_entry() {
    let registry = StubProvider::ok(ProviderId::Registry, golf_registry());
    let h = harness(vec![registry.clone()], Duration::from_secs(1));

    h.engine
        .resolve("AB12CDE", ResolveOptions::default())
        .await
        .unwrap();
    let forced = h
        .engine
        .resolve(
            "AB12CDE",
            ResolveOptions {
                force_refresh: true,
                mileage: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(registry.calls(), 2);
    assert_eq!(forced.cost.paid_calls, 1);
    assert_eq!(h.accountant.for_plate("AB12CDE"), 2);
}

#[tokio::test]
async fn test_concurrent_lookups_share_one_fetch() {
    let registry = StubProvider::ok(ProviderId::Registry, golf_registry())
        .delayed(Duration::from_millis(100));
    let history =
        StubProvider::ok(ProviderId::History, focus_history()).delayed(Duration::from_millis(100));
    let h = harness(
        vec![registry.clone(), history.clone()],
        Duration::from_secs(2),
    );

    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine.resolve("AB12CDE", ResolveOptions::default()).await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(registry.calls(), 1);
    assert_eq!(history.calls(), 1);
    assert_eq!(h.accountant.total(), 2);
    assert_eq!(h.engine.in_flight(), 0);
    for result in &results {
        assert_eq!(result, &results[0]);
        assert_eq!(result.cost.paid_calls, 2);
    }
}

#[tokio::test]
async fn test_concurrent_forced_refreshes_share_one_fetch() {
    let registry = StubProvider::ok(ProviderId::Registry, golf_registry())
        .delayed(Duration::from_millis(100));
    let h = harness(vec![registry.clone()], Duration::from_secs(2));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .resolve(
                    "AB12CDE",
                    ResolveOptions {
                        force_refresh: true,
                        mileage: None,
                    },
                )
                .await
        }));
    }

    for handle in handles {
        let resolution = handle.await.unwrap().unwrap();
        assert!(!resolution.cost.cache_hit);
    }

    assert_eq!(registry.calls(), 1);
    assert_eq!(h.accountant.total(), 1);
}

#[tokio::test]
async fn test_entry_visible_once_flight_released() {
    let registry = StubProvider::ok(ProviderId::Registry, golf_registry())
        .delayed(Duration::from_millis(100));
    let h = harness(vec![registry.clone()], Duration::from_secs(2));

    let leader = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.resolve("AB12CDE", ResolveOptions::default()).await })
    };

    while h.engine.in_flight() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    while h.engine.in_flight() > 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // The key is gone, so the entry must already be in the cache
    let late = h
        .engine
        .resolve("AB12CDE", ResolveOptions::default())
        .await
        .unwrap();

    assert!(late.cost.cache_hit);
    assert_eq!(late.cost.paid_calls, 0);
    assert!(leader.await.unwrap().is_ok());
    assert_eq!(registry.calls(), 1);
    assert_eq!(h.accountant.total(), 1);
}

/// Cache backend that is down for every operation
#[derive(Default)]
struct UnavailableStore {
    gets: AtomicUsize,
    puts: AtomicUsize,
}

#[async_trait]
impl CacheStore for UnavailableStore {
    async fn get(&self, _plate: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn put(&self, _plate: &str, _entry: CacheEntry) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn invalidate(&self, _plate: &str) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }
}

#[tokio::test]
async fn test_cache_outage_does_not_fail_resolution() {
    let registry = StubProvider::ok(ProviderId::Registry, golf_registry());
    let store = Arc::new(UnavailableStore::default());
    let accountant = Arc::new(CostAccountant::new());
    let engine = LookupEngine::new(
        store.clone(),
        ProviderOrchestrator::new(
            vec![registry.clone() as Arc<dyn VehicleDataProvider>],
            Duration::from_secs(1),
            RetryPolicy::none(),
        ),
        Arc::clone(&accountant),
        Normalizer::default(),
        ChronoDuration::days(30),
    );

    let resolution = engine
        .resolve("AB12CDE", ResolveOptions::default())
        .await
        .unwrap();

    assert!(!resolution.cost.cache_hit);
    assert_eq!(resolution.cost.paid_calls, 1);
    assert_eq!(resolution.profile.make.as_deref(), Some("VOLKSWAGEN"));
    assert_eq!(registry.calls(), 1);
    assert_eq!(accountant.total(), 1);
    assert!(store.gets.load(Ordering::SeqCst) >= 1);
    assert_eq!(store.puts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_plate_costs_nothing() {
    let registry = StubProvider::ok(ProviderId::Registry, golf_registry());
    let h = harness(vec![registry.clone()], Duration::from_secs(1));

    let err = h
        .engine
        .resolve("AB-12!", ResolveOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, LookupError::InvalidFormat(_)));
    assert_eq!(registry.calls(), 0);
    assert_eq!(h.accountant.total(), 0);
}

#[tokio::test]
async fn test_all_providers_failed_not_cached() {
    let registry = StubProvider::failing(
        ProviderId::Registry,
        ProviderError::NotFound("no vehicle".into()),
    );
    let history = StubProvider::failing(
        ProviderId::History,
        ProviderError::Network("connection reset".into()),
    );
    let h = harness(vec![registry, history], Duration::from_secs(1));

    let err = h
        .engine
        .resolve("AB12CDE", ResolveOptions::default())
        .await
        .unwrap_err();

    match err {
        LookupError::AllProvidersFailed { cause, failures } => {
            assert!(matches!(cause, ProviderError::NotFound(_)));
            assert_eq!(failures.len(), 2);
        }
        other => panic!("expected AllProvidersFailed, got {:?}", other),
    }
    assert!(h.cache.get("AB12CDE").await.unwrap().is_none());
    assert_eq!(h.accountant.total(), 0);
}

#[tokio::test]
async fn test_registry_wins_regulatory_fields() {
    let registry = StubProvider::ok(
        ProviderId::Registry,
        json!({"make": "FORD", "co2Emissions": 118, "motStatus": "Valid", "yearOfManufacture": 2019}),
    );
    let history = StubProvider::ok(ProviderId::History, focus_history());
    let h = harness(vec![registry, history], Duration::from_secs(1));

    let profile = h
        .engine
        .resolve("FD19XYZ", ResolveOptions::default())
        .await
        .unwrap()
        .profile;

    assert_eq!(profile.co2_g_km, Some(118));
    assert_eq!(profile.source_of(Field::Co2), Some(FieldSource::Registry));
    assert_eq!(profile.variant.as_deref(), Some("ST-Line X 1.0 EcoBoost mHEV"));
    assert_eq!(profile.source_of(Field::Variant), Some(FieldSource::History));
    assert_eq!(profile.title, "2019 FORD Focus ST-Line X 1.0 EcoBoost mHEV");
    // Year 2019 falls under the flat rate
    assert_eq!(profile.annual_tax, Some(195));
    assert_eq!(profile.source_of(Field::AnnualTax), Some(FieldSource::Calculated));
}
