use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vehicle_lookup::cache_store::{CacheStore, MemoryCacheStore};
use vehicle_lookup::config::Config;
use vehicle_lookup::cost::CostAccountant;
use vehicle_lookup::db::Database;
use vehicle_lookup::db_storage::PgCacheStore;
use vehicle_lookup::enrichment::LookupEngine;
use vehicle_lookup::handlers::{self, AppState};
use vehicle_lookup::normalization::Normalizer;
use vehicle_lookup::orchestrator::{ProviderOrchestrator, RetryPolicy};
use vehicle_lookup::services::{HistoryService, RegistryService, VehicleDataProvider};

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - The payload cache (Postgres when configured, in-memory otherwise).
/// - Provider clients and the resolution engine.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vehicle_lookup=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Payload cache: Postgres survives restarts and is shared between instances
    let cache: Arc<dyn CacheStore> = match &config.database_url {
        Some(url) => {
            let db = Database::new(url).await?;
            tracing::info!("Database connection pool established");
            let store = PgCacheStore::new(db.pool.clone());
            store.ensure_schema().await?;
            Arc::new(store)
        }
        None => {
            tracing::info!(
                "In-memory payload cache initialized ({} capacity)",
                config.cache_max_capacity
            );
            Arc::new(MemoryCacheStore::new(config.cache_max_capacity))
        }
    };

    // Provider clients, registry first: it wins ties when both fail equally
    let providers: Vec<Arc<dyn VehicleDataProvider>> = vec![
        Arc::new(RegistryService::new(&config)?),
        Arc::new(HistoryService::new(&config)?),
    ];
    tracing::info!("✓ Registry client initialized: {}", config.registry_base_url);
    tracing::info!("✓ History client initialized: {}", config.history_base_url);

    let orchestrator = ProviderOrchestrator::new(
        providers,
        Duration::from_secs(config.provider_timeout_secs),
        RetryPolicy::exponential(config.provider_max_retries),
    );

    let engine = LookupEngine::new(
        cache,
        orchestrator,
        Arc::new(CostAccountant::new()),
        Normalizer::default(),
        chrono::Duration::days(config.cache_freshness_days),
    );

    let app_state = Arc::new(AppState { engine });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        .route("/api/v1/vehicles/:vrm", get(handlers::lookup_vehicle))
        .layer(
            ServiceBuilder::new()
                // Lookups carry no body; anything large is abuse
                .layer(RequestBodyLimitLayer::new(64 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20. Every miss costs money.
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check (bypasses rate limiting)
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
