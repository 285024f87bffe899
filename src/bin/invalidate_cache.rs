//! Script to drop cached provider payloads for specific plates.
//!
//! Used when a provider corrected its data and the cached copy must not be
//! served for the rest of its freshness window.
//!
//! Usage: `invalidate-cache <VRM> [<VRM> ...]`

use dotenvy::dotenv;
use std::env;

use vehicle_lookup::db::Database;
use vehicle_lookup::db_storage::PgCacheStore;
use vehicle_lookup::plate::normalize_plate;

/// Main entry point for the invalidation script.
///
/// Normalizes every argument the same way lookups do, so `"ab12 cde"` removes
/// the row cached for `AB12CDE`. Invalid plates abort before touching the database.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let plates = env::args()
        .skip(1)
        .map(|raw| normalize_plate(&raw))
        .collect::<Result<Vec<_>, _>>()?;
    if plates.is_empty() {
        anyhow::bail!("usage: invalidate-cache <VRM> [<VRM> ...]");
    }

    let database_url = env::var("DATABASE_URL")
        .or_else(|_| env::var("DB_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let db = Database::new(&database_url).await?;
    let store = PgCacheStore::new(db.pool.clone());

    tracing::info!("Connected to database. Invalidating {} plates...", plates.len());

    let removed = store.invalidate_many(&plates).await?;

    tracing::info!(
        "Invalidation complete. Removed {} of {} cached entries.",
        removed,
        plates.len()
    );

    Ok(())
}
