use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>, // Falls back to the in-memory cache when unset
    pub port: u16,
    pub registry_base_url: String,
    pub registry_api_key: String,
    pub history_base_url: String,
    pub history_api_key: String,
    pub provider_timeout_secs: u64,
    pub provider_max_retries: u32,
    pub cache_freshness_days: i64,
    pub cache_max_capacity: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|url| {
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })
                .transpose()?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            registry_base_url: required_url("REGISTRY_BASE_URL")?,
            registry_api_key: required_secret("REGISTRY_API_KEY")?,
            history_base_url: required_url("HISTORY_BASE_URL")?,
            history_api_key: required_secret("HISTORY_API_KEY")?,
            provider_timeout_secs: std::env::var("PROVIDER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| anyhow::anyhow!("PROVIDER_TIMEOUT_SECS must be a positive number"))?,
            provider_max_retries: std::env::var("PROVIDER_MAX_RETRIES")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PROVIDER_MAX_RETRIES must be a number"))?,
            cache_freshness_days: std::env::var("CACHE_FRESHNESS_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<i64>()
                .ok()
                .filter(|days| *days > 0)
                .ok_or_else(|| anyhow::anyhow!("CACHE_FRESHNESS_DAYS must be a positive number"))?,
            cache_max_capacity: std::env::var("CACHE_MAX_CAPACITY")
                .unwrap_or_else(|_| "50000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CACHE_MAX_CAPACITY must be a number"))?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        if let Some(ref url) = config.database_url {
            tracing::debug!("Database URL: {}...", redacted_prefix(url));
        } else {
            tracing::info!("No DATABASE_URL configured, using in-memory cache");
        }
        tracing::debug!("Registry Base URL: {}", config.registry_base_url);
        tracing::debug!("History Base URL: {}", config.history_base_url);
        tracing::debug!(
            "Provider timeout: {}s, max retries: {}",
            config.provider_timeout_secs,
            config.provider_max_retries
        );
        tracing::debug!("Cache freshness window: {} days", config.cache_freshness_days);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn required_url(name: &str) -> anyhow::Result<String> {
    let url = std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))?;
    if url.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn required_secret(name: &str) -> anyhow::Result<String> {
    let value = std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))?;
    if value.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    Ok(value)
}

/// First 20 characters of a connection string, enough to identify the host
/// without the credentials.
fn redacted_prefix(url: &str) -> String {
    url.chars().take(20).collect()
}
