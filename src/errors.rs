use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::models::ProviderId;

/// Classified failure of a single provider call.
///
/// Every provider client maps its wire-level failures onto this taxonomy so the
/// orchestrator can reason about them without knowing which provider produced them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("vehicle not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Rank used when several providers fail at once; higher wins.
    ///
    /// Auth and rate-limit failures are actionable by the caller, so they beat a
    /// not-found, which in turn beats a generic transport failure.
    pub fn specificity(&self) -> u8 {
        match self {
            ProviderError::Auth(_) | ProviderError::RateLimited(_) => 3,
            ProviderError::NotFound(_) | ProviderError::InvalidInput(_) => 2,
            ProviderError::Network(_) => 1,
        }
    }

    /// Whether the orchestrator may try the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_) | ProviderError::RateLimited(_)
        )
    }

    /// Whether the failure should count against the provider's circuit breaker.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            ProviderError::Network(_) | ProviderError::RateLimited(_) | ProviderError::Auth(_)
        )
    }
}

/// Caller-visible failure of a vehicle resolution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    /// Raised before any network call; costs nothing.
    #[error("invalid registration format: {0}")]
    InvalidFormat(String),
    /// Every provider failed. `cause` is the most specific of `failures`.
    #[error("all providers failed: {cause}")]
    AllProvidersFailed {
        cause: ProviderError,
        failures: Vec<(ProviderId, ProviderError)>,
    },
    /// The shared resolution task died before producing a result.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure of the cache collaborator. Never fatal to a resolution.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend failure: {0}")]
    Backend(String),
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for CacheError {
    fn from(err: sqlx::Error) -> Self {
        CacheError::Backend(err.to_string())
    }
}

/// Application-specific error types for the HTTP adapter.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Upstream provider refused our credentials.
    UpstreamAuth(String),
    /// Upstream provider throttled us.
    RateLimited(String),
    /// Upstream provider unreachable or timed out.
    UpstreamTimeout(String),
    /// Internal server error.
    InternalError(String),
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::UpstreamAuth(msg) => write!(f, "Upstream authentication error: {}", msg),
            AppError::RateLimited(msg) => write!(f, "Rate limited: {}", msg),
            AppError::UpstreamTimeout(msg) => write!(f, "Upstream unavailable: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::UpstreamAuth(_) => StatusCode::BAD_GATEWAY,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    /// Converts the error into an HTTP response.
    ///
    /// Upstream and internal failures are logged in full and returned with a generic
    /// message so provider details never leak to clients.
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            AppError::NotFound(msg) | AppError::BadRequest(msg) => msg.clone(),
            AppError::UpstreamAuth(msg) => {
                tracing::error!("Provider authentication failed: {}", msg);
                "Vehicle data provider unavailable".to_string()
            }
            AppError::RateLimited(msg) => {
                tracing::warn!("Provider rate limit hit: {}", msg);
                "Vehicle data provider is busy, retry later".to_string()
            }
            AppError::UpstreamTimeout(msg) => {
                tracing::error!("Provider unreachable: {}", msg);
                "Vehicle data provider timed out".to_string()
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<LookupError> for AppError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::InvalidFormat(msg) => AppError::BadRequest(msg),
            LookupError::AllProvidersFailed { cause, .. } => match cause {
                ProviderError::NotFound(msg) => AppError::NotFound(msg),
                ProviderError::InvalidInput(msg) => AppError::BadRequest(msg),
                ProviderError::Auth(msg) => AppError::UpstreamAuth(msg),
                ProviderError::RateLimited(msg) => AppError::RateLimited(msg),
                ProviderError::Network(msg) => AppError::UpstreamTimeout(msg),
            },
            LookupError::Internal(msg) => AppError::InternalError(msg),
        }
    }
}
