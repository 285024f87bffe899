use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::enrichment::LookupEngine;
use crate::errors::AppError;
use crate::models::{CostReport, ResolveOptions, VehicleProfile};

/// Application state shared across all request handlers.
pub struct AppState {
    /// Resolution engine: cache, single-flight, providers and cost accounting.
    pub engine: LookupEngine,
}

/// Response body of a vehicle lookup.
#[derive(Debug, Serialize)]
pub struct VehicleLookupResponse {
    pub vehicle: VehicleProfile,
    pub cost: CostReport,
}

/// Health check endpoint.
///
/// Returns the service status, version, and health information.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "vehicle-lookup",
            "version": env!("CARGO_PKG_VERSION"),
            "in_flight": state.engine.in_flight(),
            "paid_calls": state.engine.accountant().total(),
        })),
    )
}

/// GET /api/v1/vehicles/:vrm
///
/// Resolves a registration mark to a normalized vehicle profile.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `vrm` - The registration mark as typed by the user; spacing and case are ignored.
/// * `options` - `force_refresh` to bypass the cache, `mileage` for the history provider.
pub async fn lookup_vehicle(
    State(state): State<Arc<AppState>>,
    Path(vrm): Path<String>,
    Query(options): Query<ResolveOptions>,
) -> Result<Json<VehicleLookupResponse>, AppError> {
    tracing::info!("GET /vehicles/{} (force_refresh={})", vrm, options.force_refresh);

    let resolution = state.engine.resolve(&vrm, options).await?;

    Ok(Json(VehicleLookupResponse {
        vehicle: resolution.profile,
        cost: resolution.cost,
    }))
}
