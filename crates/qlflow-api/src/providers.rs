//! Provider health introspection routes

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::common::AppState;

/// One provider's health in the introspection response
#[derive(Debug, Serialize, ToSchema)]
pub struct ProviderHealthView {
    pub activity: String,
    pub provider: String,
    pub circuit: String,
    pub error_rate: f64,
    pub p95_latency_ms: u64,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
}

/// Create provider routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/providers/health", get(provider_health))
        .with_state(state)
}

/// GET /api/v1/providers/health - Snapshot of provider health records
#[utoipa::path(
    get,
    path = "/api/v1/providers/health",
    responses(
        (status = 200, description = "Provider health snapshot", body = Vec<ProviderHealthView>)
    ),
    tag = "providers"
)]
pub async fn provider_health(
    State(state): State<AppState>,
) -> Json<Vec<ProviderHealthView>> {
    let snapshot = state.runner.scheduler().dispatcher().health().snapshot();
    Json(
        snapshot
            .into_iter()
            .map(|s| ProviderHealthView {
                activity: s.activity,
                provider: s.provider,
                circuit: s.circuit.to_string(),
                error_rate: s.error_rate,
                p95_latency_ms: s.p95_latency_ms,
                consecutive_failures: s.consecutive_failures,
                total_calls: s.total_calls,
                total_failures: s.total_failures,
            })
            .collect(),
    )
}
