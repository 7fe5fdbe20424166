use axum::extract::State;
use axum::Json;
use serde::Serialize;

use mt5_gateway_core::models::HealthResponse;

use crate::app::SharedState;

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub status: &'static str,
}

/// GET /
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "MT5 Gateway",
        version: env!("CARGO_PKG_VERSION"),
        status: "running",
    })
}

/// GET /health
///
/// Always 200; degradation is reported in the body.
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(state.client.health().await)
}
