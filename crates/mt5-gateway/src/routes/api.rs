use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use mt5_gateway_core::auth::SessionStatus;
use mt5_gateway_core::models::{ExecuteRequest, ExecuteResponse, UserResponse};
use mt5_gateway_core::GatewayError;

use crate::app::SharedState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: &'static str,
    pub timestamp: DateTime<Utc>,
    pub session: SessionStatus,
}

#[derive(Debug, Serialize)]
pub struct ConnectionTestResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_user: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /api/auth - force a fresh handshake
pub async fn force_auth(State(state): State<SharedState>) -> Result<Json<AuthResponse>, ApiError> {
    let session = state.client.authenticate().await?;
    info!("Forced MT5 authentication successful");
    Ok(Json(AuthResponse {
        success: true,
        message: "Authentication successful",
        timestamp: Utc::now(),
        session,
    }))
}

/// GET /api/user/:login
pub async fn get_user(
    State(state): State<SharedState>,
    Path(login): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let lookup = state.client.fetch_user(&login).await?;
    Ok(Json(UserResponse {
        success: true,
        data: Some(lookup.data),
        error: None,
        cached: lookup.cached,
        cached_at: lookup.cached.then_some(lookup.cached_at),
    }))
}

/// POST /api/execute
///
/// Upstream rejections come back as `success: false` with the upstream
/// status code in the body; only gateway-side failures are HTTP errors.
pub async fn execute(
    State(state): State<SharedState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let endpoint = request.endpoint.as_str();

    match state.client.execute(endpoint, &request.query()).await {
        Ok(data) => Ok(Json(ExecuteResponse {
            success: true,
            status_code: 200,
            data: Some(data),
            error: None,
        })),
        Err(GatewayError::RemoteCall { status, body }) => Ok(Json(ExecuteResponse {
            success: false,
            status_code: status,
            data: None,
            error: Some(body),
        })),
        Err(e) => {
            warn!(endpoint, error = %e, "Error executing command");
            Err(e.into())
        }
    }
}

/// GET /api/test - look up the configured test account
pub async fn test_connection(State(state): State<SharedState>) -> Json<ConnectionTestResponse> {
    match state.client.fetch_user(&state.test_login).await {
        Ok(lookup) => Json(ConnectionTestResponse {
            success: true,
            message: "MT5 connection working",
            test_user: Some(lookup.data),
            error: None,
        }),
        Err(e) => {
            warn!(login = %state.test_login, error = %e, "MT5 connection test failed");
            Json(ConnectionTestResponse {
                success: false,
                message: "MT5 connection failed",
                test_user: None,
                error: Some(e.to_string()),
            })
        }
    }
}
