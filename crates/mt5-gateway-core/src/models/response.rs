use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::SessionStatus;

/// Result of `GET /api/user/{login}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

/// Result of `POST /api/execute`. Upstream failures are reported here
/// rather than as an HTTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub status_code: u16,
    pub data: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub api: &'static str,
    /// "ok", "unavailable" (in-memory fallback) or "error"
    pub cache: &'static str,
    /// "ok" or "expired"
    pub mt5_auth: &'static str,
    pub session: SessionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub status_code: u16,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(status_code: u16, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            status_code,
            timestamp: Utc::now(),
        }
    }
}
