//! API key check for the `/api` routes.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::app::SharedState;
use crate::error::ApiError;

/// Header carrying the client's API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Compares the `X-API-Key` header against the configured key.
/// With no key configured every request is let through.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyValidator {
    key: Option<String>,
}

impl ApiKeyValidator {
    pub fn new(key: Option<&str>) -> Self {
        Self {
            key: key.filter(|k| !k.is_empty()).map(str::to_string),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.key.is_some()
    }

    pub fn validate(&self, provided: Option<&str>) -> bool {
        match (&self.key, provided) {
            (None, _) => true,
            (Some(expected), Some(provided)) => constant_time_compare(expected.as_bytes(), provided.as_bytes()),
            (Some(_), None) => false,
        }
    }
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn require_api_key(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if !state.api_keys.validate(provided) {
        debug!(path = %request.uri().path(), "Rejected request with bad API key");
        return Err(ApiError::unauthorized("Invalid or missing API key"));
    }

    Ok(next.run(request).await)
}
