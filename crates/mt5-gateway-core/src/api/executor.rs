//! Runs named MT5 operations over the managed session.

use serde_json::Value;
use tracing::{debug, warn};

use super::error::is_auth_status;
use super::{GatewayError, RawResponse};
use crate::auth::SessionManager;

/// Issues `GET /api/{operation}` calls.
///
/// If the server rejects the session (401/403) the executor forces one
/// re-authentication and retries once. Transport failures are returned
/// as-is; retrying those is up to the caller.
#[derive(Clone)]
pub struct RequestExecutor {
    session: SessionManager,
}

impl RequestExecutor {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub async fn execute(&self, operation: &str, params: &[(String, String)]) -> Result<Value, GatewayError> {
        let path = operation_path(operation)?;

        let connection = self.session.connection().await?;
        let response = connection.get(&path, params).await?;

        if !is_auth_status(response.status) {
            return Self::into_result(operation, response);
        }

        warn!(operation, status = response.status, "MT5 rejected session, re-authenticating");
        let connection = self.session.reauthenticate().await?;
        let response = connection.get(&path, params).await?;
        Self::into_result(operation, response)
    }

    fn into_result(operation: &str, response: RawResponse) -> Result<Value, GatewayError> {
        if !response.is_success() {
            debug!(operation, status = response.status, "MT5 operation failed");
            return Err(GatewayError::from_status(response.status, &response.body));
        }
        response
            .json()
            .map_err(|e| GatewayError::InvalidResponse(format!("{} returned non-JSON body: {}", operation, e)))
    }
}

/// `"/user/get"` and `"user/get"` both map to `/api/user/get`.
///
/// The result must stay under `/api/`: dot segments (plain or
/// percent-encoded), encoded slashes, backslashes, and query or fragment
/// markers are rejected before anything is sent.
fn operation_path(operation: &str) -> Result<String, GatewayError> {
    let trimmed = operation.trim().trim_matches('/');
    let invalid = || GatewayError::InvalidOperation(operation.to_string());

    if trimmed.is_empty() || trimmed.contains(['?', '#', '\\']) {
        return Err(invalid());
    }

    let lowered = trimmed.to_ascii_lowercase();
    if lowered.contains("%2f") || lowered.contains("%5c") {
        return Err(invalid());
    }
    if lowered
        .split('/')
        .map(|segment| segment.replace("%2e", "."))
        .any(|segment| segment == "." || segment == "..")
    {
        return Err(invalid());
    }

    Ok(format!("/api/{}", trimmed))
}
