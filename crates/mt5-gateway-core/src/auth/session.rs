use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use super::codec::{self, SecretFingerprint};
use crate::api::Connection;

/// MT5 drops idle manager sessions after about five minutes.
pub const SESSION_VALIDITY: Duration = Duration::from_secs(300);

/// One authenticated connection to the MT5 server.
pub struct Session {
    connection: Arc<dyn Connection>,
    fingerprint: SecretFingerprint,
    authenticated_at: Instant,
    authenticated_at_utc: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(connection: Arc<dyn Connection>, fingerprint: SecretFingerprint) -> Self {
        Self {
            connection,
            fingerprint,
            authenticated_at: Instant::now(),
            authenticated_at_utc: Utc::now(),
        }
    }

    pub fn connection(&self) -> Arc<dyn Connection> {
        Arc::clone(&self.connection)
    }

    /// Validate the server's counter-proof for our client nonce
    pub fn verify_server_proof(&self, cli_rand: &str, proof: &str) -> bool {
        codec::validate_server_proof(&self.fingerprint, cli_rand, proof)
    }

    pub fn is_expired(&self, validity: Duration) -> bool {
        self.authenticated_at.elapsed() >= validity
    }

    pub fn time_until_expiry(&self, validity: Duration) -> Duration {
        validity.saturating_sub(self.authenticated_at.elapsed())
    }

    pub fn authenticated_at(&self) -> DateTime<Utc> {
        self.authenticated_at_utc
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Expired,
}

/// Point-in-time view of the session for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub expires_in_secs: Option<u64>,
}

impl SessionStatus {
    pub fn is_valid(&self) -> bool {
        self.state == SessionState::Authenticated
    }
}
