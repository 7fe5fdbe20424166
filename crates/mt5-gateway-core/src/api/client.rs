//! Gateway facade over the MT5 Web API.
//!
//! `GatewayClient` bundles the request executor with the cache facade and
//! is what the HTTP layer talks to.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::{GatewayError, RequestExecutor};
use crate::auth::{SessionManager, SessionStatus};
use crate::cache::{CacheBackend, CacheManager, CachedData};
use crate::models::{HealthChecks, HealthResponse};

/// User records change rarely; a minute of staleness is acceptable.
const USER_CACHE_TTL: Duration = Duration::from_secs(60);

/// Marker written after a successful forced authentication
const AUTH_STATUS_KEY: &str = "mt5:auth:status";
const AUTH_STATUS_TTL: Duration = Duration::from_secs(300);

/// Payload plus whether it came from the cache.
#[derive(Debug, Clone)]
pub struct Lookup<T> {
    pub data: T,
    pub cached: bool,
    pub cached_at: DateTime<Utc>,
}

/// Clone is cheap - the session and cache are shared.
#[derive(Clone)]
pub struct GatewayClient {
    executor: RequestExecutor,
    cache: Arc<CacheManager>,
}

impl GatewayClient {
    pub fn new(session: SessionManager, cache: Arc<CacheManager>) -> Self {
        Self {
            executor: RequestExecutor::new(session),
            cache,
        }
    }

    pub fn session(&self) -> &SessionManager {
        self.executor.session()
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Fetch a user record via `user/get`, served from cache for 60s
    pub async fn fetch_user(&self, login: &str) -> Result<Lookup<Value>, GatewayError> {
        let cache_key = format!("user:{}", login);

        if let Some(cached) = self.cache.get_json::<CachedData<Value>>(&cache_key).await {
            debug!(login, age_secs = cached.age_seconds(), "User served from cache");
            return Ok(Lookup {
                data: cached.data,
                cached: true,
                cached_at: cached.cached_at,
            });
        }

        let data = self
            .executor
            .execute("user/get", &[("login".to_string(), login.to_string())])
            .await?;

        let fresh = CachedData::new(data);
        self.cache.set_json(&cache_key, &fresh, USER_CACHE_TTL).await;

        Ok(Lookup {
            data: fresh.data,
            cached: false,
            cached_at: fresh.cached_at,
        })
    }

    /// Run an arbitrary operation. Not cached.
    pub async fn execute(&self, operation: &str, params: &[(String, String)]) -> Result<Value, GatewayError> {
        self.executor.execute(operation, params).await
    }

    /// Force a handshake now
    pub async fn authenticate(&self) -> Result<SessionStatus, GatewayError> {
        self.session().authenticate().await?;
        self.cache.set(AUTH_STATUS_KEY, "authenticated", AUTH_STATUS_TTL).await;
        Ok(self.session().status().await)
    }

    pub async fn health(&self) -> HealthResponse {
        let session = self.session().status().await;

        let (cache, degraded) = match self.cache.backend() {
            CacheBackend::Memory => ("unavailable", false),
            CacheBackend::Redis if self.cache.ping().await => ("ok", false),
            CacheBackend::Redis => ("error", true),
        };

        HealthResponse {
            status: if degraded { "degraded" } else { "healthy" },
            timestamp: Utc::now(),
            checks: HealthChecks {
                api: "ok",
                cache,
                mt5_auth: if session.is_valid() { "ok" } else { "expired" },
                session,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::api::transport::stub::{FakeServer, StubTransport};
    use crate::auth::{codec, Credentials, SessionOptions, SessionState};

    fn client(server: &Arc<FakeServer>) -> GatewayClient {
        let credentials = Credentials::new("https://mt5.test", "1001", "Password1", 1290, "WebManager", "manager");
        let session = SessionManager::new(
            StubTransport::new(Arc::clone(server)),
            credentials,
            SessionOptions::default(),
        );
        GatewayClient::new(session, Arc::new(CacheManager::in_memory()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_lookup_end_to_end() {
        let fingerprint = codec::derive_secret_fingerprint("Password1");
        assert_eq!(
            codec::compute_challenge_response(&fingerprint, "aa11").unwrap(),
            "7b5990afa5e6991a742e70c248f1a0e0"
        );

        let server = FakeServer::new("Password1");
        server.set_op_body(r#"{"login":"46108","balance":1000}"#);
        let client = client(&server);

        let first = client.fetch_user("46108").await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.data, serde_json::json!({ "login": "46108", "balance": 1000 }));
        assert_eq!(server.handshakes(), 1);

        let second = client.fetch_user("46108").await.unwrap();
        assert!(second.cached);
        assert_eq!(second.data, first.data);
        assert_eq!(server.hits("/api/user/get"), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        let third = client.fetch_user("46108").await.unwrap();
        assert!(!third.cached);
        assert_eq!(server.hits("/api/user/get"), 2);
        client.session().shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_is_not_cached() {
        let server = FakeServer::new("Password1");
        server.script_ops(&[404]);
        let client = client(&server);

        let err = client.fetch_user("99").await.unwrap_err();
        assert!(matches!(err, GatewayError::RemoteCall { status: 404, .. }));
        assert!(client.cache().get("user:99").await.is_none());
        client.session().shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_authenticate_records_status() {
        let server = FakeServer::new("Password1");
        let client = client(&server);

        let status = client.authenticate().await.unwrap();

        assert_eq!(status.state, SessionState::Authenticated);
        assert_eq!(client.cache().get(AUTH_STATUS_KEY).await.as_deref(), Some("authenticated"));
        client.session().shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_reports_session_and_cache() {
        let server = FakeServer::new("Password1");
        let client = client(&server);

        let health = client.health().await;
        assert_eq!(health.status, "healthy");
        assert_eq!(health.checks.cache, "unavailable");
        assert_eq!(health.checks.mt5_auth, "expired");

        client.authenticate().await.unwrap();
        let health = client.health().await;
        assert_eq!(health.checks.mt5_auth, "ok");
        assert_eq!(health.checks.session.state, SessionState::Authenticated);
        client.session().shutdown().await;
    }
}
