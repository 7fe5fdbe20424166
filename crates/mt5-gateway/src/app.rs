//! Router and shared handler state.

use std::sync::Arc;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use mt5_gateway_core::GatewayClient;

use crate::auth::{self, ApiKeyValidator, API_KEY_HEADER};
use crate::routes::{api, health};

pub struct AppState {
    pub client: GatewayClient,
    pub api_keys: ApiKeyValidator,
    /// Account looked up by `GET /api/test`
    pub test_login: String,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(client: GatewayClient, api_key: Option<&str>, test_login: String) -> Self {
        Self {
            client,
            api_keys: ApiKeyValidator::new(api_key),
            test_login,
        }
    }
}

pub fn router(state: SharedState, cors_origins: &[String]) -> Router {
    let protected = Router::new()
        .route("/api/auth", post(api::force_auth))
        .route("/api/user/:login", get(api::get_user))
        .route("/api/execute", post(api::execute))
        .route("/api/test", get(api::test_connection))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key));

    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health))
        .merge(protected)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `*` (or nothing) allows any origin without credentials; an explicit
/// list allows credentials for those origins only.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(API_KEY_HEADER)])
        .allow_credentials(true)
}
