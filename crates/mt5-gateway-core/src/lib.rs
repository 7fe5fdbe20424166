//! Core library for the MT5 Web API gateway.
//!
//! This crate contains everything that talks to the trading platform:
//!
//! - `auth`: the challenge-response handshake, credentials, and the
//!   `SessionManager` that keeps one authenticated session alive
//! - `api`: the transport seam, the retrying `RequestExecutor`, and the
//!   `GatewayClient` facade consumed by the HTTP layer
//! - `cache`: the key/value cache facade (Redis or in-memory)
//! - `config`: process configuration loaded once at startup
//! - `models`: request/response bodies shared with the HTTP layer

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod models;

pub use api::{GatewayClient, GatewayError, RequestExecutor};
pub use auth::{Credentials, HandshakeError, SessionManager, SessionOptions};
pub use cache::CacheManager;
pub use config::Config;
