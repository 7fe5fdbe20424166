//! Outbound access to the MT5 Web API.
//!
//! This module provides:
//! - `Transport` / `Connection`: the HTTP seam (reqwest in production)
//! - `RequestExecutor`: runs a named operation, re-authenticating once
//!   when the server rejects the session
//! - `GatewayClient`: cached lookups and forced re-authentication on top
//!   of the executor

pub mod client;
pub mod error;
pub mod executor;
pub mod transport;

pub use client::{GatewayClient, Lookup};
pub use error::GatewayError;
pub use executor::RequestExecutor;
pub use transport::{Connection, HttpTransport, RawResponse, Transport};
