//! Request and response bodies of the gateway's HTTP surface.
//!
//! - `ExecuteRequest`: arbitrary operation passthrough
//! - `UserResponse`, `ExecuteResponse`: lookup results
//! - `HealthResponse`: liveness report

pub mod request;
pub mod response;

pub use request::ExecuteRequest;
pub use response::{ErrorResponse, ExecuteResponse, HealthChecks, HealthResponse, UserResponse};
