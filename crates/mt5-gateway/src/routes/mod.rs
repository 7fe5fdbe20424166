//! HTTP handlers.
//!
//! - `health`: unauthenticated service banner and health report
//! - `api`: API-key protected MT5 operations

pub mod api;
pub mod health;
