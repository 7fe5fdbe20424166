//! Authentication against the MT5 Web API.
//!
//! This module provides:
//! - `codec`: the MD5 challenge-response transform (stateless)
//! - `Credentials` / `CredentialStore`: manager login and OS keychain fallback
//! - `Session`: one authenticated connection and its validity window
//! - `SessionManager`: single-flight handshakes and the keep-alive task
//!
//! Sessions live only in process memory and expire 5 minutes after the
//! last successful handshake.

pub mod codec;
pub mod credentials;
pub mod manager;
pub mod session;

pub use crate::api::error::HandshakeError;
pub use credentials::{CredentialStore, Credentials};
pub use manager::{ServerProofPolicy, SessionManager, SessionOptions};
pub use session::{Session, SessionState, SessionStatus};
