//! Response caching for MT5 lookups.
//!
//! This module provides the `CacheManager` facade over either Redis or a
//! process-local expiring map. The choice is made once at startup.
//!
//! Values are JSON strings; `CachedData` wraps a payload with the time it
//! was fetched so responses can report their age.

pub mod manager;

pub use manager::{CacheBackend, CacheManager, CachedData};
