//! Content-addressed result cache.
//!
//! Rendered PDFs are stored under a digest of the request fields that determine their bytes.
//! The cache is bounded three ways:
//!
//! - **entries**: at most `max_entries` live documents
//! - **bytes**: summed payload size at most `max_bytes`
//! - **age**: entries older than `ttl` are never served
//!
//! ```toml
//! [cache]
//! enabled = true
//! max_entries = 20
//! max_bytes = 52428800
//! ttl_ms = 3000
//! ```

mod config;
mod keys;
mod store;

pub use config::CacheConfig;
pub use keys::{CacheKey, compute_key};
pub use store::{CacheEntry, CacheStats, PDF_CONTENT_TYPE, ResultCache};
