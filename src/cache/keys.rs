//! Content-addressed cache keys.
//!
//! A key is the SHA-256 digest of a canonical JSON serialization of the request fields that
//! determine the rendered bytes, truncated to 128 bits. `title` and `css_only` are not part of
//! it. CSS is normalized before hashing so formatting-only differences share an entry.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::application::render::normalize_css;
use crate::domain::RenderRequest;

/// Hex characters kept from the digest (128 bits).
const KEY_HEX_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a request.
pub fn compute_key(request: &RenderRequest) -> CacheKey {
    // Keys always serialize in the same order, so equal material gives equal text.
    let material = serde_json::json!({
        "html": request.html_body,
        "css": normalize_css(&request.css_text),
        "format": request.layout.format.as_str(),
        "orientation": request.layout.orientation.as_str(),
        "compress": request.layout.compress,
        "quality": request.layout.quality.as_str(),
    });

    let mut digest = hex::encode(Sha256::digest(material.to_string().as_bytes()));
    digest.truncate(KEY_HEX_LEN);
    CacheKey(digest)
}
