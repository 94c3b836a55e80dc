use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

use crate::domain::error::DomainError;
use crate::engine::{EngineError, PoolError};

/// Used when a title sanitizes down to nothing.
const FALLBACK_FILENAME_STEM: &str = "document";

/// Knobs for the render pipeline itself; pool and cache carry their own.
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Deadline for loading content, settling and printing.
    pub timeout: Duration,
    pub settle_delay: Duration,
    /// Concurrent misses on one key share a single render.
    pub dedupe_inflight: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
            dedupe_inflight: true,
        }
    }
}

impl From<&crate::config::RenderSettings> for RenderConfig {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            timeout: settings.timeout,
            settle_delay: settings.settle_delay,
            dedupe_inflight: settings.dedupe_inflight,
        }
    }
}

/// A finished PDF ready to send.
#[derive(Debug, Clone)]
pub struct RenderedPdf {
    pub payload: Bytes,
    pub content_type: &'static str,
    pub filename: String,
    pub from_cache: bool,
}

#[derive(Debug, Clone)]
pub enum RenderResponse {
    Pdf(RenderedPdf),
    /// Normalized stylesheet returned in CSS-only mode.
    Css(String),
}

#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("engine initialization failed: {0}")]
    EngineInit(EngineError),
    #[error("no render session became available within {waited:?}")]
    PoolExhausted { waited: Duration },
    #[error("render exceeded the {limit:?} deadline")]
    Timeout { limit: Duration },
    #[error("engine crashed: {0}")]
    EngineCrash(EngineError),
    #[error(transparent)]
    Engine(EngineError),
    #[error("render service is shutting down")]
    ShuttingDown,
    #[error("render task aborted: {0}")]
    Aborted(String),
}

impl From<PoolError> for RenderError {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::Exhausted { waited } => RenderError::PoolExhausted { waited },
            PoolError::EngineInit(err) => RenderError::EngineInit(err),
            PoolError::EngineCrash(err) => RenderError::EngineCrash(err),
            PoolError::Closed => RenderError::ShuttingDown,
        }
    }
}

/// `<title with whitespace runs as _>_<unix millis>.pdf`, restricted to characters that are
/// safe inside a quoted `Content-Disposition` filename.
pub fn attachment_filename(title: &str, now: OffsetDateTime) -> String {
    let mut stem = String::with_capacity(title.len());
    let mut in_space = false;
    for ch in title.chars() {
        if ch.is_whitespace() {
            if !in_space {
                stem.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if ch.is_ascii_graphic() && ch != '"' && ch != '\\' && ch != '/' {
            stem.push(ch);
        } else {
            stem.push('_');
        }
    }
    if stem.is_empty() {
        stem.push_str(FALLBACK_FILENAME_STEM);
    }
    let millis = now.unix_timestamp_nanos() / 1_000_000;
    format!("{stem}_{millis}.pdf")
}
