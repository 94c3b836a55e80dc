//! Rendering engine lifecycle and session leasing.
//!
//! The engine itself is an external collaborator reached through the [`EngineLauncher`],
//! [`EngineInstance`] and [`EngineSession`] traits. [`EngineHandle`] owns the single running
//! instance; [`RenderSessionPool`] leases sessions from it under a fixed concurrency ceiling.

mod handle;
mod pool;

#[cfg(test)]
pub(crate) mod testing;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::PrintLayout;

pub use handle::{EngineHandle, EngineStatus, ReadyEngine};
pub use pool::{
    PoolConfig, PoolError, PoolStats, RenderSession, RenderSessionPool, SessionDisposition,
};

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("engine failed to launch: {message}")]
    Launch { message: String },
    #[error("engine did not start within {0:?}")]
    LaunchTimeout(Duration),
    #[error("engine session failed: {message}")]
    Session { message: String },
    #[error("render failed: {message}")]
    Render { message: String },
    #[error("engine unreachable: {message}")]
    Unreachable { message: String },
}

impl EngineError {
    pub fn launch(err: impl std::fmt::Display) -> Self {
        Self::Launch {
            message: err.to_string(),
        }
    }

    pub fn session(err: impl std::fmt::Display) -> Self {
        Self::Session {
            message: err.to_string(),
        }
    }

    pub fn render(err: impl std::fmt::Display) -> Self {
        Self::Render {
            message: err.to_string(),
        }
    }

    pub fn unreachable(err: impl std::fmt::Display) -> Self {
        Self::Unreachable {
            message: err.to_string(),
        }
    }
}

/// Sub-resource classes a session can refuse to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Image,
    Media,
    Font,
    Other,
    WebSocket,
}

/// Everything a session blocks: render output must not depend on external fetches.
pub const BLOCKED_RESOURCES: &[ResourceClass] = &[
    ResourceClass::Image,
    ResourceClass::Media,
    ResourceClass::Font,
    ResourceClass::Other,
    ResourceClass::WebSocket,
];

/// How every new session is configured before it is leased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProfile {
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub blocked: Vec<ResourceClass>,
}

impl Default for SessionProfile {
    fn default() -> Self {
        Self {
            viewport_width: 1000,
            viewport_height: 700,
            blocked: BLOCKED_RESOURCES.to_vec(),
        }
    }
}

/// One document to print.
#[derive(Debug, Clone, Copy)]
pub struct PrintJob<'a> {
    pub document: &'a str,
    pub layout: PrintLayout,
    /// Pause between loading the content and printing it.
    pub settle_delay: Duration,
}

/// Starts engine instances. Called by [`EngineHandle`] only, one launch at a time.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn EngineInstance>, EngineError>;
}

/// A running engine.
#[async_trait]
pub trait EngineInstance: Send + Sync {
    async fn open_session(
        &self,
        profile: &SessionProfile,
    ) -> Result<Box<dyn EngineSession>, EngineError>;

    /// Liveness answer, typically the engine's version string.
    async fn probe(&self) -> Result<String, EngineError>;

    /// Release the engine. Must tolerate being called more than once.
    async fn shutdown(&self);
}

/// A single rendering context inside an engine instance.
#[async_trait]
pub trait EngineSession: Send {
    async fn render_pdf(&mut self, job: &PrintJob<'_>) -> Result<Vec<u8>, EngineError>;

    /// Return the session to a blank state. Failure means it must not be reused.
    async fn reset(&mut self) -> Result<(), EngineError>;

    async fn close(self: Box<Self>);
}
