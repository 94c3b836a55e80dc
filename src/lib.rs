//! Server-side HTML/CSS snapshot to PDF rendering.
//!
//! A [`RenderService`](application::render::RenderService) wraps caller markup into one
//! self-contained document, prints it on a session leased from a
//! [`RenderSessionPool`](engine::RenderSessionPool) and keeps the bytes in a content-addressed
//! [`ResultCache`](cache::ResultCache).

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod infra;
pub mod util;
