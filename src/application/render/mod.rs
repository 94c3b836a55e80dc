//! PDF rendering pipeline.
//!
//! Caller markup is normalized and wrapped into one self-contained document, printed on a leased
//! engine session, and the resulting bytes are cached under a digest of the request.

mod css;
mod document;
mod inflight;
mod service;
mod types;

pub use css::normalize_css;
pub use document::{CompleteDocument, DocumentAssembler, DocumentOptions};
pub use inflight::{InFlight, InFlightRenders, SharedRender};
pub use service::RenderService;
pub use types::{RenderConfig, RenderError, RenderResponse, RenderedPdf, attachment_filename};
