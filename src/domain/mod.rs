//! Request model and validation rules, independent of engine and transport.

pub mod error;
pub mod request;

pub use request::{
    DEFAULT_TITLE, HTML_REQUIRED_MESSAGE, LayoutOptions, Orientation, PageFormat, PrintLayout,
    Quality, QualityProfile, RenderRequest,
};
