//! Small shared helpers.

pub mod bytes;
pub(crate) mod lock;
