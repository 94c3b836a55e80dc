use std::sync::Arc;

use crate::application::render::RenderService;
use crate::config::Settings;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct HttpState {
    pub render: RenderService,
    /// Title used when a request omits one.
    pub default_title: Arc<str>,
    pub ping_message: Arc<str>,
}

impl HttpState {
    pub fn new(render: RenderService, settings: &Settings) -> Self {
        Self {
            render,
            default_title: Arc::from(settings.render.default_title.as_str()),
            ping_message: Arc::from(settings.server.ping_message.as_str()),
        }
    }
}
