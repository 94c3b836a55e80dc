//! HTTP surface: routes, payload mapping and response logging.

mod middleware;
mod pdf;
mod state;

pub use middleware::{REQUEST_ID_HEADER, RequestContext};
pub use pdf::{GeneratePdfPayload, render_error_to_http};
pub use state::HttpState;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
};

/// Build the service router. `body_limit` caps accepted request bodies in bytes.
pub fn build_router(state: HttpState, body_limit: usize) -> Router {
    Router::new()
        .route("/api/generate-pdf", post(pdf::generate_pdf))
        .route("/api/pdf-health", get(pdf::pdf_health))
        .route("/api/ping", get(pdf::ping))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::set_request_context))
        .with_state(state)
}
