//! `/api/generate-pdf`, `/api/pdf-health` and `/api/ping`.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::warn;

use crate::application::error::HttpError;
use crate::application::render::{RenderError, RenderResponse, RenderedPdf};
use crate::domain::{LayoutOptions, Orientation, PageFormat, Quality, RenderRequest};

use super::HttpState;

const SOURCE: &str = "infra::http::pdf";

const HEALTHY_MESSAGE: &str = "PDF service is healthy and optimized";
const UNAVAILABLE_MESSAGE: &str = "PDF service unavailable";

/// Request body for `POST /api/generate-pdf`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratePdfPayload {
    pub html: Option<String>,
    pub css: Option<String>,
    pub title: Option<String>,
    pub format: Option<String>,
    pub orientation: Option<String>,
    pub compress: Option<bool>,
    pub quality: Option<String>,
    pub css_only: Option<bool>,
}

impl GeneratePdfPayload {
    /// Resolve defaults and fall back on unknown enumerations.
    pub fn into_request(self, default_title: &str) -> RenderRequest {
        let format = self.format.as_deref().map_or(PageFormat::default(), |raw| {
            parse_or_fallback("format", raw, PageFormat::parse, PageFormat::default())
        });
        let orientation = self.orientation.as_deref().map_or(Orientation::default(), |raw| {
            parse_or_fallback("orientation", raw, Orientation::parse, Orientation::default())
        });
        let quality = self.quality.as_deref().map_or(Quality::default(), |raw| {
            parse_or_fallback("quality", raw, Quality::parse, Quality::FALLBACK)
        });
        let layout = LayoutOptions::new(
            format,
            orientation,
            self.compress.unwrap_or(true),
            quality,
        );

        RenderRequest::new(self.html.unwrap_or_default(), self.css.unwrap_or_default())
            .with_title(self.title.unwrap_or_else(|| default_title.to_string()))
            .with_layout(layout)
            .with_css_only(self.css_only.unwrap_or(false))
    }
}

fn parse_or_fallback<T>(
    field: &'static str,
    raw: &str,
    parse: fn(&str) -> Option<T>,
    fallback: T,
) -> T {
    parse(raw).unwrap_or_else(|| {
        warn!(
            target = SOURCE,
            op = "parse_payload",
            field,
            value = raw,
            "Unrecognized value, using fallback"
        );
        fallback
    })
}

pub async fn generate_pdf(
    State(state): State<HttpState>,
    payload: Result<Json<GeneratePdfPayload>, JsonRejection>,
) -> Result<Response, HttpError> {
    let Json(payload) = payload.map_err(rejection_to_http)?;
    let request = payload.into_request(&state.default_title);

    match state.render.render(request).await {
        Ok(RenderResponse::Pdf(pdf)) => Ok(pdf_response(pdf)),
        Ok(RenderResponse::Css(css)) => Ok(css_response(css)),
        Err(err) => Err(render_error_to_http(err)),
    }
}

fn pdf_response(pdf: RenderedPdf) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", pdf.filename);
    let mut response = (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(pdf.content_type)),
            (header::CONTENT_LENGTH, HeaderValue::from(pdf.payload.len())),
        ],
        pdf.payload,
    )
        .into_response();
    // The filename is restricted to visible ASCII, so this only fails on a broken invariant.
    match HeaderValue::from_str(&disposition) {
        Ok(value) => {
            response
                .headers_mut()
                .insert(header::CONTENT_DISPOSITION, value);
        }
        Err(err) => warn!(
            target = SOURCE,
            op = "generate_pdf",
            filename = %pdf.filename,
            error = %err,
            "Dropping unrepresentable Content-Disposition"
        ),
    }
    response
}

fn css_response(css: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/css")),
            (header::CONTENT_LENGTH, HeaderValue::from(css.len())),
        ],
        css,
    )
        .into_response()
}

fn rejection_to_http(rejection: JsonRejection) -> HttpError {
    let status = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        StatusCode::PAYLOAD_TOO_LARGE
    } else {
        StatusCode::BAD_REQUEST
    };
    HttpError::from_error(SOURCE, status, rejection.body_text(), &rejection)
}

pub fn render_error_to_http(err: RenderError) -> HttpError {
    let status = match &err {
        RenderError::Validation(_) => StatusCode::BAD_REQUEST,
        RenderError::PoolExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RenderError::EngineInit(_)
        | RenderError::Timeout { .. }
        | RenderError::EngineCrash(_)
        | RenderError::Engine(_)
        | RenderError::ShuttingDown
        | RenderError::Aborted(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    HttpError::from_error(SOURCE, status, err.to_string(), &err)
}

#[derive(Debug, Serialize)]
struct HealthBody {
    success: bool,
    message: &'static str,
    timestamp: String,
}

pub async fn pdf_health(State(state): State<HttpState>) -> Result<Response, HttpError> {
    match state.render.health().await {
        Ok(_) => {
            let timestamp = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .map_err(|err| {
                    HttpError::from_error(
                        SOURCE,
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error",
                        &err,
                    )
                })?;
            Ok(Json(HealthBody {
                success: true,
                message: HEALTHY_MESSAGE,
                timestamp,
            })
            .into_response())
        }
        Err(err) => Err(HttpError::from_error(
            SOURCE,
            StatusCode::SERVICE_UNAVAILABLE,
            UNAVAILABLE_MESSAGE,
            &err,
        )
        .with_details(err.to_string())),
    }
}

#[derive(Debug, Serialize)]
pub struct PingBody {
    pub message: String,
}

pub async fn ping(State(state): State<HttpState>) -> Json<PingBody> {
    Json(PingBody {
        message: state.ping_message.to_string(),
    })
}
