//! HTTP surface of the messaging service.

pub mod routes;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::error::{PipelineError, ValidationError};

pub use routes::{AppState, api_routes};

/// A pipeline failure on its way to becoming an HTTP response.
///
/// Bodies are always `{"error": "<message>"}`. Storage and other internal
/// failures are logged and answered with a generic message.
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl<E: Into<PipelineError>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            PipelineError::Provider(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match &self.0 {
            PipelineError::Provider(e) => match e.status_code() {
                Some(code) => format!("Provider {} returned HTTP {code}", e.provider()),
                None => format!("Provider {} is unreachable", e.provider()),
            },
            e if e.is_client_error() || e.is_not_found() => e.to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), "Request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

/// Parse a request body as JSON, rejecting anything unparseable as a
/// malformed payload.
pub(crate) fn parse_json(body: &[u8]) -> Result<serde_json::Value, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::from(ValidationError::MalformedPayload(e.to_string())))
}
