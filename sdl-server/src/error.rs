//! Error handling for the axum server.
//! Maps `SdlError` onto HTTP status codes and JSON error bodies.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sdl_core::SdlError;
use serde_json::json;

/// Wrapper to convert `SdlError` into an axum response.
pub struct AppError(pub SdlError);

impl From<SdlError> for AppError {
    fn from(e: SdlError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
