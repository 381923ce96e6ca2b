use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use novagen_core::CoreError;
use serde_json::json;

/// Application-level error type for relay HTTP handlers.
///
/// Implements [`IntoResponse`] to produce `{error, code}` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `novagen_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, message) = match &self {
            AppError::Core(CoreError::Validation(msg)) => ("VALIDATION_ERROR", msg.clone()),
            AppError::BadRequest(msg) => ("BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
    }
}
