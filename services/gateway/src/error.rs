use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shared::types::ParseError;
use shared::CoreError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("missing or malformed identity: {0}")]
    Unauthorized(String),
}

impl From<ParseError> for ApiError {
    fn from(err: ParseError) -> Self {
        ApiError::Core(err.into())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub fn status_for(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        CoreError::InvalidTransition(_) => StatusCode::CONFLICT,
        CoreError::InsufficientInventory { .. } => StatusCode::CONFLICT,
        CoreError::NoSuitableBank { .. } => StatusCode::NOT_FOUND,
        CoreError::AlreadyProcessed(_) => StatusCode::BAD_REQUEST,
        CoreError::NoDriverAvailable => StatusCode::CONFLICT,
        CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::Core(err) => (status_for(err), err.kind()),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
        };

        // Storage details stay in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
            "internal storage error".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(json!({
                "error": kind,
                "message": message,
            })),
        )
            .into_response()
    }
}
