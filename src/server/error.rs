//! Maps failures onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::chat::error::ChatError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Chat(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
            AppError::Chat(ChatError::PoolClosed) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Chat(ChatError::Worker(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Chat(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Chat(e) if e.is_timeout() => "UPSTREAM_TIMEOUT",
            AppError::Chat(ChatError::PoolClosed) => "SHUTTING_DOWN",
            AppError::Chat(ChatError::Worker(_)) => "WORKER_FAILED",
            AppError::Chat(_) => "UPSTREAM_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        error!(%status, "Request failed: {self}");
        let body = ErrorBody {
            error: self.error_code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
