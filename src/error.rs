//! Error taxonomy shared by the catalog, identity and HTTP layers.

use axum::{
    extract::multipart::MultipartRejection,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::store::StoreError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    InvalidImage(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    AuthenticationFailed(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("you do not own this {0}")]
    Forbidden(&'static str),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed(message.into())
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            AppError::InvalidImage(_) => (StatusCode::BAD_REQUEST, "invalid_image"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::AuthenticationFailed(_) => {
                (StatusCode::UNAUTHORIZED, "authentication_failed")
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(what) => AppError::Conflict(what),
            StoreError::MissingReference { kind, id } => {
                AppError::InvalidInput(format!("{kind} {id} does not exist"))
            }
            StoreError::NotFound(kind) => AppError::NotFound(kind),
            StoreError::Backend(e) => AppError::Internal(e),
        }
    }
}

macro_rules! rejection_is_invalid_input {
    ($($rejection:ty),+) => {$(
        impl From<$rejection> for AppError {
            fn from(rejection: $rejection) -> Self {
                AppError::InvalidInput(rejection.body_text())
            }
        }
    )+};
}

rejection_is_invalid_input!(JsonRejection, PathRejection, QueryRejection, MultipartRejection);

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            AppError::Internal(e) => {
                error!(error = ?e, "internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (
            status,
            Json(ErrorResponse {
                error: ErrorBody { code, message },
            }),
        )
            .into_response()
    }
}
