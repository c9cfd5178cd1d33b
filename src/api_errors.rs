use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

#[derive(Serialize)]
struct ErrBody {
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, msg) = match &self {
            AppError::BadRequest(s) => (StatusCode::BAD_REQUEST, s),
            AppError::Unauthorized(s) => (StatusCode::UNAUTHORIZED, s),
            AppError::Forbidden(s) => (StatusCode::FORBIDDEN, s),
            AppError::NotFound(s) => (StatusCode::NOT_FOUND, s),
            AppError::Internal(s) => (StatusCode::INTERNAL_SERVER_ERROR, s),
        };
        (code, Json(ErrBody { error: msg.clone() })).into_response()
    }
}

// Conversion from domain errors to HTTP errors
impl From<crate::errors::HubError> for AppError {
    fn from(err: crate::errors::HubError) -> Self {
        use crate::errors::HubError;
        match err {
            HubError::Config { message } => AppError::Internal(message),
            HubError::Auth { message } => AppError::Unauthorized(message),
            HubError::Forbidden { message } => AppError::Forbidden(message),
            HubError::NotFound { resource, id } => {
                AppError::NotFound(format!("{resource} not found: {id}"))
            }
            HubError::Validation { field, message } => {
                AppError::BadRequest(format!("{field}: {message}"))
            }
            HubError::Serialization { context, source } => {
                AppError::Internal(format!("Serialization {context} failed: {source}"))
            }
            HubError::Io { operation, source } => {
                AppError::Internal(format!("I/O {operation} failed: {source}"))
            }
            HubError::Store { operation, source } => {
                AppError::Internal(format!("Store {operation} failed: {source}"))
            }
            HubError::ExternalTool { program, detail } => {
                AppError::Internal(format!("{program} failed: {detail}"))
            }
            HubError::Timeout { program, seconds } => {
                AppError::Internal(format!("{program} timed out after {seconds}s"))
            }
            HubError::MutexPoisoned { resource } => {
                AppError::Internal(format!("Mutex for {resource} poisoned"))
            }
            HubError::Internal { message } => AppError::Internal(message),
        }
    }
}
