use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::catalog::CatalogError;
use crate::engine::EngineError;
use crate::model::ParseError;
use crate::store::StoreError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InvalidTransition(String),
    Unavailable(String),
    Internal(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(m) => write!(f, "invalid request: {m}"),
            ApiError::NotFound(m) => write!(f, "not found: {m}"),
            ApiError::Conflict(m) | ApiError::InvalidTransition(m) => write!(f, "conflict: {m}"),
            ApiError::Unavailable(m) => write!(f, "unavailable: {m}"),
            ApiError::Internal(m) => write!(f, "internal error: {m}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "VALIDATION", m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "NOT_FOUND", m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, "CONFLICT", m),
            ApiError::InvalidTransition(m) => (StatusCode::CONFLICT, "INVALID_TRANSITION", m),
            ApiError::Unavailable(m) => {
                tracing::warn!("store unavailable: {m}");
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", m)
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "an internal error occurred".to_string(),
                )
            }
        };
        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            e if e.is_validation() => ApiError::BadRequest(message),
            e if e.is_conflict() => ApiError::Conflict(message),
            EngineError::NotFound(_) => ApiError::NotFound(message),
            EngineError::InvalidTransition { .. } => ApiError::InvalidTransition(message),
            EngineError::Store(e) => e.into(),
            _ => ApiError::Internal(message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) | StoreError::Timeout => ApiError::Unavailable(err.to_string()),
            StoreError::Duplicate => ApiError::Conflict(err.to_string()),
            StoreError::NotFound(_) => ApiError::NotFound(err.to_string()),
            StoreError::Corrupt(_) | StoreError::Wal(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        let message = err.to_string();
        match err {
            CatalogError::UnknownService(_) | CatalogError::UnknownProfessional(_) => {
                ApiError::NotFound(message)
            }
            CatalogError::DuplicateService(_) => ApiError::Conflict(message),
            CatalogError::Invalid(_) | CatalogError::Parse(_) => ApiError::BadRequest(message),
            CatalogError::Io(_) => ApiError::Internal(message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<ParseError> for ApiError {
    fn from(err: ParseError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}
