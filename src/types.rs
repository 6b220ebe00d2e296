//! Error taxonomy shared across the hub
//!
//! Every user-visible failure maps to exactly one variant and exactly one
//! HTTP status code. Internal store errors are carried as `Database` and
//! surface as 500 without leaking driver details.

use hyper::StatusCode;
use thiserror::Error;

/// Errors produced by query compilation, streaming, and sync
#[derive(Debug, Error)]
pub enum ApiError {
    /// A filter or selection path names a field the catalog does not know
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// page < 0 or pageSize < 1
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),

    /// Entity lookup matched nothing
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed request input (bad DCC name, bad Range header, bad body)
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Sync credential did not match the configured value
    #[error("invalid API key")]
    Unauthorized,

    /// File carries a restricted-access marker and no grant was presented
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No access method this gateway can bridge
    #[error("unsupported access method: {0}")]
    Unsupported(String),

    /// Upstream host connection failure or non-2xx response
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// Upstream did not respond within the bounded deadline
    #[error("upstream timeout: {0}")]
    Timeout(String),

    /// A sync batch is already holding the lock
    #[error("a sync task is already running")]
    Conflict,

    /// Server-side configuration is missing or inconsistent
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// MongoDB failure, surfaced as an opaque 500
    #[error("database error: {0}")]
    Database(String),
}

impl ApiError {
    /// HTTP status code for this error kind
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownField(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidPagination(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable kind tag used in error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::UnknownField(_) => "UnknownField",
            ApiError::InvalidPagination(_) => "InvalidPagination",
            ApiError::NotFound(_) => "NotFound",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Unauthorized => "Unauthorized",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::Unsupported(_) => "Unsupported",
            ApiError::UpstreamError(_) => "UpstreamError",
            ApiError::Timeout(_) => "Timeout",
            ApiError::Conflict => "Conflict",
            ApiError::ConfigurationError(_) => "ConfigurationError",
            ApiError::Database(_) => "InternalError",
        }
    }
}

impl From<mongodb::error::Error> for ApiError {
    fn from(e: mongodb::error::Error) -> Self {
        ApiError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
