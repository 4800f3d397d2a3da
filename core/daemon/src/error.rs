//! Error types for formcoach-daemon.
//!
//! Component errors stay specific to where they happen; `ApiError` is the
//! single shape that crosses the HTTP boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use formcoach_protocol::{ErrorBody, ErrorCode};
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

// ─────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to create data dir {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Sqlite {
        context: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Stored timestamp is not RFC3339: {0}")]
    Timestamp(String),

    #[error("Store task failed: {0}")]
    Task(String),

    #[error("Failed to encode stored document: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn sqlite(context: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| StoreError::Sqlite { context, source }
    }
}

// ─────────────────────────────────────────────────────────────────────
// Upstream vision service
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("Vision service is not configured")]
    Unavailable,

    #[error("Vision service cooling down until {until}")]
    Cooldown { until: DateTime<Utc> },

    #[error("Vision service unreachable: {0}")]
    Unreachable(String),

    #[error("Vision service timed out: {0}")]
    Timeout(String),

    #[error("Vision service request failed: {0}")]
    Failed(String),
}

impl UpstreamError {
    pub fn code(&self) -> ErrorCode {
        match self {
            UpstreamError::Unavailable => ErrorCode::PythonUnavailable,
            UpstreamError::Cooldown { .. } => ErrorCode::PythonCooldown,
            UpstreamError::Unreachable(_) => ErrorCode::PythonUnreachable,
            UpstreamError::Timeout(_) => ErrorCode::PythonTimeout,
            UpstreamError::Failed(_) => ErrorCode::PythonError,
        }
    }

    /// True for errors produced by an attempted call (as opposed to a
    /// call that was never made).
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            UpstreamError::Unreachable(_) | UpstreamError::Timeout(_) | UpstreamError::Failed(_)
        )
    }
}

// ─────────────────────────────────────────────────────────────────────
// Authentication
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,
}

// ─────────────────────────────────────────────────────────────────────
// HTTP boundary
// ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<ErrorBody> for ApiError {
    fn from(body: ErrorBody) -> Self {
        Self::new(body.error, body.message)
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let code = match err {
            AuthError::MissingToken => ErrorCode::MissingToken,
            AuthError::InvalidToken => ErrorCode::InvalidToken,
        };
        Self::new(code, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    // Storage details stay in the logs; clients get a generic message.
    fn from(_: StoreError) -> Self {
        Self::new(ErrorCode::StorageError, "Unable to persist session")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorBody::new(self.code, self.message))).into_response()
    }
}
