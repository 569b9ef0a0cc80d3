use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Failures raised while resolving DRS objects and issuing access URLs.
#[derive(Debug, Error)]
pub enum DrsError {
    #[error("invalid DRS identifier: {0}")]
    InvalidIdentifier(String),
    #[error("no DRS object found for `{0}`")]
    ObjectNotFound(String),
    #[error("snapshot `{0}` not found")]
    SnapshotNotFound(Uuid),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Too many requests are being made at once. Please try again later.")]
    TooManyRequests,
    #[error("inconsistent DRS object: field `{field}` has conflicting values {values:?}")]
    InconsistentObject { field: String, values: Vec<String> },
    #[error("failed to sign URL: {0}")]
    SigningFailure(String),
    #[error("{0}")]
    NotImplemented(String),
    #[error("DRS request did not complete within {0:?}")]
    DeadlineExceeded(std::time::Duration),
    #[error("upstream service error: {0}")]
    Upstream(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl DrsError {
    pub fn inconsistent(field: impl Into<String>, values: impl IntoIterator<Item = String>) -> Self {
        Self::InconsistentObject {
            field: field.into(),
            values: values.into_iter().collect(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DrsError::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            DrsError::ObjectNotFound(_) | DrsError::SnapshotNotFound(_) => StatusCode::NOT_FOUND,
            DrsError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DrsError::Forbidden(_) => StatusCode::FORBIDDEN,
            DrsError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            DrsError::SigningFailure(_) | DrsError::Upstream(_) => StatusCode::BAD_GATEWAY,
            DrsError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            DrsError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            DrsError::InconsistentObject { .. } | DrsError::Internal(_) | DrsError::Sqlx(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<reqwest::Error> for DrsError {
    fn from(err: reqwest::Error) -> Self {
        DrsError::Upstream(err.to_string())
    }
}

pub type DrsResult<T> = Result<T, DrsError>;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // GA4GH DRS error shape
        let body = Json(json!({
            "msg": self.message,
            "status_code": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<DrsError> for AppError {
    fn from(err: DrsError) -> Self {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!("DRS request failed: {}", err);
        } else {
            tracing::debug!("DRS request rejected ({}): {}", status, err);
        }
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inconsistent_object_message_names_field_and_values() {
        let err = DrsError::inconsistent("size", ["10".to_string(), "12".to_string()]);
        let msg = err.to_string();
        assert!(msg.contains("`size`"));
        assert!(msg.contains("\"10\""));
        assert!(msg.contains("\"12\""));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn app_error_keeps_drs_status() {
        let err: AppError = DrsError::TooManyRequests.into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        let err: AppError = DrsError::InvalidIdentifier("bad".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
