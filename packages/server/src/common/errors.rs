//! Error taxonomy shared by the engine and the HTTP surface.
//!
//! `StoreError` classifies persistence failures; only `Busy` is retriable
//! inside the engine. `ApiError` is what routes return; each variant maps to
//! one HTTP status and a stable `code` string in the JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Persistence errors surfaced by store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("unique constraint conflict: {0}")]
    Conflict(String),

    #[error("database busy")]
    Busy,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether the engine may retry the operation.
    pub fn is_retriable(&self) -> bool {
        matches!(self, StoreError::Busy)
    }

    /// Classify a raw sqlx error into the store taxonomy.
    pub fn classify(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) => {
                // SQLite extended result codes embed the primary code in the
                // low byte: 19 = CONSTRAINT, 5 = BUSY, 6 = LOCKED.
                let primary = db
                    .code()
                    .and_then(|c| c.parse::<u32>().ok())
                    .map(|c| c & 0xff);
                match primary {
                    Some(19) => StoreError::Conflict(db.message().to_string()),
                    Some(5) | Some(6) => StoreError::Busy,
                    _ => StoreError::Database(err),
                }
            }
            _ => StoreError::Database(err),
        }
    }
}

/// Errors returned to HTTP clients.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Another order holds the scope. Carries the owner and the scope name
    /// so clients can surface "locked by order N".
    #[error("resource locked by order {active_order_id}")]
    ResourceLocked { active_order_id: i64, scope: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match StoreError::classify(err) {
            StoreError::NotFound => ApiError::NotFound("not found".to_string()),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound("not found".to_string()),
            other => ApiError::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "code": "BAD_REQUEST", "message": msg }),
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "code": "NOT_FOUND", "message": msg }),
            ),
            ApiError::ResourceLocked {
                active_order_id,
                scope,
            } => (
                StatusCode::CONFLICT,
                json!({
                    "code": "RESOURCE_LOCKED",
                    "message": format!("Resource locked by order {}", active_order_id),
                    "activeOrderId": active_order_id,
                    "scope": scope,
                }),
            ),
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "code": "INTERNAL", "message": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
