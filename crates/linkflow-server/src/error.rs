//! HTTP error mapping.
//!
//! Component crates return typed errors; this is the single place they are
//! turned into status codes and JSON bodies, at the boundary only.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use linkflow_store::StoreError;

/// Errors surfaced to HTTP callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
  /// Resource absent. Deliberately also covers webhook path mismatches so
  /// callers cannot probe which UUIDs exist.
  #[error("{0}")]
  NotFound(String),

  /// HTTP method not in the webhook's allow-list.
  #[error("{0}")]
  MethodNotAllowed(String),

  /// Failed webhook or callback-token authentication. The message never says
  /// which part of the check failed beyond the resource kind.
  #[error("{0}")]
  Unauthorized(String),

  /// Cross-reference mismatch (e.g. execution does not match job).
  #[error("{0}")]
  Forbidden(String),

  /// Payload failed validation before any state change.
  #[error("{0}")]
  Validation(String),

  /// Lifecycle rule rejected the operation (cancel/retry of a wrong-state
  /// execution).
  #[error("{0}")]
  Unprocessable(String),

  /// Fixed-window rate limit exceeded.
  #[error("Rate limit exceeded")]
  RateLimited { retry_after: u64 },

  /// Anything unexpected. Details go to the log, not the response.
  #[error("Internal server error")]
  Internal(String),
}

impl From<StoreError> for ApiError {
  fn from(err: StoreError) -> Self {
    match err {
      StoreError::JobNotFound { .. } => ApiError::NotFound("Job not found".to_string()),
      StoreError::ExecutionNotFound { .. } => {
        ApiError::NotFound("Execution not found".to_string())
      }
      StoreError::Transition(e) => ApiError::Unprocessable(e.to_string()),
      other => ApiError::Internal(other.to_string()),
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::NotFound(message) => {
        (StatusCode::NOT_FOUND, Json(json!({"error": message}))).into_response()
      }
      ApiError::MethodNotAllowed(message) => {
        (StatusCode::METHOD_NOT_ALLOWED, Json(json!({"error": message}))).into_response()
      }
      ApiError::Unauthorized(message) => {
        (StatusCode::UNAUTHORIZED, Json(json!({"error": message}))).into_response()
      }
      ApiError::Forbidden(message) => {
        (StatusCode::FORBIDDEN, Json(json!({"error": message}))).into_response()
      }
      ApiError::Validation(message) => {
        (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"error": message}))).into_response()
      }
      ApiError::Unprocessable(message) => {
        (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"message": message}))).into_response()
      }
      ApiError::RateLimited { retry_after } => (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after.to_string())],
        Json(json!({"error": "Rate limit exceeded", "retry_after": retry_after})),
      )
        .into_response(),
      ApiError::Internal(detail) => {
        tracing::error!(error = %detail, "internal error");
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          Json(json!({"error": "Internal server error"})),
        )
          .into_response()
      }
    }
  }
}
