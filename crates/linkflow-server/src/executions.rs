//! Execution lifecycle endpoints: explicit cancel and retry.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::json;
use tracing::instrument;

use linkflow_dispatch::DispatchRequest;
use linkflow_store::{Store, StoreError};

use crate::AppState;
use crate::error::ApiError;

/// Cancel an active execution. Terminal executions are rejected.
#[instrument(name = "execution_cancel", skip_all, fields(execution_id = %execution_id))]
pub async fn cancel<S>(
  State(state): State<AppState<S>>,
  Path(execution_id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: Store + Clone + Send + Sync + 'static,
{
  let execution = state
    .store
    .get_execution(execution_id)
    .await?
    .ok_or_else(|| ApiError::NotFound("Execution not found".to_string()))?;

  if !state.gate.allows(execution.workspace_id, "workflow.execute") {
    return Err(ApiError::Forbidden("Forbidden".to_string()));
  }

  let cancelled = state
    .store
    .cancel_execution(execution_id)
    .await
    .map_err(|e| match e {
      StoreError::Transition(_) => {
        ApiError::Unprocessable("This execution cannot be cancelled.".to_string())
      }
      other => other.into(),
    })?;

  Ok(Json(json!({
    "message": "Execution cancelled.",
    "execution": cancelled,
  })))
}

/// Retry a failed execution: creates a new pending row (never mutating the
/// parent) and enqueues its dispatch.
#[instrument(name = "execution_retry", skip_all, fields(execution_id = %execution_id))]
pub async fn retry<S>(
  State(state): State<AppState<S>>,
  Path(execution_id): Path<i64>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError>
where
  S: Store + Clone + Send + Sync + 'static,
{
  let parent = state
    .store
    .get_execution(execution_id)
    .await?
    .ok_or_else(|| ApiError::NotFound("Execution not found".to_string()))?;

  if !state.gate.allows(parent.workspace_id, "workflow.execute") {
    return Err(ApiError::Forbidden("Forbidden".to_string()));
  }

  let child = state
    .store
    .retry_execution(execution_id, None, None, None)
    .await
    .map_err(|e| match e {
      StoreError::Transition(_) => {
        ApiError::Unprocessable("This execution cannot be retried.".to_string())
      }
      other => other.into(),
    })?;

  let _ = state
    .dispatch
    .send(DispatchRequest::new(child.workflow_id, child.id));

  Ok((
    StatusCode::CREATED,
    Json(json!({
      "message": "Execution retry started.",
      "execution": child,
    })),
  ))
}
