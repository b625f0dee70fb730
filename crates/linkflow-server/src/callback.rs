//! Job callback ingestor.
//!
//! Both endpoints are keyed by `job_id` + `callback_token`. The token check
//! here is a fast path for status mapping; the authoritative idempotency
//! guard runs inside the store transaction that applies the mutation, so a
//! terminal callback and a racing duplicate can never both win.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, instrument};

use linkflow_store::{FinalizeOutcome, ProgressOutcome, Store, TerminalReport};
use linkflow_types::JobStatus;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct TerminalCallbackRequest {
  pub job_id: String,
  pub callback_token: String,
  pub execution_id: i64,
  #[serde(flatten)]
  pub report: TerminalReport,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
  pub job_id: String,
  pub callback_token: String,
  pub progress: i64,
  #[serde(default)]
  pub current_node: Option<String>,
}

/// Terminal callback: exactly one per job, though the engine may redeliver.
#[instrument(name = "job_callback", skip_all, fields(job_id = %payload.job_id))]
pub async fn terminal<S>(
  State(state): State<AppState<S>>,
  Json(payload): Json<TerminalCallbackRequest>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: Store + Clone + Send + Sync + 'static,
{
  validate_token_shape(&payload.callback_token)?;

  let job = state
    .store
    .get_job(&payload.job_id)
    .await?
    .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;

  verify_token(&job, &payload.callback_token)?;

  if job.is_terminal() {
    return Ok(idempotent_response(&job));
  }

  let execution = state
    .store
    .get_execution(payload.execution_id)
    .await?
    .ok_or_else(|| ApiError::NotFound("Execution not found".to_string()))?;

  // A stale or forged job_id/execution_id pairing is a conflict, not a
  // not-found: the caller proved knowledge of the token but the references
  // disagree.
  if job.execution_id != execution.id {
    return Err(ApiError::Forbidden(
      "Execution does not match job".to_string(),
    ));
  }

  match state.store.finalize_job(&payload.job_id, &payload.report).await? {
    FinalizeOutcome::Applied {
      execution_id,
      status,
    } => Ok(Json(json!({
      "success": true,
      "execution_id": execution_id,
      "status": status,
    }))),
    FinalizeOutcome::Idempotent {
      execution_id,
      status,
    } => Ok(Json(json!({
      "success": true,
      "execution_id": execution_id,
      "status": status,
      "idempotent": true,
    }))),
  }
}

/// Progress callback: advisory, last-write-wins, ignored once terminal.
#[instrument(name = "job_progress", skip_all, fields(job_id = %payload.job_id))]
pub async fn progress<S>(
  State(state): State<AppState<S>>,
  Json(payload): Json<ProgressRequest>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: Store + Clone + Send + Sync + 'static,
{
  validate_token_shape(&payload.callback_token)?;
  if !(0..=100).contains(&payload.progress) {
    return Err(ApiError::Validation(
      "progress must be between 0 and 100".to_string(),
    ));
  }

  let job = state
    .store
    .get_job(&payload.job_id)
    .await?
    .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;

  verify_token(&job, &payload.callback_token)?;

  match state
    .store
    .record_progress(&payload.job_id, payload.progress as i32)
    .await?
  {
    ProgressOutcome::Applied => {
      debug!(
        progress = payload.progress,
        current_node = payload.current_node.as_deref().unwrap_or(""),
        "progress recorded"
      );
      Ok(Json(json!({"success": true})))
    }
    ProgressOutcome::Idempotent => Ok(Json(json!({"success": true, "idempotent": true}))),
  }
}

/// Reject malformed tokens before touching any state.
fn validate_token_shape(token: &str) -> Result<(), ApiError> {
  if token.len() != 64 {
    return Err(ApiError::Validation(
      "callback_token must be 64 characters".to_string(),
    ));
  }
  Ok(())
}

/// Constant-time comparison: job ids may leak into logs or be enumerable,
/// the token is the real secret.
fn verify_token(job: &JobStatus, presented: &str) -> Result<(), ApiError> {
  let matches: bool = job
    .callback_token
    .as_bytes()
    .ct_eq(presented.as_bytes())
    .into();
  if matches {
    Ok(())
  } else {
    Err(ApiError::Unauthorized("Invalid callback token".to_string()))
  }
}

fn idempotent_response(job: &JobStatus) -> Json<serde_json::Value> {
  Json(json!({
    "success": true,
    "execution_id": job.execution_id,
    "status": job.status,
    "idempotent": true,
  }))
}
