use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::enums::JobState;

/// The dispatch-side shadow of one execution's delegation to the engine.
///
/// Created by the dispatcher with a fresh `job_id` and `callback_token`,
/// moved to `processing` once the job message is on the channel, and
/// finalized exactly once by the callback ingestor. Repeated terminal
/// callbacks are absorbed as idempotent replays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct JobStatus {
  pub job_id: String,
  pub execution_id: i64,
  pub partition: u32,
  pub callback_token: String,
  pub status: JobState,
  pub progress: i32,
  pub started_at: Option<DateTime<Utc>>,
  pub result: Option<Json<serde_json::Value>>,
  pub error: Option<Json<serde_json::Value>>,
  pub created_at: DateTime<Utc>,
}

impl JobStatus {
  /// Build a new pending job record. The callback token is generated once
  /// here by the caller and never regenerated.
  pub fn new_pending(job_id: String, execution_id: i64, partition: u32, callback_token: String) -> Self {
    Self {
      job_id,
      execution_id,
      partition,
      callback_token,
      status: JobState::Pending,
      progress: 0,
      started_at: None,
      result: None,
      error: None,
      created_at: Utc::now(),
    }
  }

  /// Whether this job has reached an absorbing state.
  pub fn is_terminal(&self) -> bool {
    self.status.is_terminal()
  }

  /// Mark the job as picked up by the engine-facing channel.
  pub fn mark_processing(&mut self) {
    self.status = JobState::Processing;
    self.started_at = Some(Utc::now());
  }

  /// Finalize as completed, forcing progress to 100.
  pub fn mark_completed(&mut self, result: Option<serde_json::Value>) {
    self.status = JobState::Completed;
    self.progress = 100;
    self.result = result.map(Json);
  }

  /// Finalize as failed with the engine's error payload.
  pub fn mark_failed(&mut self, error: serde_json::Value) {
    self.status = JobState::Failed;
    self.error = Some(Json(error));
  }

  /// Record the latest advisory progress value (last-write-wins).
  pub fn update_progress(&mut self, progress: i32) {
    self.progress = progress.clamp(0, 100);
  }
}
