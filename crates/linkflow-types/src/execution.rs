use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::enums::{ExecutionMode, ExecutionStatus};

/// An invalid lifecycle operation on an execution or job.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
  /// The requested status change is not allowed from the current status.
  #[error("cannot transition execution from {from:?} to {to:?}")]
  Invalid {
    from: ExecutionStatus,
    to: ExecutionStatus,
  },

  /// Retry requested for an execution that is not failed or has no attempts left.
  #[error("execution cannot be retried (status {status:?}, attempt {attempt}/{max_attempts})")]
  NotRetryable {
    status: ExecutionStatus,
    attempt: i32,
    max_attempts: i32,
  },

  /// Cancel requested for an execution that is already terminal.
  #[error("execution cannot be cancelled (status {status:?})")]
  NotCancellable { status: ExecutionStatus },
}

/// One recorded attempt at running a workflow.
///
/// Created in `pending` by a trigger (webhook, manual, schedule, retry),
/// moved to `running` by the dispatcher, and finalized exactly once by the
/// callback ingestor or an explicit cancel. A retry never mutates this row;
/// it produces a new one via [`Execution::retry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Execution {
  pub id: i64,
  pub workflow_id: i64,
  pub workspace_id: i64,
  pub status: ExecutionStatus,
  pub mode: ExecutionMode,
  pub trigger_data: Option<Json<serde_json::Value>>,
  pub result_data: Option<Json<serde_json::Value>>,
  pub error: Option<Json<serde_json::Value>>,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
  pub duration_ms: Option<i64>,
  pub attempt: i32,
  pub max_attempts: i32,
  pub parent_execution_id: Option<i64>,
  pub triggered_by: Option<i64>,
  pub ip_address: Option<String>,
  pub user_agent: Option<String>,
  pub created_at: DateTime<Utc>,
}

impl Execution {
  /// Build a new pending execution. The id is assigned on insert.
  #[allow(clippy::too_many_arguments)]
  pub fn new_pending(
    workflow_id: i64,
    workspace_id: i64,
    mode: ExecutionMode,
    trigger_data: Option<serde_json::Value>,
    triggered_by: Option<i64>,
    ip_address: Option<String>,
    user_agent: Option<String>,
  ) -> Self {
    Self {
      id: 0,
      workflow_id,
      workspace_id,
      status: ExecutionStatus::Pending,
      mode,
      trigger_data: trigger_data.map(Json),
      result_data: None,
      error: None,
      started_at: None,
      finished_at: None,
      duration_ms: None,
      attempt: 1,
      max_attempts: 3,
      parent_execution_id: None,
      triggered_by,
      ip_address,
      user_agent,
      created_at: Utc::now(),
    }
  }

  /// Transition pending → running and stamp `started_at`.
  pub fn start(&mut self) -> Result<(), TransitionError> {
    if self.status != ExecutionStatus::Pending {
      return Err(TransitionError::Invalid {
        from: self.status,
        to: ExecutionStatus::Running,
      });
    }
    self.status = ExecutionStatus::Running;
    self.started_at = Some(Utc::now());
    Ok(())
  }

  /// Back-fill `started_at` if the dispatcher never stamped it (e.g. a
  /// terminal callback arriving for a job whose dispatch worker crashed
  /// between publish and the running transition).
  pub fn ensure_started(&mut self, at: DateTime<Utc>) {
    if self.started_at.is_none() {
      self.started_at = Some(at);
    }
  }

  /// Finalize as completed.
  pub fn complete(
    &mut self,
    result_data: Option<serde_json::Value>,
    duration_ms: Option<i64>,
  ) -> Result<(), TransitionError> {
    self.finish(ExecutionStatus::Completed, duration_ms)?;
    self.result_data = result_data.map(Json);
    Ok(())
  }

  /// Finalize as failed with a diagnostic error payload.
  pub fn fail(
    &mut self,
    error: serde_json::Value,
    duration_ms: Option<i64>,
  ) -> Result<(), TransitionError> {
    self.finish(ExecutionStatus::Failed, duration_ms)?;
    self.error = Some(Json(error));
    Ok(())
  }

  /// Cancel an active execution. Terminal executions are rejected and
  /// `attempt` is never touched.
  pub fn cancel(&mut self) -> Result<(), TransitionError> {
    if !self.can_cancel() {
      return Err(TransitionError::NotCancellable {
        status: self.status,
      });
    }
    self.finish(ExecutionStatus::Cancelled, None)?;
    Ok(())
  }

  /// Whether this execution may be retried.
  pub fn can_retry(&self) -> bool {
    self.status == ExecutionStatus::Failed && self.attempt < self.max_attempts
  }

  /// Whether this execution may be cancelled.
  pub fn can_cancel(&self) -> bool {
    self.status.is_active()
  }

  /// Create the retry child for this execution: a NEW pending row with
  /// `attempt` bumped and `parent_execution_id` pointing back here. The
  /// parent row is never mutated.
  pub fn retry(
    &self,
    triggered_by: Option<i64>,
    ip_address: Option<String>,
    user_agent: Option<String>,
  ) -> Result<Execution, TransitionError> {
    if !self.can_retry() {
      return Err(TransitionError::NotRetryable {
        status: self.status,
        attempt: self.attempt,
        max_attempts: self.max_attempts,
      });
    }

    let mut child = Execution::new_pending(
      self.workflow_id,
      self.workspace_id,
      ExecutionMode::Retry,
      self.trigger_data.as_ref().map(|d| d.0.clone()),
      triggered_by,
      ip_address,
      user_agent,
    );
    child.attempt = self.attempt + 1;
    child.max_attempts = self.max_attempts;
    child.parent_execution_id = Some(self.id);
    Ok(child)
  }

  fn finish(
    &mut self,
    to: ExecutionStatus,
    duration_ms: Option<i64>,
  ) -> Result<(), TransitionError> {
    if self.status.is_terminal() {
      return Err(TransitionError::Invalid {
        from: self.status,
        to,
      });
    }
    let now = Utc::now();
    let elapsed = self.started_at.map(|s| (now - s).num_milliseconds());
    self.status = to;
    self.finished_at = Some(now);
    self.duration_ms = duration_ms.or(elapsed);
    Ok(())
  }
}
