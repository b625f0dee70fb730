use serde::{Deserialize, Serialize};

/// Status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Pending,
  Running,
  Waiting,
  Completed,
  Failed,
  Cancelled,
}

impl ExecutionStatus {
  /// Active executions can still make progress (or be cancelled).
  pub fn is_active(self) -> bool {
    matches!(self, Self::Pending | Self::Running | Self::Waiting)
  }

  /// Terminal executions never change again.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
  }
}

/// How an execution was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionMode {
  Manual,
  Webhook,
  Schedule,
  Retry,
  Event,
}

/// State of a dispatched job (the engine-side shadow of an execution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobState {
  Pending,
  Processing,
  Completed,
  Failed,
}

impl JobState {
  /// Terminal job states absorb all further callbacks.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed)
  }
}

/// Status of a single node within an execution, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NodeRunStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Skipped,
}

impl NodeRunStatus {
  /// Wire-format name, used when composing log lines.
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Running => "running",
      Self::Completed => "completed",
      Self::Failed => "failed",
      Self::Skipped => "skipped",
    }
  }
}

/// Severity of an execution log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum LogLevel {
  Debug,
  Info,
  Warning,
  Error,
}

/// Authentication scheme a webhook requires from callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum WebhookAuthType {
  None,
  Header,
  Basic,
  Bearer,
}
