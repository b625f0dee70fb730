use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use linkflow_types::{JobState, NodeRunStatus};

/// Terminal status reported by the engine for a whole job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
  Completed,
  Failed,
}

/// One node's result within a terminal callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
  pub node_id: String,
  pub node_type: String,
  #[serde(default)]
  pub node_name: Option<String>,
  pub status: NodeRunStatus,
  #[serde(default)]
  pub output: Option<serde_json::Value>,
  #[serde(default)]
  pub error: Option<serde_json::Value>,
  #[serde(default)]
  pub started_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub sequence: Option<i64>,
}

/// The full terminal callback payload applied by [`crate::Store::finalize_job`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalReport {
  pub status: TerminalStatus,
  #[serde(default)]
  pub nodes: Vec<NodeReport>,
  #[serde(default)]
  pub error: Option<serde_json::Value>,
  #[serde(default)]
  pub duration_ms: Option<i64>,
}

/// Result of applying a terminal callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
  /// The callback was applied and both rows are now terminal.
  Applied { execution_id: i64, status: JobState },
  /// The job was already terminal; nothing was mutated.
  Idempotent { execution_id: i64, status: JobState },
}

/// Result of recording a progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressOutcome {
  Applied,
  /// The job was already terminal; the stored progress is untouched.
  Idempotent,
}
