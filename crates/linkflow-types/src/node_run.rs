use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::enums::{LogLevel, NodeRunStatus};

/// Per-node result snapshot within an execution.
///
/// Keyed uniquely by (execution_id, node_id) and upserted by the callback
/// ingestor; `sequence` gives the engine-reported ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionNode {
  pub id: i64,
  pub execution_id: i64,
  pub node_id: String,
  pub node_type: String,
  pub node_name: Option<String>,
  pub status: NodeRunStatus,
  pub output_data: Option<Json<serde_json::Value>>,
  pub error: Option<Json<serde_json::Value>>,
  pub started_at: Option<DateTime<Utc>>,
  pub finished_at: Option<DateTime<Utc>>,
  pub sequence: i64,
}

/// Append-only structured log line tied to an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExecutionLog {
  pub id: i64,
  pub execution_id: i64,
  pub execution_node_id: Option<i64>,
  pub level: LogLevel,
  pub message: String,
  pub context: Option<Json<serde_json::Value>>,
  pub logged_at: DateTime<Utc>,
}
