use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The workflow graph as shipped to the engine: opaque nodes, edges, and
/// settings exactly as the management API stored them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
  pub nodes: serde_json::Value,
  pub edges: serde_json::Value,
  pub settings: serde_json::Value,
}

/// One decrypted credential shipped with a job. Only credentials actually
/// referenced by the workflow's nodes ever appear here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialPayload {
  #[serde(rename = "type")]
  pub credential_type: String,
  pub data: serde_json::Value,
}

/// The channel payload consumed by the execution engine. The engine must
/// echo `job_id` and `callback_token` on every callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
  pub job_id: String,
  pub callback_token: String,
  pub execution_id: i64,
  pub workflow_id: i64,
  pub workspace_id: i64,
  pub partition: u32,
  pub priority: String,
  pub workflow: WorkflowGraph,
  pub trigger_data: serde_json::Value,
  pub credentials: BTreeMap<String, CredentialPayload>,
  pub variables: BTreeMap<String, serde_json::Value>,
  pub callback_url: String,
  pub progress_url: String,
  pub created_at: DateTime<Utc>,
}
