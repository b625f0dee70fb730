use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// A workflow definition as the coordination layer sees it: an opaque
/// node/edge graph plus settings. Graph semantics belong to the engine;
/// the dispatcher only scans node configs for credential references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Workflow {
  pub id: i64,
  pub workspace_id: i64,
  pub name: String,
  pub is_active: bool,
  pub nodes: Json<serde_json::Value>,
  pub edges: Json<serde_json::Value>,
  pub settings: Json<serde_json::Value>,
}

impl Workflow {
  /// Whether the workflow has any nodes at all.
  pub fn has_nodes(&self) -> bool {
    self.nodes.0.as_array().is_some_and(|nodes| !nodes.is_empty())
  }

  /// Credential ids referenced by node configs, deduplicated in first-seen
  /// order. Nodes reference a credential under `data.credentialId` or
  /// `data.credential_id`; only these are ever decrypted for dispatch.
  pub fn credential_ids(&self) -> Vec<i64> {
    let mut ids = Vec::new();
    let Some(nodes) = self.nodes.0.as_array() else {
      return ids;
    };

    for node in nodes {
      let data = &node["data"];
      for key in ["credentialId", "credential_id"] {
        if let Some(id) = as_credential_id(&data[key])
          && !ids.contains(&id)
        {
          ids.push(id);
        }
      }
    }
    ids
  }
}

fn as_credential_id(value: &serde_json::Value) -> Option<i64> {
  match value {
    serde_json::Value::Number(n) => n.as_i64(),
    serde_json::Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn workflow(nodes: serde_json::Value) -> Workflow {
    Workflow {
      id: 1,
      workspace_id: 1,
      name: "test".into(),
      is_active: true,
      nodes: Json(nodes),
      edges: Json(json!([])),
      settings: Json(json!({})),
    }
  }

  #[test]
  fn credential_ids_scans_both_key_spellings_and_dedupes() {
    let wf = workflow(json!([
      {"id": "n1", "type": "http_request", "data": {"credentialId": 3}},
      {"id": "n2", "type": "slack", "data": {"credential_id": "7"}},
      {"id": "n3", "type": "http_request", "data": {"credentialId": 3}},
      {"id": "n4", "type": "set", "data": {}},
    ]));

    assert_eq!(wf.credential_ids(), vec![3, 7]);
  }

  #[test]
  fn credential_ids_is_empty_without_references() {
    let wf = workflow(json!([{"id": "n1", "type": "set"}]));
    assert!(wf.credential_ids().is_empty());
    assert!(wf.has_nodes());
    assert!(!workflow(json!([])).has_nodes());
  }
}
