use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::enums::WebhookAuthType;

/// Trigger descriptor for inbound HTTP calls. Owned by the management API;
/// the trigger gateway only reads it (and bumps `call_count`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Webhook {
  pub id: i64,
  pub workflow_id: i64,
  pub workspace_id: i64,
  pub uuid: String,
  pub path: Option<String>,
  pub is_active: bool,
  /// Allowed HTTP methods as uppercase strings; `*` allows any method.
  pub methods: Json<Vec<String>>,
  pub auth_type: WebhookAuthType,
  /// Encrypted auth payload, decrypted just-in-time by the gateway.
  pub auth_config: Option<String>,
  /// Requests allowed per 60 s window, per caller IP. NULL = unlimited.
  pub rate_limit: Option<i64>,
  pub response_status: i64,
  pub response_body: Option<Json<serde_json::Value>>,
  pub call_count: i64,
}

impl Webhook {
  /// Check an inbound HTTP method against the allow-list.
  pub fn is_method_allowed(&self, method: &str) -> bool {
    self
      .methods
      .0
      .iter()
      .any(|m| m == "*" || m.eq_ignore_ascii_case(method))
  }

  /// Check the caller's sub-path against the configured one. Both asymmetric
  /// mismatches (configured path but none supplied, and vice versa) fail, and
  /// the gateway reports them as the same uniform not-found.
  pub fn matches_path(&self, supplied: Option<&str>) -> bool {
    match (self.path.as_deref(), supplied) {
      (None, None) => true,
      (Some(configured), Some(supplied)) => configured == supplied,
      _ => false,
    }
  }
}

/// Decrypted webhook auth payload. Field presence depends on `auth_type`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookAuthConfig {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub header_name: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub header_value: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub username: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub password: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub token: Option<String>,
}
