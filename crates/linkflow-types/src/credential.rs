use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored credential, encrypted at rest. Owned by the management API; the
/// dispatcher reads only the credentials a workflow's nodes reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Credential {
  pub id: i64,
  pub workspace_id: i64,
  pub name: String,
  pub credential_type: String,
  /// Encrypted JSON payload.
  pub data: String,
}

/// A workspace variable. Secret-flagged values are encrypted at rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Variable {
  pub id: i64,
  pub workspace_id: i64,
  pub key: String,
  pub value: String,
  pub is_secret: bool,
}
