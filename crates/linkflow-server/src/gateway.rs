//! Webhook trigger gateway.
//!
//! Public, unauthenticated-by-default boundary: any HTTP method on
//! `/webhooks/{uuid}[/{path}]`. Lookup failures and path mismatches return
//! the same 404 so callers cannot probe which UUIDs exist.

use std::collections::HashMap;

use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{debug, instrument};

use linkflow_dispatch::DispatchRequest;
use linkflow_store::Store;
use linkflow_types::{Execution, ExecutionMode, Webhook, WebhookAuthConfig, WebhookAuthType};

use crate::error::ApiError;
use crate::ratelimit::RateDecision;
use crate::AppState;

pub async fn receive<S>(
  State(state): State<AppState<S>>,
  Path(uuid): Path<String>,
  request: Request,
) -> Result<Response, ApiError>
where
  S: Store + Clone + Send + Sync + 'static,
{
  handle(state, uuid, None, request).await
}

pub async fn receive_with_path<S>(
  State(state): State<AppState<S>>,
  Path((uuid, path)): Path<(String, String)>,
  request: Request,
) -> Result<Response, ApiError>
where
  S: Store + Clone + Send + Sync + 'static,
{
  handle(state, uuid, Some(path), request).await
}

#[instrument(name = "webhook_receive", skip_all, fields(uuid = %uuid))]
async fn handle<S>(
  state: AppState<S>,
  uuid: String,
  path: Option<String>,
  request: Request,
) -> Result<Response, ApiError>
where
  S: Store + Clone + Send + Sync + 'static,
{
  let webhook = state
    .store
    .get_active_webhook(&uuid)
    .await?
    .ok_or_else(not_found)?;

  if !webhook.matches_path(path.as_deref()) {
    return Err(not_found());
  }

  let method = request.method().clone();
  if !webhook.is_method_allowed(method.as_str()) {
    return Err(ApiError::MethodNotAllowed("Method not allowed".to_string()));
  }

  let headers = request.headers().clone();
  let ip = client_ip(&headers, &request);

  authenticate(&state, &webhook, &headers)?;

  if let Some(limit) = webhook.rate_limit {
    let key = format!("webhook:{}:{}", webhook.id, ip.as_deref().unwrap_or("unknown"));
    if let RateDecision::Limited { retry_after } =
      state.limiter.check(&key, limit.max(0) as u32)
    {
      return Err(ApiError::RateLimited { retry_after });
    }
  }

  let trigger_data = build_trigger_data(&method, &headers, &path, &ip, request).await?;
  let user_agent = headers
    .get("user-agent")
    .and_then(|v| v.to_str().ok())
    .map(String::from);

  let execution = Execution::new_pending(
    webhook.workflow_id,
    webhook.workspace_id,
    ExecutionMode::Webhook,
    Some(trigger_data),
    None,
    ip,
    user_agent,
  );
  let execution = state.store.create_execution(&execution).await?;

  state.store.increment_webhook_calls(webhook.id).await?;

  // Hand off to the dispatcher through the internal queue; the webhook
  // response does not wait for the publish.
  let _ = state
    .dispatch
    .send(DispatchRequest::new(webhook.workflow_id, execution.id));

  debug!(execution_id = execution.id, "webhook accepted");

  let status =
    StatusCode::from_u16(webhook.response_status.clamp(100, 599) as u16).unwrap_or(StatusCode::OK);
  let body = webhook
    .response_body
    .as_ref()
    .map(|b| b.0.clone())
    .unwrap_or_else(|| json!({"success": true, "execution_id": execution.id}));

  Ok((status, axum::Json(body)).into_response())
}

/// Uniform not-found: the same response for unknown UUIDs and path
/// mismatches in either direction.
fn not_found() -> ApiError {
  ApiError::NotFound("Webhook not found".to_string())
}

/// Authenticate the caller against the webhook's scheme. The decrypted config
/// exists only inside this function and is never logged.
fn authenticate<S>(
  state: &AppState<S>,
  webhook: &Webhook,
  headers: &HeaderMap,
) -> Result<(), ApiError> {
  if webhook.auth_type == WebhookAuthType::None {
    return Ok(());
  }

  // Missing or undecryptable config: pass in the permissive default, reject
  // when the operator opted into fail-closed auth.
  let config = webhook
    .auth_config
    .as_deref()
    .and_then(|ciphertext| state.cipher.decrypt(ciphertext).ok())
    .and_then(|plaintext| serde_json::from_str::<WebhookAuthConfig>(&plaintext).ok());
  let Some(config) = config else {
    if state.strict_webhook_auth {
      return Err(unauthorized());
    }
    return Ok(());
  };

  let ok = match webhook.auth_type {
    WebhookAuthType::None => true,
    WebhookAuthType::Header => {
      let name = config.header_name.as_deref().unwrap_or("X-Webhook-Secret");
      let expected = config.header_value.as_deref().unwrap_or("");
      headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|value| value == expected)
    }
    WebhookAuthType::Basic => {
      let expected_user = config.username.as_deref().unwrap_or("");
      let expected_password = config.password.as_deref().unwrap_or("");
      basic_credentials(headers)
        .is_some_and(|(user, password)| user == expected_user && password == expected_password)
    }
    WebhookAuthType::Bearer => {
      let expected = config.token.as_deref().unwrap_or("");
      bearer_token(headers).is_some_and(|token| token == expected)
    }
  };

  if ok { Ok(()) } else { Err(unauthorized()) }
}

fn unauthorized() -> ApiError {
  ApiError::Unauthorized("Unauthorized".to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
  headers
    .get("authorization")
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
  use base64::Engine as _;
  let encoded = headers
    .get("authorization")
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Basic "))?;
  let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
  let decoded = String::from_utf8(decoded).ok()?;
  let (user, password) = decoded.split_once(':')?;
  Some((user.to_string(), password.to_string()))
}

/// Caller IP: proxy headers first, then the socket peer address.
fn client_ip(headers: &HeaderMap, request: &Request) -> Option<String> {
  if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
    if let Some(first) = forwarded.split(',').next() {
      let first = first.trim();
      if !first.is_empty() {
        return Some(first.to_string());
      }
    }
  }
  if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
    return Some(real_ip.trim().to_string());
  }
  request
    .extensions()
    .get::<ConnectInfo<std::net::SocketAddr>>()
    .map(|info| info.0.ip().to_string())
}

/// Capture the full inbound request as the execution's trigger payload.
async fn build_trigger_data(
  method: &Method,
  headers: &HeaderMap,
  path: &Option<String>,
  ip: &Option<String>,
  request: Request,
) -> Result<serde_json::Value, ApiError> {
  let query: HashMap<String, String> = request
    .uri()
    .query()
    .and_then(|q| serde_urlencoded::from_str(q).ok())
    .unwrap_or_default();

  let header_map: HashMap<String, Vec<String>> = {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
      if let Ok(value) = value.to_str() {
        map
          .entry(name.as_str().to_string())
          .or_default()
          .push(value.to_string());
      }
    }
    map
  };

  let bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
    .await
    .map_err(|e| ApiError::Validation(format!("unreadable request body: {e}")))?;
  let body = if bytes.is_empty() {
    serde_json::Value::Null
  } else {
    serde_json::from_slice(&bytes)
      .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()))
  };

  Ok(json!({
    "method": method.as_str(),
    "headers": header_map,
    "query": query,
    "body": body,
    "ip": ip,
    "path": path,
  }))
}
