//! Linkflow Server
//!
//! The HTTP boundary of the coordination layer: the public webhook trigger
//! gateway, the engine-facing job callback/progress ingestor, and the
//! execution lifecycle endpoints (cancel, retry). Handlers translate typed
//! component errors into status codes at this boundary only.

mod callback;
mod error;
mod executions;
mod gateway;
mod ratelimit;

pub use error::ApiError;
pub use ratelimit::{FixedWindowLimiter, RateDecision};

use std::sync::Arc;

use axum::Router;
use axum::routing::{any, get, post};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use linkflow_dispatch::DispatchRequest;
use linkflow_secrets::SecretCipher;
use linkflow_store::Store;

/// Yes/no authorization gate consulted before any mutating call. The real
/// role/permission model lives in the management API; deployments plug it in
/// here, tests and single-user setups use [`AllowAll`].
pub trait PermissionGate: Send + Sync {
  fn allows(&self, workspace_id: i64, action: &str) -> bool;
}

/// Gate that approves everything.
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

impl PermissionGate for AllowAll {
  fn allows(&self, _workspace_id: i64, _action: &str) -> bool {
    true
  }
}

/// Shared state injected into every handler. No process-wide singletons:
/// the store, cipher, limiter, and dispatch queue are all explicit.
pub struct AppState<S> {
  pub store: S,
  pub cipher: Arc<dyn SecretCipher>,
  pub gate: Arc<dyn PermissionGate>,
  pub limiter: Arc<FixedWindowLimiter>,
  pub dispatch: mpsc::UnboundedSender<DispatchRequest>,
  /// Fail-closed webhook auth: reject when the auth config is missing or
  /// undecryptable instead of letting the request through.
  pub strict_webhook_auth: bool,
}

impl<S: Clone> Clone for AppState<S> {
  fn clone(&self) -> Self {
    Self {
      store: self.store.clone(),
      cipher: self.cipher.clone(),
      gate: self.gate.clone(),
      limiter: self.limiter.clone(),
      dispatch: self.dispatch.clone(),
      strict_webhook_auth: self.strict_webhook_auth,
    }
  }
}

/// Build the API router.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: Store + Clone + Send + Sync + 'static,
{
  Router::new()
    .route("/api/v1/health", get(health))
    .route("/webhooks/{uuid}", any(gateway::receive::<S>))
    .route("/webhooks/{uuid}/{path}", any(gateway::receive_with_path::<S>))
    .route("/api/v1/jobs/callback", post(callback::terminal::<S>))
    .route("/api/v1/jobs/progress", post(callback::progress::<S>))
    .route("/api/v1/executions/{id}/cancel", post(executions::cancel::<S>))
    .route("/api/v1/executions/{id}/retry", post(executions::retry::<S>))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
  axum::Json(serde_json::json!({
    "status": "ok",
    "timestamp": chrono::Utc::now().to_rfc3339(),
  }))
}
