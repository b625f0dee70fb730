//! End-to-end tests for the HTTP boundary: webhook gateway, callback
//! ingestor, progress, and execution lifecycle endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc;
use tower::ServiceExt;

use linkflow_dispatch::DispatchRequest;
use linkflow_secrets::PlainCipher;
use linkflow_server::{AllowAll, AppState, FixedWindowLimiter, router};
use linkflow_store::{SqliteStore, Store};
use linkflow_types::{Execution, ExecutionMode, ExecutionStatus, JobState, JobStatus};

struct TestApp {
  app: Router,
  store: SqliteStore,
  dispatched: mpsc::UnboundedReceiver<DispatchRequest>,
}

async fn test_app() -> TestApp {
  test_app_with(false).await
}

async fn test_app_with(strict_webhook_auth: bool) -> TestApp {
  let pool = SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("failed to open in-memory sqlite");
  let store = SqliteStore::new(pool);
  store.migrate().await.expect("migrations failed");

  let (dispatch_tx, dispatched) = mpsc::unbounded_channel();
  let state = AppState {
    store: store.clone(),
    cipher: Arc::new(PlainCipher),
    gate: Arc::new(AllowAll),
    limiter: Arc::new(FixedWindowLimiter::new(Duration::from_secs(60))),
    dispatch: dispatch_tx,
    strict_webhook_auth,
  };

  TestApp {
    app: router(state),
    store,
    dispatched,
  }
}

async fn seed_workflow(store: &SqliteStore) -> i64 {
  sqlx::query_scalar(
    r#"
        INSERT INTO workflows (workspace_id, name, is_active, nodes, edges, settings)
        VALUES (1, 'wf', TRUE, '[{"id":"n1","type":"trigger"}]', '[]', '{}')
        RETURNING id
        "#,
  )
  .fetch_one(store.pool())
  .await
  .unwrap()
}

#[allow(clippy::too_many_arguments)]
async fn seed_webhook(
  store: &SqliteStore,
  workflow_id: i64,
  uuid: &str,
  path: Option<&str>,
  methods: &str,
  auth_type: &str,
  auth_config: Option<&str>,
  rate_limit: Option<i64>,
) -> i64 {
  sqlx::query_scalar(
    r#"
        INSERT INTO webhooks
            (workflow_id, workspace_id, uuid, path, is_active, methods, auth_type, auth_config, rate_limit)
        VALUES (?, 1, ?, ?, TRUE, ?, ?, ?, ?)
        RETURNING id
        "#,
  )
  .bind(workflow_id)
  .bind(uuid)
  .bind(path)
  .bind(methods)
  .bind(auth_type)
  .bind(auth_config)
  .bind(rate_limit)
  .fetch_one(store.pool())
  .await
  .unwrap()
}

/// A running execution with a processing job, as after a successful dispatch.
async fn seed_running_job(store: &SqliteStore, workflow_id: i64, job_id: &str) -> (Execution, JobStatus) {
  let execution = Execution::new_pending(workflow_id, 1, ExecutionMode::Manual, None, None, None, None);
  let execution = store.create_execution(&execution).await.unwrap();
  let job = JobStatus::new_pending(job_id.to_string(), execution.id, 1, "a".repeat(64));
  store.create_job(&job).await.unwrap();
  store.mark_job_dispatched(job_id).await.unwrap();
  (
    store.get_execution(execution.id).await.unwrap().unwrap(),
    store.get_job(job_id).await.unwrap().unwrap(),
  )
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
  Request::builder()
    .method("POST")
    .uri(uri)
    .header("content-type", "application/json")
    .body(Body::from(body.to_string()))
    .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  serde_json::from_slice(&bytes).unwrap()
}

const HOOK_UUID: &str = "2f1e9d4c-5a6b-4c7d-8e9f-0a1b2c3d4e5f";

#[tokio::test]
async fn health_endpoint_reports_ok() {
  let harness = test_app().await;
  let response = harness
    .app
    .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let json = body_json(response).await;
  assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn webhook_bearer_auth_gates_the_trigger() {
  let mut harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  seed_webhook(
    &harness.store,
    workflow_id,
    HOOK_UUID,
    None,
    r#"["POST"]"#,
    "bearer",
    Some(r#"{"token":"abc123"}"#),
    None,
  )
  .await;

  // no Authorization header
  let response = harness
    .app
    .clone()
    .oneshot(post_json(&format!("/webhooks/{HOOK_UUID}"), serde_json::json!({"n": 1})))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

  // correct bearer token
  let request = Request::builder()
    .method("POST")
    .uri(format!("/webhooks/{HOOK_UUID}"))
    .header("content-type", "application/json")
    .header("authorization", "Bearer abc123")
    .header("x-forwarded-for", "203.0.113.9")
    .body(Body::from(r#"{"order": 42}"#))
    .unwrap();
  let response = harness.app.clone().oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let json = body_json(response).await;
  assert_eq!(json["success"], true);
  let execution_id = json["execution_id"].as_i64().unwrap();

  // one pending execution carrying the inbound request
  let execution = harness.store.get_execution(execution_id).await.unwrap().unwrap();
  assert_eq!(execution.status, ExecutionStatus::Pending);
  assert_eq!(execution.mode, ExecutionMode::Webhook);
  let trigger = &execution.trigger_data.as_ref().unwrap().0;
  assert_eq!(trigger["method"], "POST");
  assert_eq!(trigger["body"]["order"], 42);
  assert_eq!(trigger["ip"], "203.0.113.9");

  // dispatch was handed off
  let request = harness.dispatched.recv().await.unwrap();
  assert_eq!(request.execution_id, execution_id);
  assert_eq!(request.workflow_id, workflow_id);

  // call counter bumped
  let calls: i64 = sqlx::query_scalar("SELECT call_count FROM webhooks WHERE uuid = ?")
    .bind(HOOK_UUID)
    .fetch_one(harness.store.pool())
    .await
    .unwrap();
  assert_eq!(calls, 1);
}

#[tokio::test]
async fn webhook_lookup_and_path_mismatches_are_a_uniform_404() {
  let harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  seed_webhook(
    &harness.store,
    workflow_id,
    HOOK_UUID,
    Some("orders"),
    r#"["POST"]"#,
    "none",
    None,
    None,
  )
  .await;

  let unknown = harness
    .app
    .clone()
    .oneshot(post_json("/webhooks/00000000-0000-0000-0000-000000000000", serde_json::json!({})))
    .await
    .unwrap();
  // webhook has a path but caller omitted it
  let omitted = harness
    .app
    .clone()
    .oneshot(post_json(&format!("/webhooks/{HOOK_UUID}"), serde_json::json!({})))
    .await
    .unwrap();
  // wrong sub-path
  let wrong = harness
    .app
    .clone()
    .oneshot(post_json(&format!("/webhooks/{HOOK_UUID}/other"), serde_json::json!({})))
    .await
    .unwrap();

  for response in [unknown, omitted, wrong] {
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Webhook not found");
  }

  // the opposite asymmetry: webhook without a path, caller supplies one
  let plain_uuid = "3a2b1c0d-1111-2222-3333-444455556666";
  seed_webhook(&harness.store, workflow_id, plain_uuid, None, r#"["POST"]"#, "none", None, None).await;
  let extra = harness
    .app
    .clone()
    .oneshot(post_json(&format!("/webhooks/{plain_uuid}/orders"), serde_json::json!({})))
    .await
    .unwrap();
  assert_eq!(extra.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_rejects_disallowed_methods() {
  let harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  seed_webhook(&harness.store, workflow_id, HOOK_UUID, None, r#"["POST"]"#, "none", None, None).await;

  let response = harness
    .app
    .oneshot(
      Request::builder()
        .method("GET")
        .uri(format!("/webhooks/{HOOK_UUID}"))
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn webhook_rate_limit_returns_429_on_the_third_call() {
  let harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  seed_webhook(&harness.store, workflow_id, HOOK_UUID, None, r#"["POST"]"#, "none", None, Some(2)).await;

  for expected in [StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS] {
    let request = Request::builder()
      .method("POST")
      .uri(format!("/webhooks/{HOOK_UUID}"))
      .header("content-type", "application/json")
      .header("x-forwarded-for", "198.51.100.7")
      .body(Body::from("{}"))
      .unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), expected);
  }
}

#[tokio::test]
async fn missing_auth_config_is_fail_open_by_default_and_fail_closed_when_strict() {
  // permissive default: bearer webhook without stored config lets callers in
  let harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  seed_webhook(&harness.store, workflow_id, HOOK_UUID, None, r#"["POST"]"#, "bearer", None, None).await;
  let response = harness
    .app
    .oneshot(post_json(&format!("/webhooks/{HOOK_UUID}"), serde_json::json!({})))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);

  // strict flag turns the same situation into a 401
  let harness = test_app_with(true).await;
  let workflow_id = seed_workflow(&harness.store).await;
  seed_webhook(&harness.store, workflow_id, HOOK_UUID, None, r#"["POST"]"#, "bearer", None, None).await;
  let response = harness
    .app
    .oneshot(post_json(&format!("/webhooks/{HOOK_UUID}"), serde_json::json!({})))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

fn terminal_payload(job: &JobStatus, execution_id: i64) -> serde_json::Value {
  serde_json::json!({
    "job_id": job.job_id,
    "callback_token": job.callback_token,
    "execution_id": execution_id,
    "status": "completed",
    "nodes": [
      {"node_id": "n1", "node_type": "http_request", "status": "completed", "output": {"a": 1}, "sequence": 1},
      {"node_id": "n2", "node_type": "transform", "status": "completed", "sequence": 2},
      {"node_id": "n3", "node_type": "slack", "status": "completed", "sequence": 3},
    ],
    "duration_ms": 500,
  })
}

#[tokio::test]
async fn terminal_callback_finalizes_and_replays_idempotently() {
  let harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  let (execution, job) = seed_running_job(&harness.store, workflow_id, "job-1").await;

  let response = harness
    .app
    .clone()
    .oneshot(post_json("/api/v1/jobs/callback", terminal_payload(&job, execution.id)))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let json = body_json(response).await;
  assert_eq!(json["success"], true);
  assert_eq!(json["status"], "completed");
  assert!(json.get("idempotent").is_none());

  let execution_row = harness.store.get_execution(execution.id).await.unwrap().unwrap();
  assert_eq!(execution_row.status, ExecutionStatus::Completed);
  assert_eq!(harness.store.nodes_for_execution(execution.id).await.unwrap().len(), 3);
  assert_eq!(harness.store.logs_for_execution(execution.id).await.unwrap().len(), 3);

  // the replayed delivery is acknowledged without a second mutation
  let replay = harness
    .app
    .clone()
    .oneshot(post_json("/api/v1/jobs/callback", terminal_payload(&job, execution.id)))
    .await
    .unwrap();
  assert_eq!(replay.status(), StatusCode::OK);
  let json = body_json(replay).await;
  assert_eq!(json["idempotent"], true);
  assert_eq!(harness.store.logs_for_execution(execution.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn terminal_callback_with_bad_token_is_rejected_without_state_change() {
  let harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  let (execution, job) = seed_running_job(&harness.store, workflow_id, "job-1").await;

  // differs from the stored token in the last byte only
  let mut near_token = job.callback_token.clone();
  near_token.replace_range(63..64, if near_token.ends_with('0') { "1" } else { "0" });

  let mut payload = terminal_payload(&job, execution.id);
  payload["callback_token"] = serde_json::Value::String(near_token);

  let response = harness
    .app
    .oneshot(post_json("/api/v1/jobs/callback", payload))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
  let json = body_json(response).await;
  assert_eq!(json["error"], "Invalid callback token");

  // neither row moved
  let job_row = harness.store.get_job("job-1").await.unwrap().unwrap();
  assert_eq!(job_row.status, JobState::Processing);
  let execution_row = harness.store.get_execution(execution.id).await.unwrap().unwrap();
  assert_eq!(execution_row.status, ExecutionStatus::Running);
}

#[tokio::test]
async fn terminal_callback_cross_reference_mismatch_is_forbidden() {
  let harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  let (_execution_a, job_a) = seed_running_job(&harness.store, workflow_id, "job-a").await;
  let (execution_b, _job_b) = seed_running_job(&harness.store, workflow_id, "job-b").await;

  // valid token for job-a, but execution_id points at b's execution
  let payload = terminal_payload(&job_a, execution_b.id);
  let response = harness
    .app
    .oneshot(post_json("/api/v1/jobs/callback", payload))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn terminal_callback_for_unknown_job_or_execution_is_404() {
  let harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  let (_execution, job) = seed_running_job(&harness.store, workflow_id, "job-1").await;

  let mut payload = terminal_payload(&job, 12345);
  payload["job_id"] = serde_json::Value::String("no-such-job".to_string());
  let response = harness
    .app
    .clone()
    .oneshot(post_json("/api/v1/jobs/callback", payload))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);

  let payload = terminal_payload(&job, 12345);
  let response = harness
    .app
    .oneshot(post_json("/api/v1/jobs/callback", payload))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn progress_updates_then_replays_idempotently_after_terminal() {
  let harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  let (execution, job) = seed_running_job(&harness.store, workflow_id, "job-1").await;

  let response = harness
    .app
    .clone()
    .oneshot(post_json(
      "/api/v1/jobs/progress",
      serde_json::json!({
        "job_id": job.job_id,
        "callback_token": job.callback_token,
        "progress": 75,
        "current_node": "n2",
      }),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(harness.store.get_job("job-1").await.unwrap().unwrap().progress, 75);

  // finalize, then a late progress update must not touch the stored value
  harness
    .app
    .clone()
    .oneshot(post_json("/api/v1/jobs/callback", terminal_payload(&job, execution.id)))
    .await
    .unwrap();

  let response = harness
    .app
    .clone()
    .oneshot(post_json(
      "/api/v1/jobs/progress",
      serde_json::json!({
        "job_id": job.job_id,
        "callback_token": job.callback_token,
        "progress": 10,
      }),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let json = body_json(response).await;
  assert_eq!(json["idempotent"], true);
  assert_eq!(harness.store.get_job("job-1").await.unwrap().unwrap().progress, 100);
}

#[tokio::test]
async fn progress_validation_rejects_out_of_range_values() {
  let harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  let (_execution, job) = seed_running_job(&harness.store, workflow_id, "job-1").await;

  let response = harness
    .app
    .oneshot(post_json(
      "/api/v1/jobs/progress",
      serde_json::json!({
        "job_id": job.job_id,
        "callback_token": job.callback_token,
        "progress": 150,
      }),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn cancel_transitions_running_and_rejects_terminal() {
  let harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  let (execution, _job) = seed_running_job(&harness.store, workflow_id, "job-1").await;

  let response = harness
    .app
    .clone()
    .oneshot(post_json(
      &format!("/api/v1/executions/{}/cancel", execution.id),
      serde_json::json!({}),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let json = body_json(response).await;
  assert_eq!(json["execution"]["status"], "cancelled");
  assert!(!json["execution"]["finished_at"].is_null());

  let replay = harness
    .app
    .oneshot(post_json(
      &format!("/api/v1/executions/{}/cancel", execution.id),
      serde_json::json!({}),
    ))
    .await
    .unwrap();
  assert_eq!(replay.status(), StatusCode::UNPROCESSABLE_ENTITY);
  let json = body_json(replay).await;
  assert_eq!(json["message"], "This execution cannot be cancelled.");
}

#[tokio::test]
async fn retry_creates_a_child_and_enqueues_dispatch() {
  let mut harness = test_app().await;
  let workflow_id = seed_workflow(&harness.store).await;
  let (execution, job) = seed_running_job(&harness.store, workflow_id, "job-1").await;

  // a failed terminal callback makes the execution retryable
  harness
    .app
    .clone()
    .oneshot(post_json(
      "/api/v1/jobs/callback",
      serde_json::json!({
        "job_id": job.job_id,
        "callback_token": job.callback_token,
        "execution_id": execution.id,
        "status": "failed",
        "error": {"message": "engine crashed"},
      }),
    ))
    .await
    .unwrap();

  let response = harness
    .app
    .clone()
    .oneshot(post_json(
      &format!("/api/v1/executions/{}/retry", execution.id),
      serde_json::json!({}),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::CREATED);
  let json = body_json(response).await;
  let child_id = json["execution"]["id"].as_i64().unwrap();
  assert_eq!(json["execution"]["attempt"], 2);
  assert_eq!(json["execution"]["parent_execution_id"], execution.id);
  assert_eq!(json["execution"]["status"], "pending");

  let request = harness.dispatched.recv().await.unwrap();
  assert_eq!(request.execution_id, child_id);

  // retrying the completed child's parent again: parent is still failed and
  // may retry once more, but a pending child cannot be retried
  let response = harness
    .app
    .oneshot(post_json(
      &format!("/api/v1/executions/{child_id}/retry"),
      serde_json::json!({}),
    ))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
  let json = body_json(response).await;
  assert_eq!(json["message"], "This execution cannot be retried.");
}
