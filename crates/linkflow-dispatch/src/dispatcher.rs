use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{error, info, instrument, warn};

use linkflow_queue::JobChannel;
use linkflow_secrets::SecretCipher;
use linkflow_store::{Store, StoreError};
use linkflow_types::{Execution, ExecutionStatus, JobStatus, Workflow, partition};

use crate::error::DispatchError;
use crate::message::{CredentialPayload, JobMessage, WorkflowGraph};

/// Dispatcher configuration. Backoff values follow the original delivery
/// policy: three attempts spaced 10 s, 60 s, 300 s apart.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
  /// Number of partitioned job channels.
  pub partitions: u32,
  /// Absolute URL the engine posts terminal callbacks to.
  pub callback_url: String,
  /// Absolute URL the engine posts progress updates to.
  pub progress_url: String,
  /// Maximum channel publish attempts before the job is failed.
  pub publish_attempts: u32,
  /// Delay before each retry attempt; the last entry repeats if attempts
  /// outnumber entries.
  pub publish_backoff: Vec<Duration>,
  /// Hard timeout for a single publish attempt.
  pub publish_timeout: Duration,
}

impl Default for DispatchConfig {
  fn default() -> Self {
    Self {
      partitions: 16,
      callback_url: "http://localhost:8080/api/v1/jobs/callback".to_string(),
      progress_url: "http://localhost:8080/api/v1/jobs/progress".to_string(),
      publish_attempts: 3,
      publish_backoff: vec![
        Duration::from_secs(10),
        Duration::from_secs(60),
        Duration::from_secs(300),
      ],
      publish_timeout: Duration::from_secs(30),
    }
  }
}

/// What a successful dispatch hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
  pub job_id: String,
  pub execution_id: i64,
  pub partition: u32,
}

/// Turns pending executions into published jobs.
///
/// Safe under concurrent invocation for different executions; concurrent
/// dispatch of the same execution collapses onto one job via the store's
/// uniqueness guarantee.
pub struct Dispatcher<S, C> {
  store: S,
  channel: C,
  cipher: Arc<dyn SecretCipher>,
  config: DispatchConfig,
}

impl<S, C> Dispatcher<S, C>
where
  S: Store + Send + Sync,
  C: JobChannel,
{
  pub fn new(store: S, channel: C, cipher: Arc<dyn SecretCipher>, config: DispatchConfig) -> Self {
    Self {
      store,
      channel,
      cipher,
      config,
    }
  }

  /// Load the workflow and execution by id, then dispatch.
  pub async fn dispatch_by_ids(
    &self,
    workflow_id: i64,
    execution_id: i64,
    priority: &str,
  ) -> Result<DispatchReceipt, DispatchError> {
    let workflow = self
      .store
      .get_workflow(workflow_id)
      .await?
      .ok_or(DispatchError::WorkflowNotFound { workflow_id })?;
    let execution = self
      .store
      .get_execution(execution_id)
      .await?
      .ok_or(DispatchError::ExecutionNotFound { execution_id })?;

    self.dispatch(&workflow, &execution, priority).await
  }

  /// Dispatch one pending execution of the given workflow.
  #[instrument(
    name = "dispatch",
    skip(self, workflow, execution),
    fields(
      workflow_id = %workflow.id,
      execution_id = %execution.id,
    )
  )]
  pub async fn dispatch(
    &self,
    workflow: &Workflow,
    execution: &Execution,
    priority: &str,
  ) -> Result<DispatchReceipt, DispatchError> {
    self.validate(workflow, execution)?;

    let job_id = uuid::Uuid::new_v4().to_string();
    let callback_token = generate_callback_token();
    let target = partition(workflow.workspace_id, self.config.partitions);

    // Persisting the job first makes the unique execution_id index the dedup
    // gate: a racing dispatch for the same execution fails right here.
    let job = JobStatus::new_pending(job_id.clone(), execution.id, target, callback_token.clone());
    match self.store.create_job(&job).await {
      Ok(()) => {}
      Err(StoreError::DuplicateJob { execution_id }) => {
        return Err(DispatchError::AlreadyDispatched { execution_id });
      }
      Err(e) => return Err(e.into()),
    }

    let message = self
      .build_message(workflow, execution, priority, &job_id, &callback_token, target)
      .await?;
    let payload = serde_json::to_string(&message)?;

    if let Err(publish_error) = self.publish_with_retry(target, payload).await {
      self
        .store
        .fail_dispatch(
          &job_id,
          serde_json::json!({
            "message": publish_error,
            "attempts": self.config.publish_attempts,
          }),
        )
        .await?;
      error!(job_id = %job_id, error = %publish_error, "dispatch failed, job and execution marked failed");
      return Err(DispatchError::PublishExhausted {
        attempts: self.config.publish_attempts,
        message: publish_error,
      });
    }

    self.store.mark_job_dispatched(&job_id).await?;

    info!(job_id = %job_id, partition = target, "job published");
    Ok(DispatchReceipt {
      job_id,
      execution_id: execution.id,
      partition: target,
    })
  }

  fn validate(&self, workflow: &Workflow, execution: &Execution) -> Result<(), DispatchError> {
    if execution.workflow_id != workflow.id {
      return Err(DispatchError::WorkflowMismatch {
        workflow_id: workflow.id,
        execution_id: execution.id,
      });
    }
    if !workflow.is_active {
      return Err(DispatchError::WorkflowInactive {
        workflow_id: workflow.id,
      });
    }
    if !workflow.has_nodes() {
      return Err(DispatchError::WorkflowEmpty {
        workflow_id: workflow.id,
      });
    }
    if execution.status != ExecutionStatus::Pending {
      return Err(DispatchError::ExecutionNotPending {
        execution_id: execution.id,
        status: execution.status,
      });
    }
    Ok(())
  }

  async fn build_message(
    &self,
    workflow: &Workflow,
    execution: &Execution,
    priority: &str,
    job_id: &str,
    callback_token: &str,
    target: u32,
  ) -> Result<JobMessage, DispatchError> {
    Ok(JobMessage {
      job_id: job_id.to_string(),
      callback_token: callback_token.to_string(),
      execution_id: execution.id,
      workflow_id: workflow.id,
      workspace_id: workflow.workspace_id,
      partition: target,
      priority: priority.to_string(),
      workflow: WorkflowGraph {
        nodes: workflow.nodes.0.clone(),
        edges: workflow.edges.0.clone(),
        settings: workflow.settings.0.clone(),
      },
      trigger_data: execution
        .trigger_data
        .as_ref()
        .map(|d| d.0.clone())
        .unwrap_or(serde_json::Value::Null),
      credentials: self.resolve_credentials(workflow).await?,
      variables: self.resolve_variables(workflow.workspace_id).await?,
      callback_url: self.config.callback_url.clone(),
      progress_url: self.config.progress_url.clone(),
      created_at: Utc::now(),
    })
  }

  /// Decrypt exactly the credentials the workflow's nodes reference, never
  /// the workspace's full credential set.
  async fn resolve_credentials(
    &self,
    workflow: &Workflow,
  ) -> Result<BTreeMap<String, CredentialPayload>, DispatchError> {
    let ids = workflow.credential_ids();
    if ids.is_empty() {
      return Ok(BTreeMap::new());
    }

    let mut resolved = BTreeMap::new();
    for credential in self
      .store
      .credentials_by_ids(workflow.workspace_id, &ids)
      .await?
    {
      let plaintext = self.cipher.decrypt(&credential.data)?;
      let data =
        serde_json::from_str(&plaintext).unwrap_or(serde_json::Value::String(plaintext));
      resolved.insert(
        credential.id.to_string(),
        CredentialPayload {
          credential_type: credential.credential_type,
          data,
        },
      );
    }
    Ok(resolved)
  }

  async fn resolve_variables(
    &self,
    workspace_id: i64,
  ) -> Result<BTreeMap<String, serde_json::Value>, DispatchError> {
    let mut resolved = BTreeMap::new();
    for variable in self.store.variables_for_workspace(workspace_id).await? {
      let value = if variable.is_secret {
        self.cipher.decrypt(&variable.value)?
      } else {
        variable.value
      };
      resolved.insert(variable.key, serde_json::Value::String(value));
    }
    Ok(resolved)
  }

  /// Publish with bounded attempts and increasing backoff. Returns the last
  /// failure message when every attempt is spent.
  async fn publish_with_retry(&self, target: u32, payload: String) -> Result<(), String> {
    let mut last_error = String::from("no publish attempts configured");

    for attempt in 0..self.config.publish_attempts.max(1) {
      if attempt > 0 {
        let delay = self
          .config
          .publish_backoff
          .get(attempt as usize - 1)
          .or(self.config.publish_backoff.last())
          .copied()
          .unwrap_or(Duration::ZERO);
        tokio::time::sleep(delay).await;
      }

      match tokio::time::timeout(
        self.config.publish_timeout,
        self.channel.append(target, payload.clone()),
      )
      .await
      {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => {
          warn!(partition = target, attempt, error = %e, "channel publish attempt failed");
          last_error = e.to_string();
        }
        Err(_) => {
          warn!(partition = target, attempt, "channel publish attempt timed out");
          last_error = format!(
            "publish timed out after {} ms",
            self.config.publish_timeout.as_millis()
          );
        }
      }
    }

    Err(last_error)
  }
}

/// 32 bytes from the OS CSPRNG, hex-encoded: the 64-char secret the engine
/// must echo on every callback. Generated once per job, never regenerated.
fn generate_callback_token() -> String {
  let mut bytes = [0u8; 32];
  OsRng.fill_bytes(&mut bytes);
  hex::encode(bytes)
}
