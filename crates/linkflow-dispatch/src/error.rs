use linkflow_secrets::SecretError;
use linkflow_store::StoreError;
use linkflow_types::ExecutionStatus;

/// Errors that can occur while dispatching a workflow execution.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
  /// The workflow is not active.
  #[error("workflow {workflow_id} is not active")]
  WorkflowInactive { workflow_id: i64 },

  /// The workflow has no nodes to execute.
  #[error("workflow {workflow_id} has no nodes")]
  WorkflowEmpty { workflow_id: i64 },

  /// No workflow row with this id.
  #[error("workflow not found: {workflow_id}")]
  WorkflowNotFound { workflow_id: i64 },

  /// No execution row with this id.
  #[error("execution not found: {execution_id}")]
  ExecutionNotFound { execution_id: i64 },

  /// The execution does not belong to the workflow being dispatched.
  #[error("execution {execution_id} does not belong to workflow {workflow_id}")]
  WorkflowMismatch {
    workflow_id: i64,
    execution_id: i64,
  },

  /// The execution is not pending (already dispatched, finalized, or cancelled).
  #[error("execution {execution_id} is not pending (status {status:?})")]
  ExecutionNotPending {
    execution_id: i64,
    status: ExecutionStatus,
  },

  /// A job already exists for this execution; racing dispatch calls collapse here.
  #[error("execution {execution_id} already has a dispatched job")]
  AlreadyDispatched { execution_id: i64 },

  /// Credential or variable decryption failed.
  #[error("secret resolution failed: {0}")]
  Secrets(#[from] SecretError),

  /// Failed to serialize the job message.
  #[error("failed to serialize job message: {0}")]
  Serialize(#[from] serde_json::Error),

  /// All channel publish attempts failed; both rows were marked failed.
  #[error("channel publish failed after {attempts} attempts: {message}")]
  PublishExhausted { attempts: u32, message: String },

  /// Storage error.
  #[error(transparent)]
  Store(#[from] StoreError),
}
