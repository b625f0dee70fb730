//! Linkflow Store
//!
//! This crate provides the persistence port for the coordination layer and
//! its SQLite implementation. The [`Store`] trait exposes transactional
//! read-modify-write operations over executions, job records, node snapshots,
//! and logs.
//!
//! Dispatch and callback handling run in different processes, so all
//! cross-request coordination goes through the store's atomicity. Most
//! importantly, [`Store::finalize_job`], whose idempotency check is evaluated
//! inside the same transaction that mutates state.

mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::{FinalizeOutcome, NodeReport, ProgressOutcome, TerminalReport, TerminalStatus};

use linkflow_types::{
  Credential, Execution, ExecutionLog, ExecutionNode, JobStatus, TransitionError, Variable,
  Webhook, Workflow,
};

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  /// A job already exists for this execution (dispatch dedup key hit).
  #[error("job already dispatched for execution {execution_id}")]
  DuplicateJob { execution_id: i64 },

  /// No job row with this id.
  #[error("job not found: {job_id}")]
  JobNotFound { job_id: String },

  /// No execution row with this id.
  #[error("execution not found: {execution_id}")]
  ExecutionNotFound { execution_id: i64 },

  /// An entity-level lifecycle rule rejected the mutation.
  #[error(transparent)]
  Transition(#[from] TransitionError),

  /// Underlying database failure.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Persistence port for the coordination layer.
pub trait Store {
  /// Insert a pending execution and return it with its assigned id.
  fn create_execution(
    &self,
    execution: &Execution,
  ) -> impl std::future::Future<Output = Result<Execution, StoreError>> + Send;

  /// Fetch an execution by id.
  fn get_execution(
    &self,
    execution_id: i64,
  ) -> impl std::future::Future<Output = Result<Option<Execution>, StoreError>> + Send;

  /// Cancel an active execution (read-modify-write in one transaction).
  fn cancel_execution(
    &self,
    execution_id: i64,
  ) -> impl std::future::Future<Output = Result<Execution, StoreError>> + Send;

  /// Create the retry child of a failed execution. The parent is never
  /// mutated; the child comes back with its assigned id.
  fn retry_execution(
    &self,
    execution_id: i64,
    triggered_by: Option<i64>,
    ip_address: Option<String>,
    user_agent: Option<String>,
  ) -> impl std::future::Future<Output = Result<Execution, StoreError>> + Send;

  /// Insert a pending job record. Fails with [`StoreError::DuplicateJob`]
  /// when a job already exists for the execution.
  fn create_job(
    &self,
    job: &JobStatus,
  ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

  /// Fetch a job record by job id.
  fn get_job(
    &self,
    job_id: &str,
  ) -> impl std::future::Future<Output = Result<Option<JobStatus>, StoreError>> + Send;

  /// After a successful channel append: job → processing, execution →
  /// running. One transaction so a crash cannot leave the pair split.
  fn mark_job_dispatched(
    &self,
    job_id: &str,
  ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

  /// After exhausted dispatch attempts: job and execution both → failed with
  /// the diagnostic error, in one transaction. No-op if already terminal.
  fn fail_dispatch(
    &self,
    job_id: &str,
    error: serde_json::Value,
  ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

  /// Apply a terminal callback: upsert node snapshots, append logs, finalize
  /// the execution and the job, all in one transaction. Re-checks the job's
  /// terminal state inside that transaction and reports an idempotent replay
  /// without mutating anything.
  fn finalize_job(
    &self,
    job_id: &str,
    report: &TerminalReport,
  ) -> impl std::future::Future<Output = Result<FinalizeOutcome, StoreError>> + Send;

  /// Record an advisory progress value, unless the job is already terminal.
  fn record_progress(
    &self,
    job_id: &str,
    progress: i32,
  ) -> impl std::future::Future<Output = Result<ProgressOutcome, StoreError>> + Send;

  /// Fetch a workflow definition by id.
  fn get_workflow(
    &self,
    workflow_id: i64,
  ) -> impl std::future::Future<Output = Result<Option<Workflow>, StoreError>> + Send;

  /// Fetch an active webhook by public uuid. Inactive webhooks are invisible.
  fn get_active_webhook(
    &self,
    uuid: &str,
  ) -> impl std::future::Future<Output = Result<Option<Webhook>, StoreError>> + Send;

  /// Bump a webhook's call counter.
  fn increment_webhook_calls(
    &self,
    webhook_id: i64,
  ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

  /// Fetch the given credentials, scoped to a workspace.
  fn credentials_by_ids(
    &self,
    workspace_id: i64,
    ids: &[i64],
  ) -> impl std::future::Future<Output = Result<Vec<Credential>, StoreError>> + Send;

  /// Fetch all variables of a workspace.
  fn variables_for_workspace(
    &self,
    workspace_id: i64,
  ) -> impl std::future::Future<Output = Result<Vec<Variable>, StoreError>> + Send;

  /// Node snapshots for an execution, ordered by sequence.
  fn nodes_for_execution(
    &self,
    execution_id: i64,
  ) -> impl std::future::Future<Output = Result<Vec<ExecutionNode>, StoreError>> + Send;

  /// Log lines for an execution, ordered by logged_at.
  fn logs_for_execution(
    &self,
    execution_id: i64,
  ) -> impl std::future::Future<Output = Result<Vec<ExecutionLog>, StoreError>> + Send;
}
