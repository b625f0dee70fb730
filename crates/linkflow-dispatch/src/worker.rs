use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use linkflow_queue::JobChannel;
use linkflow_store::Store;

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;

/// A dispatch request handed off by the trigger gateway or the retry
/// endpoint. The worker owns loading the referenced rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
  pub workflow_id: i64,
  pub execution_id: i64,
  pub priority: String,
}

impl DispatchRequest {
  pub fn new(workflow_id: i64, execution_id: i64) -> Self {
    Self {
      workflow_id,
      execution_id,
      priority: "default".to_string(),
    }
  }
}

/// Consume dispatch requests until the sender side closes.
///
/// Dispatch failures are terminal on the execution itself (the dispatcher
/// marks both rows failed), so the worker only logs and moves on. Callers
/// observe the outcome through the store, never through this loop.
pub async fn run_worker<S, C>(
  mut requests: mpsc::UnboundedReceiver<DispatchRequest>,
  dispatcher: Arc<Dispatcher<S, C>>,
) where
  S: Store + Send + Sync,
  C: JobChannel,
{
  while let Some(request) = requests.recv().await {
    match dispatcher
      .dispatch_by_ids(request.workflow_id, request.execution_id, &request.priority)
      .await
    {
      Ok(receipt) => {
        info!(
          job_id = %receipt.job_id,
          execution_id = receipt.execution_id,
          partition = receipt.partition,
          "dispatched"
        );
      }
      Err(DispatchError::AlreadyDispatched { execution_id }) => {
        info!(execution_id, "dispatch request collapsed into existing job");
      }
      Err(e) => {
        error!(
          workflow_id = request.workflow_id,
          execution_id = request.execution_id,
          error = %e,
          "dispatch failed"
        );
      }
    }
  }
}
