use chrono::Utc;
use sqlx::sqlite::SqliteQueryResult;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use tracing::instrument;

use linkflow_types::{
  Credential, Execution, ExecutionLog, ExecutionNode, JobStatus, LogLevel, NodeRunStatus,
  Variable, Webhook, Workflow,
};

use crate::types::{FinalizeOutcome, NodeReport, ProgressOutcome, TerminalReport, TerminalStatus};
use crate::{Store, StoreError};

/// SQLite-based store implementation.
#[derive(Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }

  /// Access the underlying pool (seeding, ad-hoc queries).
  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }

  async fn fetch_execution(
    tx: &mut Transaction<'_, Sqlite>,
    execution_id: i64,
  ) -> Result<Execution, StoreError> {
    sqlx::query_as(&format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?"))
      .bind(execution_id)
      .fetch_optional(&mut **tx)
      .await?
      .ok_or(StoreError::ExecutionNotFound { execution_id })
  }

  async fn fetch_job(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: &str,
  ) -> Result<JobStatus, StoreError> {
    sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM job_status WHERE job_id = ?"))
      .bind(job_id)
      .fetch_optional(&mut **tx)
      .await?
      .ok_or_else(|| StoreError::JobNotFound {
        job_id: job_id.to_string(),
      })
  }

  async fn write_execution(
    tx: &mut Transaction<'_, Sqlite>,
    execution: &Execution,
  ) -> Result<SqliteQueryResult, sqlx::Error> {
    sqlx::query(
      r#"
            UPDATE executions
            SET status = ?, result_data = ?, error = ?, started_at = ?, finished_at = ?,
                duration_ms = ?
            WHERE id = ?
            "#,
    )
    .bind(execution.status)
    .bind(&execution.result_data)
    .bind(&execution.error)
    .bind(execution.started_at)
    .bind(execution.finished_at)
    .bind(execution.duration_ms)
    .bind(execution.id)
    .execute(&mut **tx)
    .await
  }

  async fn write_job(
    tx: &mut Transaction<'_, Sqlite>,
    job: &JobStatus,
  ) -> Result<SqliteQueryResult, sqlx::Error> {
    sqlx::query(
      r#"
            UPDATE job_status
            SET status = ?, progress = ?, started_at = ?, result = ?, error = ?
            WHERE job_id = ?
            "#,
    )
    .bind(job.status)
    .bind(job.progress)
    .bind(job.started_at)
    .bind(&job.result)
    .bind(&job.error)
    .bind(&job.job_id)
    .execute(&mut **tx)
    .await
  }

  /// Upsert one node snapshot and append its log line.
  async fn apply_node_report(
    tx: &mut Transaction<'_, Sqlite>,
    execution_id: i64,
    node: &NodeReport,
  ) -> Result<(), StoreError> {
    let node_row_id: i64 = sqlx::query_scalar(
      r#"
            INSERT INTO execution_nodes
                (execution_id, node_id, node_type, node_name, status, output_data, error,
                 started_at, finished_at, sequence)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (execution_id, node_id) DO UPDATE SET
                node_type = excluded.node_type,
                node_name = excluded.node_name,
                status = excluded.status,
                output_data = excluded.output_data,
                error = excluded.error,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                sequence = excluded.sequence
            RETURNING id
            "#,
    )
    .bind(execution_id)
    .bind(&node.node_id)
    .bind(&node.node_type)
    .bind(&node.node_name)
    .bind(node.status)
    .bind(node.output.as_ref().map(|o| Json(o.clone())))
    .bind(node.error.as_ref().map(|e| Json(e.clone())))
    .bind(node.started_at)
    .bind(node.completed_at)
    .bind(node.sequence.unwrap_or(0))
    .fetch_one(&mut **tx)
    .await?;

    let node_name = node.node_name.as_deref().unwrap_or(&node.node_id);
    let (level, message, context, logged_at) = if node.status == NodeRunStatus::Failed {
      let detail = node
        .error
        .as_ref()
        .and_then(|e| e["message"].as_str())
        .unwrap_or("Unknown error");
      (
        LogLevel::Error,
        format!("Node '{node_name}' failed: {detail}"),
        node.error.as_ref().map(|e| Json(e.clone())),
        node.completed_at.unwrap_or_else(Utc::now),
      )
    } else {
      (
        LogLevel::Info,
        format!(
          "Node '{node_name}' ({}) {}",
          node.node_type,
          node.status.as_str()
        ),
        None,
        node
          .completed_at
          .or(node.started_at)
          .unwrap_or_else(Utc::now),
      )
    };

    sqlx::query(
      r#"
            INSERT INTO execution_logs (execution_id, execution_node_id, level, message, context, logged_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(execution_id)
    .bind(node_row_id)
    .bind(level)
    .bind(&message)
    .bind(context)
    .bind(logged_at)
    .execute(&mut **tx)
    .await?;

    Ok(())
  }
}

const EXECUTION_COLUMNS: &str = "id, workflow_id, workspace_id, status, mode, trigger_data, \
     result_data, error, started_at, finished_at, duration_ms, attempt, max_attempts, \
     parent_execution_id, triggered_by, ip_address, user_agent, created_at";

const JOB_COLUMNS: &str = "job_id, execution_id, \"partition\", callback_token, status, progress, \
     started_at, result, error, created_at";

impl Store for SqliteStore {
  async fn create_execution(&self, execution: &Execution) -> Result<Execution, StoreError> {
    let id: i64 = sqlx::query_scalar(
      r#"
            INSERT INTO executions
                (workflow_id, workspace_id, status, mode, trigger_data, result_data, error,
                 started_at, finished_at, duration_ms, attempt, max_attempts,
                 parent_execution_id, triggered_by, ip_address, user_agent, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
    )
    .bind(execution.workflow_id)
    .bind(execution.workspace_id)
    .bind(execution.status)
    .bind(execution.mode)
    .bind(&execution.trigger_data)
    .bind(&execution.result_data)
    .bind(&execution.error)
    .bind(execution.started_at)
    .bind(execution.finished_at)
    .bind(execution.duration_ms)
    .bind(execution.attempt)
    .bind(execution.max_attempts)
    .bind(execution.parent_execution_id)
    .bind(execution.triggered_by)
    .bind(&execution.ip_address)
    .bind(&execution.user_agent)
    .bind(execution.created_at)
    .fetch_one(&self.pool)
    .await?;

    let mut created = execution.clone();
    created.id = id;
    Ok(created)
  }

  async fn get_execution(&self, execution_id: i64) -> Result<Option<Execution>, StoreError> {
    Ok(
      sqlx::query_as(&format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?"))
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn cancel_execution(&self, execution_id: i64) -> Result<Execution, StoreError> {
    let mut tx = self.pool.begin().await?;
    let mut execution = Self::fetch_execution(&mut tx, execution_id).await?;
    execution.cancel()?;
    Self::write_execution(&mut tx, &execution).await?;
    tx.commit().await?;
    Ok(execution)
  }

  async fn retry_execution(
    &self,
    execution_id: i64,
    triggered_by: Option<i64>,
    ip_address: Option<String>,
    user_agent: Option<String>,
  ) -> Result<Execution, StoreError> {
    let mut tx = self.pool.begin().await?;
    let parent = Self::fetch_execution(&mut tx, execution_id).await?;
    let child = parent.retry(triggered_by, ip_address, user_agent)?;

    let id: i64 = sqlx::query_scalar(
      r#"
            INSERT INTO executions
                (workflow_id, workspace_id, status, mode, trigger_data, attempt, max_attempts,
                 parent_execution_id, triggered_by, ip_address, user_agent, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
    )
    .bind(child.workflow_id)
    .bind(child.workspace_id)
    .bind(child.status)
    .bind(child.mode)
    .bind(&child.trigger_data)
    .bind(child.attempt)
    .bind(child.max_attempts)
    .bind(child.parent_execution_id)
    .bind(child.triggered_by)
    .bind(&child.ip_address)
    .bind(&child.user_agent)
    .bind(child.created_at)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    let mut child = child;
    child.id = id;
    Ok(child)
  }

  async fn create_job(&self, job: &JobStatus) -> Result<(), StoreError> {
    let result = sqlx::query(
      r#"
            INSERT INTO job_status
                (job_id, execution_id, "partition", callback_token, status, progress,
                 started_at, result, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&job.job_id)
    .bind(job.execution_id)
    .bind(job.partition)
    .bind(&job.callback_token)
    .bind(job.status)
    .bind(job.progress)
    .bind(job.started_at)
    .bind(&job.result)
    .bind(&job.error)
    .bind(job.created_at)
    .execute(&self.pool)
    .await;

    match result {
      Ok(_) => Ok(()),
      Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
        Err(StoreError::DuplicateJob {
          execution_id: job.execution_id,
        })
      }
      Err(e) => Err(e.into()),
    }
  }

  async fn get_job(&self, job_id: &str) -> Result<Option<JobStatus>, StoreError> {
    Ok(
      sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM job_status WHERE job_id = ?"))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?,
    )
  }

  async fn mark_job_dispatched(&self, job_id: &str) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;

    let mut job = Self::fetch_job(&mut tx, job_id).await?;
    job.mark_processing();
    Self::write_job(&mut tx, &job).await?;

    let mut execution = Self::fetch_execution(&mut tx, job.execution_id).await?;
    execution.start()?;
    Self::write_execution(&mut tx, &execution).await?;

    tx.commit().await?;
    Ok(())
  }

  #[instrument(skip(self, error), fields(job_id = %job_id))]
  async fn fail_dispatch(&self, job_id: &str, error: serde_json::Value) -> Result<(), StoreError> {
    let mut tx = self.pool.begin().await?;

    let mut job = Self::fetch_job(&mut tx, job_id).await?;
    if job.is_terminal() {
      return Ok(());
    }
    job.mark_failed(error.clone());
    Self::write_job(&mut tx, &job).await?;

    let mut execution = Self::fetch_execution(&mut tx, job.execution_id).await?;
    if !execution.status.is_terminal() {
      execution.fail(error, None)?;
      Self::write_execution(&mut tx, &execution).await?;
    }

    tx.commit().await?;
    Ok(())
  }

  #[instrument(skip(self, report), fields(job_id = %job_id))]
  async fn finalize_job(
    &self,
    job_id: &str,
    report: &TerminalReport,
  ) -> Result<FinalizeOutcome, StoreError> {
    let mut tx = self.pool.begin().await?;

    // The authoritative idempotency check: re-read inside the transaction
    // that would mutate, so a racing duplicate callback cannot also win.
    let mut job = Self::fetch_job(&mut tx, job_id).await?;
    if job.is_terminal() {
      return Ok(FinalizeOutcome::Idempotent {
        execution_id: job.execution_id,
        status: job.status,
      });
    }

    let mut execution = Self::fetch_execution(&mut tx, job.execution_id).await?;

    // Execution finalized out-of-band (an explicit cancel racing the engine):
    // leave it untouched, close out the job so replays ack as idempotent.
    if execution.status.is_terminal() {
      match report.status {
        TerminalStatus::Completed => job.mark_completed(None),
        TerminalStatus::Failed => job.mark_failed(
          report
            .error
            .clone()
            .unwrap_or_else(|| serde_json::json!({"message": "Unknown error"})),
        ),
      }
      Self::write_job(&mut tx, &job).await?;
      tx.commit().await?;
      return Ok(FinalizeOutcome::Applied {
        execution_id: execution.id,
        status: job.status,
      });
    }

    for node in &report.nodes {
      Self::apply_node_report(&mut tx, execution.id, node).await?;
    }

    let started_hint = report
      .nodes
      .first()
      .and_then(|n| n.started_at)
      .unwrap_or_else(Utc::now);
    execution.ensure_started(started_hint);

    match report.status {
      TerminalStatus::Completed => {
        execution.complete(None, report.duration_ms)?;
        job.mark_completed(Some(serde_json::json!({
          "duration_ms": report.duration_ms,
          "nodes_count": report.nodes.len(),
        })));
      }
      TerminalStatus::Failed => {
        let error = report
          .error
          .clone()
          .unwrap_or_else(|| serde_json::json!({"message": "Unknown error"}));
        execution.fail(error.clone(), report.duration_ms)?;
        job.mark_failed(error);
      }
    }
    if let Some(error) = report.error.clone() {
      execution.error = Some(Json(error));
    }

    Self::write_execution(&mut tx, &execution).await?;
    Self::write_job(&mut tx, &job).await?;

    tx.commit().await?;
    Ok(FinalizeOutcome::Applied {
      execution_id: execution.id,
      status: job.status,
    })
  }

  async fn record_progress(
    &self,
    job_id: &str,
    progress: i32,
  ) -> Result<ProgressOutcome, StoreError> {
    let mut tx = self.pool.begin().await?;

    let mut job = Self::fetch_job(&mut tx, job_id).await?;
    if job.is_terminal() {
      return Ok(ProgressOutcome::Idempotent);
    }

    job.update_progress(progress);
    Self::write_job(&mut tx, &job).await?;
    tx.commit().await?;
    Ok(ProgressOutcome::Applied)
  }

  async fn get_workflow(&self, workflow_id: i64) -> Result<Option<Workflow>, StoreError> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT id, workspace_id, name, is_active, nodes, edges, settings
            FROM workflows
            WHERE id = ?
            "#,
      )
      .bind(workflow_id)
      .fetch_optional(&self.pool)
      .await?,
    )
  }

  async fn get_active_webhook(&self, uuid: &str) -> Result<Option<Webhook>, StoreError> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT id, workflow_id, workspace_id, uuid, path, is_active, methods, auth_type,
                   auth_config, rate_limit, response_status, response_body, call_count
            FROM webhooks
            WHERE uuid = ? AND is_active = TRUE
            "#,
      )
      .bind(uuid)
      .fetch_optional(&self.pool)
      .await?,
    )
  }

  async fn increment_webhook_calls(&self, webhook_id: i64) -> Result<(), StoreError> {
    sqlx::query("UPDATE webhooks SET call_count = call_count + 1 WHERE id = ?")
      .bind(webhook_id)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  async fn credentials_by_ids(
    &self,
    workspace_id: i64,
    ids: &[i64],
  ) -> Result<Vec<Credential>, StoreError> {
    if ids.is_empty() {
      return Ok(Vec::new());
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
      "SELECT id, workspace_id, name, credential_type, data FROM credentials WHERE workspace_id = ",
    );
    builder.push_bind(workspace_id);
    builder.push(" AND id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
      separated.push_bind(id);
    }
    separated.push_unseparated(")");

    Ok(builder.build_query_as().fetch_all(&self.pool).await?)
  }

  async fn variables_for_workspace(&self, workspace_id: i64) -> Result<Vec<Variable>, StoreError> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT id, workspace_id, key, value, is_secret
            FROM variables
            WHERE workspace_id = ?
            ORDER BY key ASC
            "#,
      )
      .bind(workspace_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }

  async fn nodes_for_execution(&self, execution_id: i64) -> Result<Vec<ExecutionNode>, StoreError> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT id, execution_id, node_id, node_type, node_name, status, output_data, error,
                   started_at, finished_at, sequence
            FROM execution_nodes
            WHERE execution_id = ?
            ORDER BY sequence ASC
            "#,
      )
      .bind(execution_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }

  async fn logs_for_execution(&self, execution_id: i64) -> Result<Vec<ExecutionLog>, StoreError> {
    Ok(
      sqlx::query_as(
        r#"
            SELECT id, execution_id, execution_node_id, level, message, context, logged_at
            FROM execution_logs
            WHERE execution_id = ?
            ORDER BY logged_at ASC, id ASC
            "#,
      )
      .bind(execution_id)
      .fetch_all(&self.pool)
      .await?,
    )
  }
}
