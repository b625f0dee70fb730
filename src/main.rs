use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use linkflow_dispatch::{DispatchConfig, Dispatcher, run_worker};
use linkflow_queue::InMemoryJobChannel;
use linkflow_secrets::AesGcmCipher;
use linkflow_server::{AllowAll, AppState, FixedWindowLimiter, router};
use linkflow_store::SqliteStore;

/// Linkflow - workflow execution coordination layer
#[derive(Parser)]
#[command(name = "linkflow")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the coordination API server
  Serve(ServeArgs),
  /// Run database migrations and exit
  Migrate {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://linkflow.db?mode=rwc")]
    database_url: String,
  },
}

#[derive(Args)]
struct ServeArgs {
  /// Address to bind the HTTP server to
  #[arg(long, env = "LINKFLOW_BIND", default_value = "127.0.0.1:8080")]
  bind: SocketAddr,

  /// Database connection string
  #[arg(long, env = "DATABASE_URL", default_value = "sqlite://linkflow.db?mode=rwc")]
  database_url: String,

  /// Number of partitioned job channels
  #[arg(long, env = "LINKFLOW_PARTITIONS", default_value_t = 16)]
  partitions: u32,

  /// Public base URL the engine uses for callbacks
  #[arg(long, env = "LINKFLOW_BASE_URL", default_value = "http://127.0.0.1:8080")]
  base_url: String,

  /// Key material for encrypted-at-rest secrets
  #[arg(long, env = "LINKFLOW_ENCRYPTION_KEY", hide_env_values = true)]
  encryption_key: String,

  /// Reject webhook calls whose auth config is missing or undecryptable
  /// instead of letting them through
  #[arg(long, env = "LINKFLOW_STRICT_WEBHOOK_AUTH", default_value_t = false)]
  strict_webhook_auth: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  match Cli::parse().command {
    Commands::Serve(args) => serve(args).await,
    Commands::Migrate { database_url } => {
      let store = open_store(&database_url).await?;
      store.migrate().await.context("migrations failed")?;
      info!("migrations applied");
      Ok(())
    }
  }
}

async fn open_store(database_url: &str) -> Result<SqliteStore> {
  let pool = SqlitePoolOptions::new()
    .max_connections(5)
    .acquire_timeout(Duration::from_secs(5))
    .connect(database_url)
    .await
    .with_context(|| format!("failed to connect to {database_url}"))?;
  Ok(SqliteStore::new(pool))
}

async fn serve(args: ServeArgs) -> Result<()> {
  let store = open_store(&args.database_url).await?;
  store.migrate().await.context("migrations failed")?;

  let cipher = Arc::new(AesGcmCipher::from_key_material(&args.encryption_key));

  // In-memory channels back local development; production deployments plug a
  // broker-backed JobChannel in here. Keep the receiver halves alive so
  // publishes succeed, and surface queued jobs in the logs.
  let (channel, receivers) = InMemoryJobChannel::new(args.partitions);
  for (partition, mut receiver) in receivers.into_iter().enumerate() {
    tokio::spawn(async move {
      while let Some(payload) = receiver.recv().await {
        debug!(partition, bytes = payload.len(), "job queued for engine");
      }
    });
  }

  let dispatch_config = DispatchConfig {
    partitions: args.partitions,
    callback_url: format!("{}/api/v1/jobs/callback", args.base_url),
    progress_url: format!("{}/api/v1/jobs/progress", args.base_url),
    ..DispatchConfig::default()
  };
  let dispatcher = Arc::new(Dispatcher::new(
    store.clone(),
    channel,
    cipher.clone(),
    dispatch_config,
  ));

  let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
  tokio::spawn(run_worker(dispatch_rx, dispatcher));

  let state = AppState {
    store,
    cipher,
    gate: Arc::new(AllowAll),
    limiter: Arc::new(FixedWindowLimiter::new(Duration::from_secs(60))),
    dispatch: dispatch_tx,
    strict_webhook_auth: args.strict_webhook_auth,
  };

  let listener = tokio::net::TcpListener::bind(args.bind)
    .await
    .with_context(|| format!("failed to bind {}", args.bind))?;
  info!(bind = %args.bind, partitions = args.partitions, "linkflow listening");

  axum::serve(
    listener,
    router(state).into_make_service_with_connect_info::<SocketAddr>(),
  )
  .with_graceful_shutdown(async {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
  })
  .await
  .context("server error")?;

  Ok(())
}
