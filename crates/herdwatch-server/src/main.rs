//! herdwatch server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered with
//! `HERDWATCH_*` environment variables, opens the SQLite store, and runs the
//! monitoring loop alongside the REST API until SIGINT or SIGTERM.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use herdwatch_api::ApiState;
use herdwatch_engine::{
  Drive, MonitoringLoop, UpdateFeed,
  transport::{FallbackTransport, LogTransport},
};
use herdwatch_server::{HttpPushTransport, ServerConfig, shutdown};
use herdwatch_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "herdwatch alert server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Override the configured driver: polled, reactive or both.
  #[arg(long)]
  drive: Option<Drive>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let mut server_cfg = ServerConfig::load(
    config::Config::builder().add_source(config::File::from(cli.config).required(false)),
  )
  .context("failed to load configuration")?;
  if let Some(drive) = cli.drive {
    server_cfg.drive = drive;
  }

  // Open SQLite store.
  let store = match server_cfg.resolved_store_path() {
    Some(path) => SqliteStore::open(&path)
      .await
      .with_context(|| format!("failed to open store at {path:?}"))?,
    None => {
      tracing::warn!("using an in-memory store; nothing will persist");
      SqliteStore::open_in_memory()
        .await
        .context("failed to open in-memory store")?
    }
  };

  // Push first, log as the fallback.
  let push = HttpPushTransport::new(
    std::time::Duration::from_millis(server_cfg.push_timeout_ms),
    server_cfg.broadcast_url.clone(),
  )
  .context("failed to build HTTP client")?;
  let transport = FallbackTransport::new(push, LogTransport);

  let monitor = Arc::new(
    MonitoringLoop::new(Arc::new(store), Arc::new(transport), server_cfg.engine.clone())
      .context("invalid engine configuration")?,
  );
  let feed = UpdateFeed::default();
  let token = shutdown::shutdown_token();

  let monitor_task = tokio::spawn({
    let monitor = monitor.clone();
    let feed = feed.clone();
    let token = token.clone();
    let drive = server_cfg.drive;
    async move { monitor.run(drive, &feed, token).await }
  });

  let app = herdwatch_api::app(ApiState::new(monitor, feed)).layer(TraceLayer::new_for_http());
  let address = server_cfg.address();

  tracing::info!(drive = %server_cfg.drive, "Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  let served = axum::serve(listener, app)
    .with_graceful_shutdown({
      let token = token.clone();
      async move { token.cancelled().await }
    })
    .await;

  // The loop finishes its in-flight cycle before returning.
  token.cancel();
  monitor_task.await.context("monitoring loop panicked")?;
  served.context("server error")?;

  tracing::info!("shut down cleanly");
  Ok(())
}
