//! strata-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered under
//! `STRATA_*` environment variables, opens the SQLite content store, starts
//! the migration workers, and serves the migration API over HTTP.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use strata_core::search::NullIndex;
use strata_migrate::{MigrationRegistry, Migrator, spawn_workers};
use strata_server::{ServerConfig, app, load_config};
use strata_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Strata schema migration server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let server_cfg: ServerConfig = load_config(config::File::from(cli.config).required(false))
    .context("failed to load configuration")?;

  let store_path = server_cfg.resolved_store_path();
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let registry = Arc::new(MigrationRegistry::new(server_cfg.migration.history_capacity));
  let migrator = Migrator::new(
    Arc::new(store),
    Arc::new(NullIndex),
    registry,
    server_cfg.migration.clone(),
    server_cfg.node_name.clone(),
  );
  let (handle, _workers) = spawn_workers(migrator);

  let address = server_cfg.address();
  tracing::info!(node = %server_cfg.node_name, "Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app(handle))
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .context("server error")?;

  Ok(())
}
