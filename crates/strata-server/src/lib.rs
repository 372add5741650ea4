//! Wiring for the Strata server binary.
//!
//! Holds the deserialised [`ServerConfig`], the layered config loader, and the
//! top-level [`app`] router. `main.rs` only opens the store and binds.

use std::path::{Path, PathBuf};

use axum::Router;
use serde::Deserialize;
use strata_migrate::{MigrationConfig, MigrationHandle};
use tower_http::trace::TraceLayer;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `STRATA_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub host:       String,
  pub port:       u16,
  pub store_path: PathBuf,
  /// Recorded on every run in the status history.
  pub node_name:  String,
  pub migration:  MigrationConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:       "127.0.0.1".to_owned(),
      port:       8080,
      store_path: PathBuf::from("strata.db"),
      node_name:  "strata".to_owned(),
      migration:  MigrationConfig::default(),
    }
  }
}

impl ServerConfig {
  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }

  /// `store_path` with a leading `~` expanded to the user's home directory.
  pub fn resolved_store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }
}

/// Layer `file` under the environment and deserialise the result.
///
/// Environment keys take the form `STRATA_PORT` or
/// `STRATA_MIGRATION__WORKERS` for nested tables.
pub fn load_config<F>(file: F) -> Result<ServerConfig, config::ConfigError>
where
  F: config::Source + Send + Sync + 'static,
{
  config::Config::builder()
    .add_source(file)
    .add_source(
      config::Environment::with_prefix("STRATA")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true),
    )
    .build()?
    .try_deserialize()
}

fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// The full HTTP application: the migration API with request tracing.
pub fn app(handle: MigrationHandle) -> Router {
  Router::new()
    .merge(strata_api::api_router(handle))
    .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use config::{File, FileFormat};
  use strata_core::search::NullIndex;
  use strata_migrate::{MigrationRegistry, Migrator, spawn_workers};
  use strata_store_sqlite::SqliteStore;
  use tower::ServiceExt as _;

  use super::*;

  #[test]
  fn config_fills_defaults() {
    let cfg = load_config(File::from_str("port = 9000", FileFormat::Toml)).unwrap();
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.host, "127.0.0.1");
    assert_eq!(cfg.address(), "127.0.0.1:9000");
    assert_eq!(cfg.migration, MigrationConfig::default());
  }

  #[test]
  fn config_reads_nested_migration_tables() {
    let toml = r#"
      node_name = "node-b"

      [migration]
      workers = 4
      history_capacity = 50

      [migration.script]
      max_steps = 500
    "#;
    let cfg = load_config(File::from_str(toml, FileFormat::Toml)).unwrap();
    assert_eq!(cfg.node_name, "node-b");
    assert_eq!(cfg.migration.workers, 4);
    assert_eq!(cfg.migration.history_capacity, 50);
    assert_eq!(cfg.migration.queue_depth, 64);
    assert_eq!(cfg.migration.script.max_steps, 500);
    assert_eq!(cfg.migration.script.max_depth, 64);
  }

  #[test]
  fn absolute_store_path_is_untouched() {
    let cfg = ServerConfig { store_path: PathBuf::from("/var/lib/strata.db"), ..Default::default() };
    assert_eq!(cfg.resolved_store_path(), PathBuf::from("/var/lib/strata.db"));
  }

  #[tokio::test]
  async fn app_serves_status() {
    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let registry = Arc::new(MigrationRegistry::new(20));
    let migrator =
      Migrator::new(store, Arc::new(NullIndex), registry, MigrationConfig::default(), "node-a");
    let (handle, _workers) = spawn_workers(migrator);

    let req = Request::builder().uri("/migrations/status").body(Body::empty()).unwrap();
    let resp = app(handle).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "IDLE");
  }
}
