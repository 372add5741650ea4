//! Error type for `strata-store-sqlite`.

use rusqlite::ErrorCode;
use strata_core::store::{FailureKind, StoreFailure};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] strata_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown {what}: {value:?}")]
  UnknownVariant { what: &'static str, value: String },

  #[error("schema container not found: {0}")]
  SchemaContainerNotFound(Uuid),

  #[error("schema version {version} does not belong to container {container}")]
  ForeignVersion { container: Uuid, version: Uuid },

  #[error("project not found: {0}")]
  ProjectNotFound(Uuid),

  #[error("branch not found: {0}")]
  BranchNotFound(Uuid),

  #[error("node not found: {0}")]
  NodeNotFound(Uuid),

  #[error("no draft for node {node} in language {language:?}")]
  NoDraft { node: Uuid, language: String },

  /// The heads changed between read and write.
  #[error("heads of node {node} ({language}) changed concurrently")]
  Conflict { node: Uuid, language: String },
}

impl StoreFailure for Error {
  fn failure_kind(&self) -> FailureKind {
    match self {
      Self::Conflict { .. } => FailureKind::Conflict,
      Self::Sqlite(e) => classify(e),
      Self::Database(tokio_rusqlite::Error::Rusqlite(e)) => classify(e),
      Self::Database(_) => FailureKind::Unavailable,
      _ => FailureKind::Rejected,
    }
  }
}

fn classify(e: &rusqlite::Error) -> FailureKind {
  match e.sqlite_error_code() {
    Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => FailureKind::Conflict,
    Some(
      ErrorCode::CannotOpen
      | ErrorCode::DiskFull
      | ErrorCode::ReadOnly
      | ErrorCode::SystemIoFailure
      | ErrorCode::DatabaseCorrupt
      | ErrorCode::NotADatabase
      | ErrorCode::OutOfMemory,
    ) => FailureKind::Unavailable,
    _ => FailureKind::Rejected,
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
