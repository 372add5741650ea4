//! Error types for `strata-core`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid schema snapshot: {0}")]
  InvalidSnapshot(String),

  #[error("snapshot version {proposed} does not follow latest version {latest}")]
  StaleVersion { latest: u32, proposed: u32 },

  #[error("schema version not found: {0}")]
  VersionNotFound(Uuid),

  #[error("no migration path from version {from} to version {to}")]
  NoMigrationPath { from: Uuid, to: Uuid },

  #[error("field not found: {0:?}")]
  FieldNotFound(String),

  #[error("field already exists: {0:?}")]
  FieldExists(String),

  #[error("invalid version number: {0:?}")]
  InvalidVersionNumber(String),

  #[error("invalid field type: {0:?}")]
  InvalidFieldType(String),

  #[error("value for field {field:?} does not fit type {expected}: {reason}")]
  Shape {
    field:    String,
    expected: String,
    reason:   String,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
