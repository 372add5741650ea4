//! Error types for the migration engine.

use strata_core::schema::SchemaKind;
use thiserror::Error;
use uuid::Uuid;

/// A request that cannot start. Nothing has been touched when this is
/// returned.
#[derive(Debug, Error)]
pub enum SetupError {
  #[error("schema container {0} not found")]
  ContainerNotFound(Uuid),

  #[error("version {version} does not belong to container {container}")]
  VersionNotFound { container: Uuid, version: Uuid },

  #[error("container {container} is a {actual}, not a {expected}")]
  KindMismatch {
    container: Uuid,
    expected:  SchemaKind,
    actual:    SchemaKind,
  },

  #[error("project {0} not found")]
  ProjectNotFound(Uuid),

  #[error("branch {0} not found")]
  BranchNotFound(Uuid),

  #[error("branch {branch} does not belong to project {project}")]
  ForeignBranch { branch: Uuid, project: Uuid },

  #[error("no migration path from version {from} to version {to}")]
  NoPath { from: Uuid, to: Uuid },

  #[error("store error during setup: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Why one entity could not be migrated.
#[derive(Debug, Error)]
pub enum TransformError {
  #[error("custom expression for {change} does not compile: {message}")]
  Compile { change: String, message: String },

  #[error("custom expression for {change} failed on {field:?}: {source}")]
  Script {
    change: String,
    field:  String,
    #[source]
    source: strata_script::Error,
  },

  #[error("sandbox violation in {change} on {field:?}: {source}")]
  Sandbox {
    change: String,
    field:  String,
    #[source]
    source: strata_script::Error,
  },

  #[error("result of {change} has the wrong shape: {source}")]
  Shape {
    change: String,
    #[source]
    source: strata_core::Error,
  },

  #[error("micronode {uuid} in {field:?} lost its identity")]
  MicronodeIdentity { field: String, uuid: Uuid },

  #[error("change set cannot be applied: {0}")]
  Structure(String),
}

/// Failures surfaced through the worker pool and its handle.
#[derive(Debug, Error)]
pub enum MigrationError {
  #[error(transparent)]
  Setup(#[from] SetupError),

  #[error("migration queue is closed")]
  QueueClosed,

  #[error("migration worker dropped the job")]
  WorkerGone,
}

/// Failures of the schema update flow.
#[derive(Debug, Error)]
pub enum UpdateError {
  #[error("schema container {0} not found")]
  ContainerNotFound(Uuid),

  #[error("branch {0} not found")]
  BranchNotFound(Uuid),

  #[error("the update does not change the schema")]
  NoChanges,

  #[error("custom expression given for {0:?}, which the update does not change")]
  UnusedScript(String),

  #[error(transparent)]
  Core(#[from] strata_core::Error),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}
