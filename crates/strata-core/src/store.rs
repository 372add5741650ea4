//! The `ContentStore` trait and supporting command types.
//!
//! The trait is the narrow storage interface the migration engine is written
//! against. It is implemented by storage backends (e.g.
//! `strata-store-sqlite`); the engine never sees a concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  change::Change,
  content::{ContainerHeads, ContentContainer, FieldMap, Node},
  project::{Branch, Project},
  schema::{SchemaContainer, SchemaKind, SchemaSnapshot, SchemaVersion},
};

// ─── Failure classification ──────────────────────────────────────────────────

/// How the engine should react to a storage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
  /// An optimistic guard did not hold; re-read and retry.
  Conflict,
  /// The write was refused for this entity only.
  Rejected,
  /// The store cannot serve further requests.
  Unavailable,
}

/// Implemented by store error types so callers can classify failures.
pub trait StoreFailure {
  fn failure_kind(&self) -> FailureKind;
}

// ─── Command types ───────────────────────────────────────────────────────────

/// Input to [`ContentStore::create_node`].
#[derive(Debug, Clone)]
pub struct NewNode {
  pub project_id:       Uuid,
  pub schema_container: Uuid,
  pub parent_id:        Option<Uuid>,
}

/// Input to [`ContentStore::save_draft`].
#[derive(Debug, Clone)]
pub struct NewDraft {
  pub node_id:        Uuid,
  pub language:       String,
  pub branch_id:      Uuid,
  pub schema_version: Uuid,
  pub fields:         FieldMap,
  pub editor:         Option<String>,
}

/// A (node, language) pair whose content is on a migration's source version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MigrationTarget {
  pub node_id:  Uuid,
  pub language: String,
}

/// The guarded write of one migrated (node, language, branch).
///
/// The store inserts `containers` and moves the pointers only if the current
/// heads still equal `expected_draft` / `expected_published`; otherwise it
/// fails with a [`FailureKind::Conflict`] error and writes nothing.
#[derive(Debug, Clone)]
pub struct MigrationCommit {
  pub node_id:            Uuid,
  pub language:           String,
  pub branch_id:          Uuid,
  pub expected_draft:     Option<Uuid>,
  pub expected_published: Option<Uuid>,
  pub containers:         Vec<ContentContainer>,
  /// New draft pointer; `None` leaves it unchanged.
  pub draft_head:         Option<Uuid>,
  /// New published pointer; `None` leaves it unchanged.
  pub published_head:     Option<Uuid>,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Strata content store backend.
///
/// Schema lineages and content containers are append-only; head pointers are
/// the only mutable state.
///
/// All methods return `Send` futures so the trait can be used from worker
/// tasks on a multi-threaded tokio runtime.
pub trait ContentStore: Send + Sync {
  type Error: std::error::Error + StoreFailure + Send + Sync + 'static;

  // ── Schemas ───────────────────────────────────────────────────────────

  /// Persist a new schema or microschema container with its first version.
  fn create_schema_container(
    &self,
    kind: SchemaKind,
    snapshot: SchemaSnapshot,
  ) -> impl Future<Output = Result<SchemaContainer, Self::Error>> + Send + '_;

  /// Retrieve a container with its full lineage. `None` if not found.
  fn get_schema_container(
    &self,
    uuid: Uuid,
  ) -> impl Future<Output = Result<Option<SchemaContainer>, Self::Error>> + Send + '_;

  /// Append a version after the container's latest one.
  fn append_schema_version(
    &self,
    container: Uuid,
    snapshot: SchemaSnapshot,
    changes: Vec<Change>,
  ) -> impl Future<Output = Result<SchemaVersion, Self::Error>> + Send + '_;

  /// Assign `version` of `container` to `branch`.
  fn assign_schema_version(
    &self,
    branch: Uuid,
    container: Uuid,
    version: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Projects ──────────────────────────────────────────────────────────

  /// Create a project together with its initial branch (named after it).
  fn create_project(
    &self,
    name: String,
  ) -> impl Future<Output = Result<(Project, Branch), Self::Error>> + Send + '_;

  fn create_branch(
    &self,
    project: Uuid,
    name: String,
  ) -> impl Future<Output = Result<Branch, Self::Error>> + Send + '_;

  fn get_project(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Project>, Self::Error>> + Send + '_;

  fn get_branch(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Branch>, Self::Error>> + Send + '_;

  // ── Content ───────────────────────────────────────────────────────────

  fn create_node(
    &self,
    node: NewNode,
  ) -> impl Future<Output = Result<Node, Self::Error>> + Send + '_;

  fn get_node(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Node>, Self::Error>> + Send + '_;

  /// Save a new draft container: `0.1` for the first save, minor + 1 after.
  /// The published pointer is left alone.
  fn save_draft(
    &self,
    draft: NewDraft,
  ) -> impl Future<Output = Result<ContentContainer, Self::Error>> + Send + '_;

  /// Publish the current draft as `(major + 1).0` and move both pointers to
  /// it. Publishing an already-published draft returns the existing
  /// container.
  fn publish(
    &self,
    node: Uuid,
    language: String,
    branch: Uuid,
  ) -> impl Future<Output = Result<ContentContainer, Self::Error>> + Send + '_;

  /// Remove the published pointer. The draft is unaffected.
  fn take_offline(
    &self,
    node: Uuid,
    language: String,
    branch: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_heads(
    &self,
    node: Uuid,
    language: String,
    branch: Uuid,
  ) -> impl Future<Output = Result<Option<ContainerHeads>, Self::Error>> + Send + '_;

  fn get_container(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<ContentContainer>, Self::Error>> + Send + '_;

  // ── Migration ─────────────────────────────────────────────────────────

  /// (node, language) pairs in `branch` whose draft or published container
  /// is on `version` (schemas) or embeds a micronode on `version`
  /// (microschemas). Sorted by node id, then language.
  fn migration_targets(
    &self,
    branch: Uuid,
    kind: SchemaKind,
    version: Uuid,
  ) -> impl Future<Output = Result<Vec<MigrationTarget>, Self::Error>> + Send + '_;

  /// Apply a guarded migration write in one transaction.
  fn commit_migration(
    &self,
    commit: MigrationCommit,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
