//! Schema update flow.
//!
//! Turns a desired snapshot (or an explicit change list) into a new version
//! of a schema or microschema container, assigns it to branches, and returns
//! the migration requests that bring each branch's content along.

use std::collections::BTreeMap;

use strata_core::{
  change::{Change, SchemaChange, apply_changes},
  diff::diff,
  migration::MigrationRequest,
  schema::{SchemaContainer, SchemaSnapshot, SchemaVersion},
  store::ContentStore,
};
use tracing::info;
use uuid::Uuid;

use crate::error::UpdateError;

#[derive(Debug, Clone)]
pub struct SchemaUpdate {
  pub container: Uuid,
  /// The desired field set. Its version number is assigned by the flow.
  pub snapshot:  SchemaSnapshot,
  /// Custom expressions by field name; for a rename either name matches.
  pub scripts:   BTreeMap<String, String>,
  /// Branches that move to the new version.
  pub branches:  Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
  pub version:  SchemaVersion,
  pub changes:  Vec<Change>,
  /// One per branch that was on an earlier version of the container.
  pub requests: Vec<MigrationRequest>,
}

/// Diff the latest snapshot against `update.snapshot` and append the result.
pub async fn update_schema<S: ContentStore>(
  store: &S,
  update: SchemaUpdate,
) -> Result<UpdateOutcome, UpdateError> {
  let container = load(store, update.container).await?;
  let latest = &container.latest_version().snapshot;

  let mut desired = update.snapshot;
  desired.version = latest.version + 1;
  desired.validate()?;
  if desired.fingerprint()? == latest.fingerprint()? {
    return Err(UpdateError::NoChanges);
  }

  let mut changes: Vec<Change> = diff(latest, &desired).into_iter().map(Change::new).collect();
  attach_scripts(&mut changes, update.scripts)?;
  finish(store, &container, desired, changes, &update.branches).await
}

/// Apply an explicit change list to the latest snapshot and append the
/// result.
pub async fn apply_change_set<S: ContentStore>(
  store: &S,
  container: Uuid,
  changes: Vec<Change>,
  branches: &[Uuid],
) -> Result<UpdateOutcome, UpdateError> {
  let container = load(store, container).await?;
  let latest = &container.latest_version().snapshot;

  let mut desired = apply_changes(latest, changes.iter().map(|c| &c.change))?;
  desired.version = latest.version + 1;
  desired.validate()?;
  if changes.is_empty() || desired.fingerprint()? == latest.fingerprint()? {
    return Err(UpdateError::NoChanges);
  }
  finish(store, &container, desired, changes, branches).await
}

async fn load<S: ContentStore>(store: &S, container: Uuid) -> Result<SchemaContainer, UpdateError> {
  store
    .get_schema_container(container)
    .await
    .map_err(store_error)?
    .ok_or(UpdateError::ContainerNotFound(container))
}

fn attach_scripts(
  changes: &mut [Change],
  scripts: BTreeMap<String, String>,
) -> Result<(), UpdateError> {
  for (name, script) in scripts {
    let target = changes.iter_mut().find(|c| match &c.change {
      SchemaChange::RenameField { field, new_name } => *field == name || *new_name == name,
      other => other.field() == Some(name.as_str()),
    });
    match target {
      Some(change) => change.script = Some(script),
      None => return Err(UpdateError::UnusedScript(name)),
    }
  }
  Ok(())
}

async fn finish<S: ContentStore>(
  store: &S,
  container: &SchemaContainer,
  snapshot: SchemaSnapshot,
  changes: Vec<Change>,
  branches: &[Uuid],
) -> Result<UpdateOutcome, UpdateError> {
  // Resolve every branch first so an unknown id leaves the lineage alone.
  let mut resolved = Vec::with_capacity(branches.len());
  for &id in branches {
    let branch = store
      .get_branch(id)
      .await
      .map_err(store_error)?
      .ok_or(UpdateError::BranchNotFound(id))?;
    resolved.push(branch);
  }

  let version = store
    .append_schema_version(container.uuid, snapshot, changes.clone())
    .await
    .map_err(store_error)?;

  let mut requests = Vec::new();
  for branch in resolved {
    let previous = branch.assigned_version(container.uuid);
    store
      .assign_schema_version(branch.branch_id, container.uuid, version.uuid)
      .await
      .map_err(store_error)?;
    if let Some(from) = previous {
      requests.push(MigrationRequest {
        entity_kind:       container.kind,
        project_uuid:      branch.project_id,
        branch_uuid:       branch.branch_id,
        container_uuid:    container.uuid,
        from_version_uuid: from,
        to_version_uuid:   version.uuid,
      });
    }
  }

  info!(
    container = %container.uuid,
    version = %version.snapshot.version_label(),
    changes = changes.len(),
    migrations = requests.len(),
    "schema version appended"
  );
  Ok(UpdateOutcome { version, changes, requests })
}

fn store_error<E: std::error::Error + Send + Sync + 'static>(e: E) -> UpdateError {
  UpdateError::Store(Box::new(e))
}
