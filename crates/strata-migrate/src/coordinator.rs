//! Runs one migration request end to end.
//!
//! Setup validates the request and prepares the change chain before any
//! content is read. Each (node, language) target is then migrated in its own
//! guarded commit: the heads read at the start of an attempt must still be in
//! place when the new containers are written, otherwise the attempt is
//! repeated from fresh heads. Per-entity failures are collected and the run
//! carries on; an unavailable store ends the run early.

use std::sync::Arc;

use strata_core::{
  content::{ContainerHeads, ContainerType, ContentContainer},
  migration::{MigrationInfo, MigrationReply, MigrationRequest},
  schema::SchemaKind,
  search::{IndexAction, IndexBatch, IndexEntry, SearchIndex},
  store::{ContentStore, FailureKind, MigrationCommit, MigrationTarget, StoreFailure},
  versioning::{HeadState, MigrationPlan, VersionNumber, plan_migration},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
  config::MigrationConfig,
  error::{SetupError, TransformError},
  registry::MigrationRegistry,
  transform::Transformer,
};

/// Per-entity messages quoted in a failed run's error.
const SUMMARY_LIMIT: usize = 5;

// ─── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
  pub node_id:  Uuid,
  pub language: String,
  pub message:  String,
}

/// Outcome of a run that got past setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
  pub run_id:   Uuid,
  /// Targets finished without error, including those found already migrated.
  pub done:     u64,
  pub total:    u64,
  pub failures: Vec<EntityFailure>,
  /// Set when a storage outage stopped the run before every target was seen.
  pub aborted:  Option<String>,
}

impl MigrationReport {
  pub fn succeeded(&self) -> bool { self.failures.is_empty() && self.aborted.is_none() }

  /// The first few per-entity messages plus a count of the rest, or `None`
  /// for a clean run.
  pub fn error_summary(&self) -> Option<String> {
    if self.succeeded() {
      return None;
    }
    let mut parts = Vec::new();
    if let Some(reason) = &self.aborted {
      parts.push(format!("aborted: {reason}"));
    }
    if !self.failures.is_empty() {
      let shown: Vec<String> = self
        .failures
        .iter()
        .take(SUMMARY_LIMIT)
        .map(|f| format!("{}/{}: {}", f.node_id, f.language, f.message))
        .collect();
      let mut summary = format!(
        "{} of {} entities failed: {}",
        self.failures.len(),
        self.total,
        shown.join("; ")
      );
      let rest = self.failures.len().saturating_sub(SUMMARY_LIMIT);
      if rest > 0 {
        summary.push_str(&format!(" (and {rest} more)"));
      }
      parts.push(summary);
    }
    Some(parts.join("; "))
  }

  pub fn reply(&self) -> MigrationReply {
    match self.error_summary() {
      None => MigrationReply::Completed {
        run_id: self.run_id,
        done:   self.done,
        total:  self.total,
      },
      Some(error) => MigrationReply::Failed {
        run_id: Some(self.run_id),
        done: self.done,
        total: self.total,
        error,
      },
    }
  }
}

// ─── Entity errors ───────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum EntityError {
  #[error(transparent)]
  Transform(#[from] TransformError),

  #[error("{message}")]
  Store { kind: FailureKind, message: String },

  #[error("search index update failed: {0}")]
  Index(String),
}

impl EntityError {
  fn store<E: StoreFailure + std::fmt::Display>(e: E) -> Self {
    Self::Store { kind: e.failure_kind(), message: e.to_string() }
  }
}

// ─── Run plan ────────────────────────────────────────────────────────────────

struct RunPlan {
  kind:        SchemaKind,
  branch:      Uuid,
  from:        Uuid,
  to:          Uuid,
  transformer: Transformer,
}

impl RunPlan {
  fn on_source(&self, container: &ContentContainer) -> bool {
    match self.kind {
      SchemaKind::Schema => container.schema_version == self.from,
      SchemaKind::Microschema => {
        container.micronodes().any(|m| m.microschema.version == self.from)
      }
    }
  }

  /// Derive the migrated successor of `base` at `version`.
  fn migrate(
    &self,
    base: &ContentContainer,
    version: VersionNumber,
  ) -> Result<ContentContainer, EntityError> {
    Ok(match self.kind {
      SchemaKind::Schema => {
        let fields = self.transformer.apply(&base.fields)?;
        base.successor(version, self.to, fields)
      }
      SchemaKind::Microschema => {
        let fields = self.transformer.apply_to_micronodes(&base.fields, self.from, self.to)?;
        base.successor(version, base.schema_version, fields)
      }
    })
  }
}

// ─── Migrator ────────────────────────────────────────────────────────────────

pub struct Migrator<S, I> {
  store:     Arc<S>,
  index:     Arc<I>,
  registry:  Arc<MigrationRegistry>,
  config:    MigrationConfig,
  node_name: String,
}

impl<S, I> Migrator<S, I>
where
  S: ContentStore,
  I: SearchIndex,
{
  pub fn new(
    store: Arc<S>,
    index: Arc<I>,
    registry: Arc<MigrationRegistry>,
    config: MigrationConfig,
    node_name: impl Into<String>,
  ) -> Self {
    Self { store, index, registry, config, node_name: node_name.into() }
  }

  pub fn registry(&self) -> &Arc<MigrationRegistry> { &self.registry }

  pub fn config(&self) -> &MigrationConfig { &self.config }

  /// Run `request` to completion. A [`SetupError`] means nothing was
  /// touched; the run is still recorded as failed.
  pub async fn migrate(
    &self,
    request: MigrationRequest,
  ) -> Result<MigrationReport, SetupError> {
    let (plan, info) = match self.setup(&request).await {
      Ok(prepared) => prepared,
      Err(e) => {
        let run = self.registry.begin(MigrationInfo::started(self.node_name.clone()));
        self.registry.fail(run, e.to_string());
        warn!(%run, error = %e, "migration setup failed");
        return Err(e);
      }
    };

    let run = self.registry.begin(info);
    info!(
      %run,
      kind = %plan.kind,
      container = %request.container_uuid,
      from = %plan.from,
      to = %plan.to,
      "migration started"
    );

    let mut report = MigrationReport {
      run_id:   run,
      done:     0,
      total:    0,
      failures: Vec::new(),
      aborted:  None,
    };

    // Content on `from` is already on `to`.
    if plan.from == plan.to {
      debug!(%run, "source and target versions match; nothing to migrate");
      return Ok(self.finish(report));
    }

    let targets = match self.store.migration_targets(plan.branch, plan.kind, plan.from).await {
      Ok(targets) => targets,
      Err(e) => {
        error!(%run, error = %e, "could not enumerate migration targets");
        report.aborted = Some(e.to_string());
        return Ok(self.finish(report));
      }
    };
    report.total = targets.len() as u64;
    self.registry.progress(run, 0, report.total);

    for target in &targets {
      match self.migrate_entity(&plan, target).await {
        Ok(()) => {
          report.done += 1;
          debug!(%run, node = %target.node_id, language = %target.language, "entity migrated");
        }
        Err(EntityError::Store { kind: FailureKind::Unavailable, message }) => {
          error!(%run, node = %target.node_id, error = %message, "store unavailable; aborting run");
          report.aborted = Some(message);
          break;
        }
        Err(e) => {
          warn!(%run, node = %target.node_id, language = %target.language, error = %e, "entity failed");
          report.failures.push(EntityFailure {
            node_id:  target.node_id,
            language: target.language.clone(),
            message:  e.to_string(),
          });
        }
      }
      self.registry.progress(run, report.done, report.total);
    }

    Ok(self.finish(report))
  }

  fn finish(&self, report: MigrationReport) -> MigrationReport {
    match report.error_summary() {
      None => {
        self.registry.complete(report.run_id);
        info!(run = %report.run_id, done = report.done, total = report.total, "migration completed");
      }
      Some(summary) => {
        warn!(run = %report.run_id, done = report.done, total = report.total, "migration failed");
        self.registry.fail(report.run_id, summary);
      }
    }
    report
  }

  async fn setup(
    &self,
    request: &MigrationRequest,
  ) -> Result<(RunPlan, MigrationInfo), SetupError> {
    let container = self
      .store
      .get_schema_container(request.container_uuid)
      .await
      .map_err(setup_store)?
      .ok_or(SetupError::ContainerNotFound(request.container_uuid))?;
    if container.kind != request.entity_kind {
      return Err(SetupError::KindMismatch {
        container: container.uuid,
        expected:  request.entity_kind,
        actual:    container.kind,
      });
    }

    let version = |uuid: Uuid| {
      container
        .version(uuid)
        .ok_or(SetupError::VersionNotFound { container: container.uuid, version: uuid })
    };
    let from = version(request.from_version_uuid)?;
    let to = version(request.to_version_uuid)?;

    let project = self
      .store
      .get_project(request.project_uuid)
      .await
      .map_err(setup_store)?
      .ok_or(SetupError::ProjectNotFound(request.project_uuid))?;
    let branch = self
      .store
      .get_branch(request.branch_uuid)
      .await
      .map_err(setup_store)?
      .ok_or(SetupError::BranchNotFound(request.branch_uuid))?;
    if branch.project_id != project.project_id {
      return Err(SetupError::ForeignBranch {
        branch:  branch.branch_id,
        project: project.project_id,
      });
    }

    let chain = container
      .chain(from.uuid, to.uuid)
      .map_err(|_| SetupError::NoPath { from: from.uuid, to: to.uuid })?;

    let mut info = MigrationInfo::started(self.node_name.clone());
    info.source_name = Some(container.name().to_owned());
    info.source_uuid = Some(container.uuid);
    info.source_version = Some(from.snapshot.version_label());
    info.target_version = Some(to.snapshot.version_label());

    let plan = RunPlan {
      kind:        container.kind,
      branch:      branch.branch_id,
      from:        from.uuid,
      to:          to.uuid,
      transformer: Transformer::new(&from.snapshot, &chain.changes, &self.config.script),
    };
    Ok((plan, info))
  }

  /// Migrate one target, retrying on optimistic-check conflicts.
  async fn migrate_entity(
    &self,
    plan: &RunPlan,
    target: &MigrationTarget,
  ) -> Result<(), EntityError> {
    let mut attempt = 0;
    loop {
      match self.attempt(plan, target).await {
        Err(EntityError::Store { kind: FailureKind::Conflict, .. })
          if attempt < self.config.max_conflict_retries =>
        {
          attempt += 1;
          debug!(node = %target.node_id, language = %target.language, attempt, "heads moved; retrying");
        }
        Ok(Some(batch)) => {
          return self
            .index
            .update(batch)
            .await
            .map_err(|e| EntityError::Index(e.to_string()));
        }
        Ok(None) => {
          debug!(node = %target.node_id, language = %target.language, "nothing on source version");
          return Ok(());
        }
        Err(e) => return Err(e),
      }
    }
  }

  /// One read-transform-commit pass. `None` when neither head is on the
  /// source version any more.
  async fn attempt(
    &self,
    plan: &RunPlan,
    target: &MigrationTarget,
  ) -> Result<Option<IndexBatch>, EntityError> {
    let heads = self
      .store
      .get_heads(target.node_id, target.language.clone(), plan.branch)
      .await
      .map_err(EntityError::store)?;
    let Some(heads) = heads else {
      return Ok(None);
    };
    let draft = self.load(heads.draft).await?;
    let published = self.load(heads.published).await?;

    let state = |c: &ContentContainer| HeadState {
      container_id:    c.container_id,
      version:         c.version,
      needs_migration: plan.on_source(c),
    };
    let mut containers = Vec::new();
    let mut draft_head = None;
    let mut published_head = None;

    match plan_migration(draft.as_ref().map(state), published.as_ref().map(state)) {
      MigrationPlan::Nothing => return Ok(None),
      MigrationPlan::Shared { version } => {
        let Some(base) = published.as_ref() else {
          return Ok(None);
        };
        let next = plan.migrate(base, version)?;
        draft_head = Some(next.container_id);
        published_head = Some(next.container_id);
        containers.push(next);
      }
      MigrationPlan::Separate { draft: draft_version, published: published_version } => {
        if let (Some(version), Some(base)) = (published_version, published.as_ref()) {
          let next = plan.migrate(base, version)?;
          published_head = Some(next.container_id);
          containers.push(next);
        }
        if let (Some(version), Some(base)) = (draft_version, draft.as_ref()) {
          let next = plan.migrate(base, version)?;
          draft_head = Some(next.container_id);
          containers.push(next);
        }
      }
    }

    let batch = index_batch(
      [
        (ContainerType::Draft, draft.as_ref(), draft_head),
        (ContainerType::Published, published.as_ref(), published_head),
      ],
      &containers,
    );
    self
      .store
      .commit_migration(commit(&heads, containers, draft_head, published_head))
      .await
      .map_err(EntityError::store)?;
    Ok(Some(batch))
  }

  async fn load(&self, id: Option<Uuid>) -> Result<Option<ContentContainer>, EntityError> {
    let Some(id) = id else {
      return Ok(None);
    };
    match self.store.get_container(id).await.map_err(EntityError::store)? {
      Some(container) => Ok(Some(container)),
      None => Err(EntityError::Store {
        kind:    FailureKind::Rejected,
        message: format!("head container {id} is missing"),
      }),
    }
  }
}

fn setup_store<E: std::error::Error + Send + Sync + 'static>(e: E) -> SetupError {
  SetupError::Store(Box::new(e))
}

fn commit(
  heads: &ContainerHeads,
  containers: Vec<ContentContainer>,
  draft_head: Option<Uuid>,
  published_head: Option<Uuid>,
) -> MigrationCommit {
  MigrationCommit {
    node_id: heads.node_id,
    language: heads.language.clone(),
    branch_id: heads.branch_id,
    expected_draft: heads.draft,
    expected_published: heads.published,
    containers,
    draft_head,
    published_head,
  }
}

/// For each moved pointer: drop the old document, store the new one.
fn index_batch(
  moves: [(ContainerType, Option<&ContentContainer>, Option<Uuid>); 2],
  created: &[ContentContainer],
) -> IndexBatch {
  let entry = |c: &ContentContainer, container_type| IndexEntry {
    node_id: c.node_id,
    language: c.language.clone(),
    branch_id: c.branch_id,
    container_type,
    container_id: c.container_id,
    schema_version: c.schema_version,
  };

  let mut actions = Vec::new();
  for (container_type, old, new_id) in moves {
    let Some(new) = new_id.and_then(|id| created.iter().find(|c| c.container_id == id)) else {
      continue;
    };
    if let Some(old) = old {
      actions.push(IndexAction::Delete(entry(old, container_type)));
    }
    actions.push(IndexAction::Store(entry(new, container_type)));
  }
  IndexBatch { actions }
}
