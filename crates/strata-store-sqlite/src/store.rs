//! [`SqliteStore`], the SQLite implementation of [`ContentStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension as _, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use strata_core::{
  change::Change,
  content::{ContainerHeads, ContentContainer, Node},
  project::{Branch, Project},
  schema::{SchemaContainer, SchemaKind, SchemaSnapshot, SchemaVersion},
  store::{ContentStore, MigrationCommit, MigrationTarget, NewDraft, NewNode},
  versioning::VersionNumber,
};

use crate::{
  Error, Result,
  encode::{
    RawBranch, RawContainer, RawHeads, RawNode, RawProject, RawSchemaContainer,
    RawSchemaVersion, decode_uuid, encode_dt, encode_index, encode_kind, encode_uuid,
    micronode_refs,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Strata content store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Row access ──────────────────────────────────────────────────────────────
//
// Synchronous helpers run inside `Connection::call`. Transaction bodies take
// `&mut Connection`; reads take `&Connection` so they also work on a
// `Transaction`.

fn exists(conn: &Connection, sql: &str, id: &str) -> rusqlite::Result<bool> {
  Ok(
    conn
      .query_row(sql, rusqlite::params![id], |_| Ok(()))
      .optional()?
      .is_some(),
  )
}

fn load_schema_container(conn: &Connection, id: &str) -> Result<Option<SchemaContainer>> {
  let head = conn
    .query_row(
      "SELECT container_id, kind, latest_index, created_at
       FROM schema_containers WHERE container_id = ?1",
      rusqlite::params![id],
      |row| {
        Ok(RawSchemaContainer {
          container_id: row.get(0)?,
          kind:         row.get(1)?,
          latest_index: row.get(2)?,
          created_at:   row.get(3)?,
          versions:     Vec::new(),
        })
      },
    )
    .optional()?;
  let Some(mut raw) = head else {
    return Ok(None);
  };

  let mut stmt = conn.prepare(
    "SELECT version_id, arena_index, snapshot_json, previous_index, next_index,
            changes_json, created_at
     FROM schema_versions WHERE container_id = ?1
     ORDER BY arena_index",
  )?;
  raw.versions = stmt
    .query_map(rusqlite::params![id], |row| {
      Ok(RawSchemaVersion {
        version_id:     row.get(0)?,
        arena_index:    row.get(1)?,
        snapshot_json:  row.get(2)?,
        previous_index: row.get(3)?,
        next_index:     row.get(4)?,
        changes_json:   row.get(5)?,
        created_at:     row.get(6)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  raw.into_container().map(Some)
}

fn insert_version(conn: &Connection, container_id: &str, version: &SchemaVersion) -> Result<()> {
  conn.execute(
    "INSERT INTO schema_versions (
       version_id, container_id, arena_index, snapshot_json,
       previous_index, next_index, changes_json, created_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    rusqlite::params![
      encode_uuid(version.uuid),
      container_id,
      encode_index(version.index),
      serde_json::to_string(&version.snapshot)?,
      version.previous.map(encode_index),
      version.next.map(encode_index),
      serde_json::to_string(&version.changes)?,
      encode_dt(version.created_at),
    ],
  )?;
  Ok(())
}

fn load_branch(conn: &Connection, id: &str) -> Result<Option<Branch>> {
  let head = conn
    .query_row(
      "SELECT branch_id, project_id, name, created_at FROM branches WHERE branch_id = ?1",
      rusqlite::params![id],
      |row| {
        Ok(RawBranch {
          branch_id:   row.get(0)?,
          project_id:  row.get(1)?,
          name:        row.get(2)?,
          created_at:  row.get(3)?,
          assignments: Vec::new(),
        })
      },
    )
    .optional()?;
  let Some(mut raw) = head else {
    return Ok(None);
  };

  let mut stmt = conn.prepare(
    "SELECT container_id, version_id FROM branch_schema_versions WHERE branch_id = ?1",
  )?;
  raw.assignments = stmt
    .query_map(rusqlite::params![id], |row| Ok((row.get(0)?, row.get(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  raw.into_branch().map(Some)
}

fn read_heads(
  conn: &Connection,
  node_id: &str,
  language: &str,
  branch_id: &str,
) -> rusqlite::Result<Option<RawHeads>> {
  conn
    .query_row(
      "SELECT node_id, language, branch_id, draft_id, published_id
       FROM heads WHERE node_id = ?1 AND language = ?2 AND branch_id = ?3",
      rusqlite::params![node_id, language, branch_id],
      |row| {
        Ok(RawHeads {
          node_id:      row.get(0)?,
          language:     row.get(1)?,
          branch_id:    row.get(2)?,
          draft_id:     row.get(3)?,
          published_id: row.get(4)?,
        })
      },
    )
    .optional()
}

fn read_container(conn: &Connection, id: &str) -> Result<Option<ContentContainer>> {
  let sql = format!("SELECT {} FROM containers WHERE container_id = ?1", RawContainer::COLUMNS);
  conn
    .query_row(&sql, rusqlite::params![id], RawContainer::from_row)
    .optional()?
    .map(RawContainer::into_container)
    .transpose()
}

fn insert_container(conn: &Connection, c: &ContentContainer) -> Result<()> {
  let container_id = encode_uuid(c.container_id);
  conn.execute(
    "INSERT INTO containers (
       container_id, node_id, language, branch_id, schema_version,
       version, previous_id, fields_json, created_at, editor
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    rusqlite::params![
      container_id,
      encode_uuid(c.node_id),
      c.language,
      encode_uuid(c.branch_id),
      encode_uuid(c.schema_version),
      c.version.to_string(),
      c.previous.map(encode_uuid),
      serde_json::to_string(&c.fields)?,
      encode_dt(c.created_at),
      c.editor,
    ],
  )?;

  for (micronode_id, version) in micronode_refs(&c.fields) {
    conn.execute(
      "INSERT OR IGNORE INTO container_micronodes (container_id, micronode_id, microschema_version)
       VALUES (?1, ?2, ?3)",
      rusqlite::params![container_id, micronode_id, version],
    )?;
  }
  Ok(())
}

// ─── Transaction bodies ──────────────────────────────────────────────────────

fn create_schema_container_tx(conn: &mut Connection, container: &SchemaContainer) -> Result<()> {
  let tx = conn.transaction()?;
  let id = encode_uuid(container.uuid);
  tx.execute(
    "INSERT INTO schema_containers (container_id, kind, latest_index, created_at)
     VALUES (?1, ?2, ?3, ?4)",
    rusqlite::params![
      id,
      encode_kind(container.kind),
      encode_index(container.latest),
      encode_dt(container.created_at),
    ],
  )?;
  for version in &container.versions {
    insert_version(&tx, &id, version)?;
  }
  tx.commit()?;
  Ok(())
}

fn append_version_tx(
  conn: &mut Connection,
  container: Uuid,
  snapshot: SchemaSnapshot,
  changes: Vec<Change>,
) -> Result<SchemaVersion> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let id = encode_uuid(container);

  let mut lineage =
    load_schema_container(&tx, &id)?.ok_or(Error::SchemaContainerNotFound(container))?;
  let version = lineage.append(snapshot, changes)?.clone();

  insert_version(&tx, &id, &version)?;
  if let Some(previous) = version.previous {
    tx.execute(
      "UPDATE schema_versions SET next_index = ?1
       WHERE container_id = ?2 AND arena_index = ?3",
      rusqlite::params![encode_index(version.index), id, encode_index(previous)],
    )?;
  }
  tx.execute(
    "UPDATE schema_containers SET latest_index = ?1 WHERE container_id = ?2",
    rusqlite::params![encode_index(version.index), id],
  )?;
  tx.commit()?;
  Ok(version)
}

fn assign_version_tx(
  conn: &mut Connection,
  branch: Uuid,
  container: Uuid,
  version: Uuid,
) -> Result<()> {
  let tx = conn.transaction()?;
  let (branch_id, container_id, version_id) =
    (encode_uuid(branch), encode_uuid(container), encode_uuid(version));

  if !exists(&tx, "SELECT 1 FROM branches WHERE branch_id = ?1", &branch_id)? {
    return Err(Error::BranchNotFound(branch));
  }
  let owner: Option<String> = tx
    .query_row(
      "SELECT container_id FROM schema_versions WHERE version_id = ?1",
      rusqlite::params![version_id],
      |row| row.get(0),
    )
    .optional()?;
  match owner {
    Some(owner) if owner == container_id => {}
    Some(_) => return Err(Error::ForeignVersion { container, version }),
    None => return Err(strata_core::Error::VersionNotFound(version).into()),
  }

  tx.execute(
    "INSERT INTO branch_schema_versions (branch_id, container_id, version_id)
     VALUES (?1, ?2, ?3)
     ON CONFLICT (branch_id, container_id) DO UPDATE SET version_id = excluded.version_id",
    rusqlite::params![branch_id, container_id, version_id],
  )?;
  tx.commit()?;
  Ok(())
}

fn create_project_tx(conn: &mut Connection, project: &Project, branch: &Branch) -> Result<()> {
  let tx = conn.transaction()?;
  tx.execute(
    "INSERT INTO projects (project_id, name, created_at) VALUES (?1, ?2, ?3)",
    rusqlite::params![
      encode_uuid(project.project_id),
      project.name,
      encode_dt(project.created_at),
    ],
  )?;
  tx.execute(
    "INSERT INTO branches (branch_id, project_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
    rusqlite::params![
      encode_uuid(branch.branch_id),
      encode_uuid(branch.project_id),
      branch.name,
      encode_dt(branch.created_at),
    ],
  )?;
  tx.commit()?;
  Ok(())
}

fn save_draft_tx(conn: &mut Connection, draft: NewDraft) -> Result<ContentContainer> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let node_id = encode_uuid(draft.node_id);
  let branch_id = encode_uuid(draft.branch_id);

  if !exists(&tx, "SELECT 1 FROM nodes WHERE node_id = ?1", &node_id)? {
    return Err(Error::NodeNotFound(draft.node_id));
  }
  if !exists(&tx, "SELECT 1 FROM branches WHERE branch_id = ?1", &branch_id)? {
    return Err(Error::BranchNotFound(draft.branch_id));
  }

  let current_draft = read_heads(&tx, &node_id, &draft.language, &branch_id)?
    .and_then(|h| h.draft_id);
  let previous = match current_draft {
    Some(id) => read_container(&tx, &id)?,
    None => None,
  };
  let version = previous
    .as_ref()
    .map_or(VersionNumber::FIRST_DRAFT, |p| p.version.next_draft());

  let container = ContentContainer {
    container_id:   Uuid::new_v4(),
    node_id:        draft.node_id,
    language:       draft.language,
    branch_id:      draft.branch_id,
    schema_version: draft.schema_version,
    version,
    previous:       previous.map(|p| p.container_id),
    fields:         draft.fields,
    created_at:     Utc::now(),
    editor:         draft.editor,
  };
  insert_container(&tx, &container)?;

  tx.execute(
    "INSERT INTO heads (node_id, language, branch_id, draft_id, published_id)
     VALUES (?1, ?2, ?3, ?4, NULL)
     ON CONFLICT (node_id, language, branch_id) DO UPDATE SET draft_id = excluded.draft_id",
    rusqlite::params![
      node_id,
      container.language,
      branch_id,
      encode_uuid(container.container_id),
    ],
  )?;
  tx.commit()?;
  Ok(container)
}

fn publish_tx(
  conn: &mut Connection,
  node: Uuid,
  language: String,
  branch: Uuid,
) -> Result<ContentContainer> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let node_id = encode_uuid(node);
  let branch_id = encode_uuid(branch);
  let no_draft = || Error::NoDraft { node, language: language.clone() };

  let heads = read_heads(&tx, &node_id, &language, &branch_id)?.ok_or_else(no_draft)?;
  let draft_id = heads.draft_id.ok_or_else(no_draft)?;
  let draft = read_container(&tx, &draft_id)?.ok_or_else(no_draft)?;

  if heads.published_id.as_deref() == Some(draft_id.as_str()) {
    return Ok(draft);
  }

  let published =
    draft.successor(draft.version.next_published(), draft.schema_version, draft.fields.clone());
  insert_container(&tx, &published)?;

  let published_id = encode_uuid(published.container_id);
  tx.execute(
    "UPDATE heads SET draft_id = ?4, published_id = ?4
     WHERE node_id = ?1 AND language = ?2 AND branch_id = ?3",
    rusqlite::params![node_id, language, branch_id, published_id],
  )?;
  tx.commit()?;
  Ok(published)
}

fn commit_migration_tx(conn: &mut Connection, commit: MigrationCommit) -> Result<()> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let node_id = encode_uuid(commit.node_id);
  let branch_id = encode_uuid(commit.branch_id);

  let (draft, published) = read_heads(&tx, &node_id, &commit.language, &branch_id)?
    .map_or((None, None), |h| (h.draft_id, h.published_id));

  if draft != commit.expected_draft.map(encode_uuid)
    || published != commit.expected_published.map(encode_uuid)
  {
    debug!(node = %commit.node_id, language = %commit.language, "heads moved; rejecting commit");
    return Err(Error::Conflict { node: commit.node_id, language: commit.language });
  }

  for container in &commit.containers {
    insert_container(&tx, container)?;
  }

  let draft = commit.draft_head.map(encode_uuid).or(draft);
  let published = commit.published_head.map(encode_uuid).or(published);
  tx.execute(
    "UPDATE heads SET draft_id = ?4, published_id = ?5
     WHERE node_id = ?1 AND language = ?2 AND branch_id = ?3",
    rusqlite::params![node_id, commit.language, branch_id, draft, published],
  )?;
  tx.commit()?;
  Ok(())
}

// ─── ContentStore impl ───────────────────────────────────────────────────────

impl ContentStore for SqliteStore {
  type Error = Error;

  // ── Schemas ───────────────────────────────────────────────────────────────

  async fn create_schema_container(
    &self,
    kind: SchemaKind,
    snapshot: SchemaSnapshot,
  ) -> Result<SchemaContainer> {
    let container = SchemaContainer::new(kind, snapshot)?;
    let row = container.clone();
    self
      .conn
      .call(move |conn| Ok(create_schema_container_tx(conn, &row)))
      .await??;
    Ok(container)
  }

  async fn get_schema_container(&self, uuid: Uuid) -> Result<Option<SchemaContainer>> {
    let id = encode_uuid(uuid);
    self
      .conn
      .call(move |conn| Ok(load_schema_container(conn, &id)))
      .await?
  }

  async fn append_schema_version(
    &self,
    container: Uuid,
    snapshot: SchemaSnapshot,
    changes: Vec<Change>,
  ) -> Result<SchemaVersion> {
    self
      .conn
      .call(move |conn| Ok(append_version_tx(conn, container, snapshot, changes)))
      .await?
  }

  async fn assign_schema_version(
    &self,
    branch: Uuid,
    container: Uuid,
    version: Uuid,
  ) -> Result<()> {
    self
      .conn
      .call(move |conn| Ok(assign_version_tx(conn, branch, container, version)))
      .await?
  }

  // ── Projects ──────────────────────────────────────────────────────────────

  async fn create_project(&self, name: String) -> Result<(Project, Branch)> {
    let now = Utc::now();
    let project = Project { project_id: Uuid::new_v4(), name, created_at: now };
    let branch = Branch {
      branch_id:       Uuid::new_v4(),
      project_id:      project.project_id,
      name:            project.name.clone(),
      schema_versions: Default::default(),
      created_at:      now,
    };

    let (p, b) = (project.clone(), branch.clone());
    self
      .conn
      .call(move |conn| Ok(create_project_tx(conn, &p, &b)))
      .await??;
    Ok((project, branch))
  }

  async fn create_branch(&self, project: Uuid, name: String) -> Result<Branch> {
    if self.get_project(project).await?.is_none() {
      return Err(Error::ProjectNotFound(project));
    }

    let branch = Branch {
      branch_id: Uuid::new_v4(),
      project_id: project,
      name,
      schema_versions: Default::default(),
      created_at: Utc::now(),
    };

    let id_str = encode_uuid(branch.branch_id);
    let project_str = encode_uuid(project);
    let name = branch.name.clone();
    let at_str = encode_dt(branch.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO branches (branch_id, project_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, project_str, name, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(branch)
  }

  async fn get_project(&self, id: Uuid) -> Result<Option<Project>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawProject> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT project_id, name, created_at FROM projects WHERE project_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawProject {
                project_id: row.get(0)?,
                name:       row.get(1)?,
                created_at: row.get(2)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawProject::into_project).transpose()
  }

  async fn get_branch(&self, id: Uuid) -> Result<Option<Branch>> {
    let id_str = encode_uuid(id);
    self
      .conn
      .call(move |conn| Ok(load_branch(conn, &id_str)))
      .await?
  }

  // ── Content ───────────────────────────────────────────────────────────────

  async fn create_node(&self, input: NewNode) -> Result<Node> {
    if self.get_project(input.project_id).await?.is_none() {
      return Err(Error::ProjectNotFound(input.project_id));
    }
    if self.get_schema_container(input.schema_container).await?.is_none() {
      return Err(Error::SchemaContainerNotFound(input.schema_container));
    }

    let node = Node {
      node_id:          Uuid::new_v4(),
      project_id:       input.project_id,
      schema_container: input.schema_container,
      parent_id:        input.parent_id,
      created_at:       Utc::now(),
    };

    let id_str        = encode_uuid(node.node_id);
    let project_str   = encode_uuid(node.project_id);
    let container_str = encode_uuid(node.schema_container);
    let parent_str    = node.parent_id.map(encode_uuid);
    let at_str        = encode_dt(node.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO nodes (node_id, project_id, schema_container, parent_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, project_str, container_str, parent_str, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(node)
  }

  async fn get_node(&self, id: Uuid) -> Result<Option<Node>> {
    let id_str = encode_uuid(id);

    let raw: Option<RawNode> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT node_id, project_id, schema_container, parent_id, created_at
             FROM nodes WHERE node_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawNode {
                node_id:          row.get(0)?,
                project_id:       row.get(1)?,
                schema_container: row.get(2)?,
                parent_id:        row.get(3)?,
                created_at:       row.get(4)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawNode::into_node).transpose()
  }

  async fn save_draft(&self, draft: NewDraft) -> Result<ContentContainer> {
    self
      .conn
      .call(move |conn| Ok(save_draft_tx(conn, draft)))
      .await?
  }

  async fn publish(&self, node: Uuid, language: String, branch: Uuid) -> Result<ContentContainer> {
    self
      .conn
      .call(move |conn| Ok(publish_tx(conn, node, language, branch)))
      .await?
  }

  async fn take_offline(&self, node: Uuid, language: String, branch: Uuid) -> Result<()> {
    let node_str = encode_uuid(node);
    let branch_str = encode_uuid(branch);
    let lang = language.clone();

    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE heads SET published_id = NULL
           WHERE node_id = ?1 AND language = ?2 AND branch_id = ?3",
          rusqlite::params![node_str, lang, branch_str],
        )?)
      })
      .await?;

    if updated == 0 {
      return Err(Error::NoDraft { node, language });
    }
    Ok(())
  }

  async fn get_heads(
    &self,
    node: Uuid,
    language: String,
    branch: Uuid,
  ) -> Result<Option<ContainerHeads>> {
    let node_str = encode_uuid(node);
    let branch_str = encode_uuid(branch);

    let raw = self
      .conn
      .call(move |conn| Ok(read_heads(conn, &node_str, &language, &branch_str)?))
      .await?;

    raw.map(RawHeads::into_heads).transpose()
  }

  async fn get_container(&self, id: Uuid) -> Result<Option<ContentContainer>> {
    let id_str = encode_uuid(id);
    self
      .conn
      .call(move |conn| Ok(read_container(conn, &id_str)))
      .await?
  }

  // ── Migration ─────────────────────────────────────────────────────────────

  async fn migration_targets(
    &self,
    branch: Uuid,
    kind: SchemaKind,
    version: Uuid,
  ) -> Result<Vec<MigrationTarget>> {
    let branch_str = encode_uuid(branch);
    let version_str = encode_uuid(version);
    let sql = match kind {
      SchemaKind::Schema => {
        "SELECT DISTINCT h.node_id, h.language
         FROM heads h
         JOIN containers c ON c.container_id IN (h.draft_id, h.published_id)
         WHERE h.branch_id = ?1 AND c.schema_version = ?2
         ORDER BY h.node_id, h.language"
      }
      SchemaKind::Microschema => {
        "SELECT DISTINCT h.node_id, h.language
         FROM heads h
         JOIN container_micronodes m ON m.container_id IN (h.draft_id, h.published_id)
         WHERE h.branch_id = ?1 AND m.microschema_version = ?2
         ORDER BY h.node_id, h.language"
      }
    };

    let rows: Vec<(String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
          .query_map(rusqlite::params![branch_str, version_str], |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(node_id, language)| -> Result<MigrationTarget> {
        Ok(MigrationTarget { node_id: decode_uuid(&node_id)?, language })
      })
      .collect()
  }

  async fn commit_migration(&self, commit: MigrationCommit) -> Result<()> {
    self
      .conn
      .call(move |conn| Ok(commit_migration_tx(conn, commit)))
      .await?
  }
}
