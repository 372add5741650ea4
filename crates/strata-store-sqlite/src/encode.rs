//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are RFC 3339 strings, UUIDs hyphenated lowercase strings.
//! Snapshots, change sets and field maps are compact JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use strata_core::{
  change::Change,
  content::{ContainerHeads, ContentContainer, FieldMap, FieldValue, Node},
  project::{Branch, Project},
  schema::{SchemaContainer, SchemaKind, SchemaSnapshot, SchemaVersion},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn decode_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
  s.as_deref().map(decode_uuid).transpose()
}

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_kind(k: SchemaKind) -> &'static str {
  match k {
    SchemaKind::Schema => "schema",
    SchemaKind::Microschema => "microschema",
  }
}

pub fn decode_kind(s: &str) -> Result<SchemaKind> {
  match s {
    "schema" => Ok(SchemaKind::Schema),
    "microschema" => Ok(SchemaKind::Microschema),
    other => Err(Error::UnknownVariant { what: "schema kind", value: other.to_owned() }),
  }
}

pub fn encode_index(i: usize) -> i64 { i as i64 }

pub fn decode_index(i: i64) -> Result<usize> {
  usize::try_from(i)
    .map_err(|_| Error::UnknownVariant { what: "arena index", value: i.to_string() })
}

// ─── Micronode index ─────────────────────────────────────────────────────────

/// `(micronode uuid, microschema version uuid)` for every micronode in
/// `fields`, including micronodes nested inside micronodes.
pub fn micronode_refs(fields: &FieldMap) -> Vec<(String, String)> {
  fn walk(fields: &FieldMap, out: &mut Vec<(String, String)>) {
    for value in fields.values() {
      for micronode in FieldValue::micronodes(value) {
        out.push((
          encode_uuid(micronode.uuid),
          encode_uuid(micronode.microschema.version),
        ));
        walk(&micronode.fields, out);
      }
    }
  }

  let mut out = Vec::new();
  walk(fields, &mut out);
  out
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read from a `schema_versions` row.
pub struct RawSchemaVersion {
  pub version_id:     String,
  pub arena_index:    i64,
  pub snapshot_json:  String,
  pub previous_index: Option<i64>,
  pub next_index:     Option<i64>,
  pub changes_json:   String,
  pub created_at:     String,
}

impl RawSchemaVersion {
  pub fn into_version(self) -> Result<SchemaVersion> {
    let snapshot: SchemaSnapshot = serde_json::from_str(&self.snapshot_json)?;
    let changes: Vec<Change> = serde_json::from_str(&self.changes_json)?;
    Ok(SchemaVersion {
      uuid: decode_uuid(&self.version_id)?,
      index: decode_index(self.arena_index)?,
      snapshot,
      previous: self.previous_index.map(decode_index).transpose()?,
      next: self.next_index.map(decode_index).transpose()?,
      changes,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// A `schema_containers` row plus its versions in arena order.
pub struct RawSchemaContainer {
  pub container_id: String,
  pub kind:         String,
  pub latest_index: i64,
  pub created_at:   String,
  pub versions:     Vec<RawSchemaVersion>,
}

impl RawSchemaContainer {
  pub fn into_container(self) -> Result<SchemaContainer> {
    let versions = self
      .versions
      .into_iter()
      .map(RawSchemaVersion::into_version)
      .collect::<Result<Vec<_>>>()?;
    Ok(SchemaContainer {
      uuid: decode_uuid(&self.container_id)?,
      kind: decode_kind(&self.kind)?,
      versions,
      latest: decode_index(self.latest_index)?,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawProject {
  pub project_id: String,
  pub name:       String,
  pub created_at: String,
}

impl RawProject {
  pub fn into_project(self) -> Result<Project> {
    Ok(Project {
      project_id: decode_uuid(&self.project_id)?,
      name:       self.name,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// A `branches` row plus its `(container, version)` assignments.
pub struct RawBranch {
  pub branch_id:   String,
  pub project_id:  String,
  pub name:        String,
  pub created_at:  String,
  pub assignments: Vec<(String, String)>,
}

impl RawBranch {
  pub fn into_branch(self) -> Result<Branch> {
    let schema_versions = self
      .assignments
      .iter()
      .map(|(c, v)| -> Result<(Uuid, Uuid)> { Ok((decode_uuid(c)?, decode_uuid(v)?)) })
      .collect::<Result<BTreeMap<_, _>>>()?;
    Ok(Branch {
      branch_id: decode_uuid(&self.branch_id)?,
      project_id: decode_uuid(&self.project_id)?,
      name: self.name,
      schema_versions,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

pub struct RawNode {
  pub node_id:          String,
  pub project_id:       String,
  pub schema_container: String,
  pub parent_id:        Option<String>,
  pub created_at:       String,
}

impl RawNode {
  pub fn into_node(self) -> Result<Node> {
    Ok(Node {
      node_id:          decode_uuid(&self.node_id)?,
      project_id:       decode_uuid(&self.project_id)?,
      schema_container: decode_uuid(&self.schema_container)?,
      parent_id:        decode_opt_uuid(self.parent_id)?,
      created_at:       decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read from a `containers` row.
pub struct RawContainer {
  pub container_id:   String,
  pub node_id:        String,
  pub language:       String,
  pub branch_id:      String,
  pub schema_version: String,
  pub version:        String,
  pub previous_id:    Option<String>,
  pub fields_json:    String,
  pub created_at:     String,
  pub editor:         Option<String>,
}

impl RawContainer {
  pub const COLUMNS: &'static str = "container_id, node_id, language, branch_id, \
     schema_version, version, previous_id, fields_json, created_at, editor";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      container_id:   row.get(0)?,
      node_id:        row.get(1)?,
      language:       row.get(2)?,
      branch_id:      row.get(3)?,
      schema_version: row.get(4)?,
      version:        row.get(5)?,
      previous_id:    row.get(6)?,
      fields_json:    row.get(7)?,
      created_at:     row.get(8)?,
      editor:         row.get(9)?,
    })
  }

  pub fn into_container(self) -> Result<ContentContainer> {
    Ok(ContentContainer {
      container_id:   decode_uuid(&self.container_id)?,
      node_id:        decode_uuid(&self.node_id)?,
      language:       self.language,
      branch_id:      decode_uuid(&self.branch_id)?,
      schema_version: decode_uuid(&self.schema_version)?,
      version:        self.version.parse()?,
      previous:       decode_opt_uuid(self.previous_id)?,
      fields:         serde_json::from_str(&self.fields_json)?,
      created_at:     decode_dt(&self.created_at)?,
      editor:         self.editor,
    })
  }
}

pub struct RawHeads {
  pub node_id:      String,
  pub language:     String,
  pub branch_id:    String,
  pub draft_id:     Option<String>,
  pub published_id: Option<String>,
}

impl RawHeads {
  pub fn into_heads(self) -> Result<ContainerHeads> {
    Ok(ContainerHeads {
      node_id:   decode_uuid(&self.node_id)?,
      language:  self.language,
      branch_id: decode_uuid(&self.branch_id)?,
      draft:     decode_opt_uuid(self.draft_id)?,
      published: decode_opt_uuid(self.published_id)?,
    })
  }
}
