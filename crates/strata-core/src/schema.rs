//! Schema snapshots and the container lineage that owns them.
//!
//! A snapshot is an immutable field set. A [`SchemaContainer`] owns the
//! ordered lineage of snapshots in an append-only arena: each
//! [`SchemaVersion`] links to its neighbours by arena index, never by
//! reference, so the lineage has no ownership cycles.

use std::{collections::HashSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
  Error, Result,
  change::{Change, ChangeChain},
};

// ─── Kinds ───────────────────────────────────────────────────────────────────

/// Whether a container describes top-level nodes or embedded micronodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaKind {
  Schema,
  Microschema,
}

impl fmt::Display for SchemaKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Schema => "SCHEMA",
      Self::Microschema => "MICROSCHEMA",
    })
  }
}

// ─── Field types ─────────────────────────────────────────────────────────────

/// Element type of a list field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListItemType {
  String,
  Html,
  Number,
  Boolean,
  Date,
  Node,
  Micronode,
}

impl ListItemType {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::String => "string",
      Self::Html => "html",
      Self::Number => "number",
      Self::Boolean => "boolean",
      Self::Date => "date",
      Self::Node => "node",
      Self::Micronode => "micronode",
    }
  }

  /// The scalar field type a single list element corresponds to.
  pub fn scalar(self) -> FieldType {
    match self {
      Self::String => FieldType::String,
      Self::Html => FieldType::Html,
      Self::Number => FieldType::Number,
      Self::Boolean => FieldType::Boolean,
      Self::Date => FieldType::Date,
      Self::Node => FieldType::Node,
      Self::Micronode => FieldType::Micronode,
    }
  }
}

/// The type tag of a field definition.
///
/// Serialised as a compact string (`"string"`, `"list<micronode>"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
  String,
  Html,
  Number,
  Boolean,
  Date,
  Node,
  Micronode,
  Binary,
  List(ListItemType),
}

impl FieldType {
  pub fn is_list(self) -> bool { matches!(self, Self::List(_)) }

  /// True for fields whose values embed micronodes.
  pub fn holds_micronodes(self) -> bool {
    matches!(self, Self::Micronode | Self::List(ListItemType::Micronode))
  }

  /// The list form of a scalar type, if one exists.
  pub fn as_list(self) -> Option<FieldType> {
    let item = match self {
      Self::String => ListItemType::String,
      Self::Html => ListItemType::Html,
      Self::Number => ListItemType::Number,
      Self::Boolean => ListItemType::Boolean,
      Self::Date => ListItemType::Date,
      Self::Node => ListItemType::Node,
      Self::Micronode => ListItemType::Micronode,
      Self::Binary | Self::List(_) => return None,
    };
    Some(Self::List(item))
  }
}

impl fmt::Display for FieldType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::String => f.write_str("string"),
      Self::Html => f.write_str("html"),
      Self::Number => f.write_str("number"),
      Self::Boolean => f.write_str("boolean"),
      Self::Date => f.write_str("date"),
      Self::Node => f.write_str("node"),
      Self::Micronode => f.write_str("micronode"),
      Self::Binary => f.write_str("binary"),
      Self::List(item) => write!(f, "list<{}>", item.as_str()),
    }
  }
}

impl FromStr for FieldType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let scalar = |name: &str| -> Option<FieldType> {
      Some(match name {
        "string" => FieldType::String,
        "html" => FieldType::Html,
        "number" => FieldType::Number,
        "boolean" => FieldType::Boolean,
        "date" => FieldType::Date,
        "node" => FieldType::Node,
        "micronode" => FieldType::Micronode,
        "binary" => FieldType::Binary,
        _ => return None,
      })
    };

    if let Some(inner) = s.strip_prefix("list<").and_then(|r| r.strip_suffix('>')) {
      return scalar(inner)
        .and_then(FieldType::as_list)
        .ok_or_else(|| Error::InvalidFieldType(s.to_owned()));
    }
    scalar(s).ok_or_else(|| Error::InvalidFieldType(s.to_owned()))
  }
}

impl TryFrom<String> for FieldType {
  type Error = Error;

  fn try_from(s: String) -> Result<Self> { s.parse() }
}

impl From<FieldType> for String {
  fn from(t: FieldType) -> Self { t.to_string() }
}

// ─── Field definitions ───────────────────────────────────────────────────────

/// One field of a schema snapshot. The name is the field's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
  pub name:       String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label:      Option<String>,
  #[serde(default)]
  pub required:   bool,
  #[serde(rename = "type")]
  pub field_type: FieldType,
  /// Allowed schema names for node/micronode fields and lists; allowed values
  /// for string fields. Empty means unrestricted.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub allow:      Vec<String>,
}

impl FieldSchema {
  pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
    Self {
      name: name.into(),
      label: None,
      required: false,
      field_type,
      allow: Vec::new(),
    }
  }

  pub fn required(mut self) -> Self {
    self.required = true;
    self
  }

  pub fn with_label(mut self, label: impl Into<String>) -> Self {
    self.label = Some(label.into());
    self
  }

  pub fn with_allow<I, S>(mut self, allow: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.allow = allow.into_iter().map(Into::into).collect();
    self
  }

  /// True when both definitions agree on everything except the name.
  pub fn same_definition(&self, other: &FieldSchema) -> bool {
    self.field_type == other.field_type
      && self.required == other.required
      && self.label == other.label
      && same_allow(&self.allow, &other.allow)
  }
}

/// Order-insensitive comparison of allow lists.
pub fn same_allow(a: &[String], b: &[String]) -> bool {
  let a: HashSet<&str> = a.iter().map(String::as_str).collect();
  let b: HashSet<&str> = b.iter().map(String::as_str).collect();
  a == b
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// An immutable, versioned description of a field set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
  pub name:          String,
  /// Monotonic per container; version `n` is displayed as `"n.0"`.
  pub version:       u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description:   Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub display_field: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub segment_field: Option<String>,
  /// Nodes of this schema may have children.
  #[serde(default)]
  pub container:     bool,
  pub fields:        Vec<FieldSchema>,
}

impl SchemaSnapshot {
  pub fn new(name: impl Into<String>, version: u32) -> Self {
    Self {
      name: name.into(),
      version,
      description: None,
      display_field: None,
      segment_field: None,
      container: false,
      fields: Vec::new(),
    }
  }

  pub fn with_field(mut self, field: FieldSchema) -> Self {
    self.fields.push(field);
    self
  }

  pub fn field(&self, name: &str) -> Option<&FieldSchema> {
    self.fields.iter().find(|f| f.name == name)
  }

  pub fn version_label(&self) -> String { format!("{}.0", self.version) }

  /// Check internal consistency: a name, unique field keys, and display /
  /// segment fields that exist.
  pub fn validate(&self) -> Result<()> {
    if self.name.trim().is_empty() {
      return Err(Error::InvalidSnapshot("schema name is empty".into()));
    }
    let mut seen = HashSet::new();
    for field in &self.fields {
      if field.name.trim().is_empty() {
        return Err(Error::InvalidSnapshot("field with empty name".into()));
      }
      if !seen.insert(field.name.as_str()) {
        return Err(Error::InvalidSnapshot(format!(
          "duplicate field {:?}",
          field.name
        )));
      }
    }
    for (what, designated) in [
      ("display", &self.display_field),
      ("segment", &self.segment_field),
    ] {
      if let Some(name) = designated
        && self.field(name).is_none()
      {
        return Err(Error::InvalidSnapshot(format!(
          "{what} field {name:?} is not defined"
        )));
      }
    }
    Ok(())
  }

  /// SHA-256 over the canonical JSON form, excluding the version number.
  ///
  /// Two snapshots with the same fingerprint describe the same content shape.
  pub fn fingerprint(&self) -> Result<String> {
    let mut canonical = self.clone();
    canonical.version = 0;
    for field in &mut canonical.fields {
      field.allow.sort();
    }
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
  }
}

// ─── Lineage ─────────────────────────────────────────────────────────────────

/// Points at one version of one schema or microschema container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersionRef {
  pub container: Uuid,
  pub version:   Uuid,
}

/// One entry in a container's lineage arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVersion {
  pub uuid:       Uuid,
  pub index:      usize,
  pub snapshot:   SchemaSnapshot,
  pub previous:   Option<usize>,
  pub next:       Option<usize>,
  /// The change set leading from `previous` into this version.
  pub changes:    Vec<Change>,
  pub created_at: DateTime<Utc>,
}

/// A named lineage of snapshots with a pointer to the latest one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaContainer {
  pub uuid:       Uuid,
  pub kind:       SchemaKind,
  pub versions:   Vec<SchemaVersion>,
  pub latest:     usize,
  pub created_at: DateTime<Utc>,
}

impl SchemaContainer {
  /// Start a lineage with `snapshot` as its first version.
  pub fn new(kind: SchemaKind, snapshot: SchemaSnapshot) -> Result<Self> {
    snapshot.validate()?;
    let now = Utc::now();
    Ok(Self {
      uuid: Uuid::new_v4(),
      kind,
      versions: vec![SchemaVersion {
        uuid: Uuid::new_v4(),
        index: 0,
        snapshot,
        previous: None,
        next: None,
        changes: Vec::new(),
        created_at: now,
      }],
      latest: 0,
      created_at: now,
    })
  }

  /// The container's current name is the latest snapshot's name.
  pub fn name(&self) -> &str { &self.latest_version().snapshot.name }

  pub fn latest_version(&self) -> &SchemaVersion { &self.versions[self.latest] }

  pub fn version(&self, uuid: Uuid) -> Option<&SchemaVersion> {
    self.versions.iter().find(|v| v.uuid == uuid)
  }

  pub fn version_ref(&self, version: &SchemaVersion) -> SchemaVersionRef {
    SchemaVersionRef { container: self.uuid, version: version.uuid }
  }

  /// Append `snapshot` after the latest version, recording `changes` as the
  /// incoming change set. The snapshot's version must exceed the latest one.
  pub fn append(
    &mut self,
    snapshot: SchemaSnapshot,
    changes: Vec<Change>,
  ) -> Result<&SchemaVersion> {
    snapshot.validate()?;
    let latest = self.latest_version();
    if snapshot.version <= latest.snapshot.version {
      return Err(Error::StaleVersion {
        latest:   latest.snapshot.version,
        proposed: snapshot.version,
      });
    }

    let index = self.versions.len();
    let previous = self.latest;
    self.versions.push(SchemaVersion {
      uuid: Uuid::new_v4(),
      index,
      snapshot,
      previous: Some(previous),
      next: None,
      changes,
      created_at: Utc::now(),
    });
    self.versions[previous].next = Some(index);
    self.latest = index;
    Ok(&self.versions[index])
  }

  /// Collect the change chain from `from` to `to` by following `next` links.
  ///
  /// `from == to` yields an empty chain. A target that is not reachable
  /// forwards (including any earlier version) has no path.
  pub fn chain(&self, from: Uuid, to: Uuid) -> Result<ChangeChain> {
    let start = self.version(from).ok_or(Error::VersionNotFound(from))?.index;
    let end = self.version(to).ok_or(Error::VersionNotFound(to))?.index;

    let mut changes = Vec::new();
    let mut cursor = start;
    let mut hops = 0;
    while cursor != end {
      let next = self.versions[cursor]
        .next
        .filter(|_| hops < self.versions.len())
        .ok_or(Error::NoMigrationPath { from, to })?;
      changes.extend(self.versions[next].changes.iter().cloned());
      cursor = next;
      hops += 1;
    }

    Ok(ChangeChain { from, to, changes })
  }
}
