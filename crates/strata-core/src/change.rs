//! The change vocabulary between two schema snapshots.
//!
//! A [`SchemaChange`] is one atomic, field-level (or container-level)
//! modification. A [`Change`] pairs it with an optional custom migration
//! expression, and a [`ChangeChain`] is the ordered sequence of changes
//! between two versions of one container.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error, Result,
  schema::{FieldSchema, FieldType, SchemaSnapshot},
};

// ─── Changes ─────────────────────────────────────────────────────────────────

/// One atomic change. Optional properties carry only what differs; an empty
/// string on an optional text property clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaChange {
  AddField {
    field: FieldSchema,
    /// Insert after this field; `None` inserts first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    after: Option<String>,
  },
  RemoveField {
    field: String,
  },
  RenameField {
    field:    String,
    new_name: String,
  },
  UpdateField {
    field:    String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label:    Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow:    Option<Vec<String>>,
  },
  /// Also carries any label or required difference, so a retyped field
  /// needs no separate update.
  ChangeFieldType {
    field:    String,
    new_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label:    Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow:    Option<Vec<String>>,
  },
  UpdateSchema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name:          Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description:   Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    display_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    segment_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container:     Option<bool>,
  },
}

/// Discriminant of a [`SchemaChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
  AddField,
  RemoveField,
  RenameField,
  UpdateField,
  ChangeFieldType,
  UpdateSchema,
}

impl fmt::Display for ChangeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::AddField => "ADD_FIELD",
      Self::RemoveField => "REMOVE_FIELD",
      Self::RenameField => "RENAME_FIELD",
      Self::UpdateField => "UPDATE_FIELD",
      Self::ChangeFieldType => "CHANGE_FIELD_TYPE",
      Self::UpdateSchema => "UPDATE_SCHEMA",
    })
  }
}

impl SchemaChange {
  pub fn kind(&self) -> ChangeKind {
    match self {
      Self::AddField { .. } => ChangeKind::AddField,
      Self::RemoveField { .. } => ChangeKind::RemoveField,
      Self::RenameField { .. } => ChangeKind::RenameField,
      Self::UpdateField { .. } => ChangeKind::UpdateField,
      Self::ChangeFieldType { .. } => ChangeKind::ChangeFieldType,
      Self::UpdateSchema { .. } => ChangeKind::UpdateSchema,
    }
  }

  /// The field this change targets, as named in the source snapshot (the new
  /// field's name for additions). `None` for container-level changes.
  pub fn field(&self) -> Option<&str> {
    match self {
      Self::AddField { field, .. } => Some(&field.name),
      Self::RemoveField { field }
      | Self::RenameField { field, .. }
      | Self::UpdateField { field, .. }
      | Self::ChangeFieldType { field, .. } => Some(field),
      Self::UpdateSchema { .. } => None,
    }
  }
}

impl fmt::Display for SchemaChange {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.field() {
      Some(field) => write!(f, "{} {field:?}", self.kind()),
      None => write!(f, "{}", self.kind()),
    }
  }
}

/// A change plus an optional custom migration expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
  pub change: SchemaChange,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub script: Option<String>,
}

impl Change {
  pub fn new(change: SchemaChange) -> Self { Self { change, script: None } }

  pub fn with_script(mut self, script: impl Into<String>) -> Self {
    self.script = Some(script.into());
    self
  }
}

impl From<SchemaChange> for Change {
  fn from(change: SchemaChange) -> Self { Self::new(change) }
}

/// The ordered changes leading from version `from` to version `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeChain {
  pub from:    Uuid,
  pub to:      Uuid,
  pub changes: Vec<Change>,
}

impl ChangeChain {
  pub fn is_empty(&self) -> bool { self.changes.is_empty() }
}

// ─── Structural application ──────────────────────────────────────────────────

fn text_or_clear(value: &str) -> Option<String> {
  (!value.is_empty()).then(|| value.to_owned())
}

fn field_index(snapshot: &SchemaSnapshot, name: &str) -> Result<usize> {
  snapshot
    .fields
    .iter()
    .position(|f| f.name == name)
    .ok_or_else(|| Error::FieldNotFound(name.to_owned()))
}

/// Apply `changes` in order to a copy of `snapshot`'s field set and
/// container properties. The version number is left untouched.
pub fn apply_changes<'a, I>(
  snapshot: &SchemaSnapshot,
  changes: I,
) -> Result<SchemaSnapshot>
where
  I: IntoIterator<Item = &'a SchemaChange>,
{
  let mut out = snapshot.clone();

  for change in changes {
    match change {
      SchemaChange::AddField { field, after } => {
        if out.field(&field.name).is_some() {
          return Err(Error::FieldExists(field.name.clone()));
        }
        let at = match after {
          Some(after) => out
            .fields
            .iter()
            .position(|f| &f.name == after)
            .map_or(out.fields.len(), |i| i + 1),
          None => 0,
        };
        out.fields.insert(at, field.clone());
      }
      SchemaChange::RemoveField { field } => {
        let i = field_index(&out, field)?;
        out.fields.remove(i);
      }
      SchemaChange::RenameField { field, new_name } => {
        if out.field(new_name).is_some() {
          return Err(Error::FieldExists(new_name.clone()));
        }
        let i = field_index(&out, field)?;
        out.fields[i].name = new_name.clone();
        for designated in [&mut out.display_field, &mut out.segment_field] {
          if designated.as_deref() == Some(field.as_str()) {
            *designated = Some(new_name.clone());
          }
        }
      }
      SchemaChange::UpdateField { field, label, required, allow } => {
        let i = field_index(&out, field)?;
        let target = &mut out.fields[i];
        if let Some(label) = label {
          target.label = text_or_clear(label);
        }
        if let Some(required) = required {
          target.required = *required;
        }
        if let Some(allow) = allow {
          target.allow = allow.clone();
        }
      }
      SchemaChange::ChangeFieldType { field, new_type, label, required, allow } => {
        let i = field_index(&out, field)?;
        let target = &mut out.fields[i];
        target.field_type = *new_type;
        if let Some(label) = label {
          target.label = text_or_clear(label);
        }
        if let Some(required) = required {
          target.required = *required;
        }
        if let Some(allow) = allow {
          target.allow = allow.clone();
        }
      }
      SchemaChange::UpdateSchema {
        name,
        description,
        display_field,
        segment_field,
        container,
      } => {
        if let Some(name) = name {
          out.name = name.clone();
        }
        if let Some(description) = description {
          out.description = text_or_clear(description);
        }
        if let Some(display_field) = display_field {
          out.display_field = text_or_clear(display_field);
        }
        if let Some(segment_field) = segment_field {
          out.segment_field = text_or_clear(segment_field);
        }
        if let Some(container) = container {
          out.container = *container;
        }
      }
    }
  }

  Ok(out)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn base() -> SchemaSnapshot {
    SchemaSnapshot::new("article", 1)
      .with_field(FieldSchema::new("title", FieldType::String))
      .with_field(FieldSchema::new("body", FieldType::Html))
  }

  #[test]
  fn change_serializes_with_op_tag() {
    let change = Change::new(SchemaChange::RenameField {
      field:    "title".into(),
      new_name: "headline".into(),
    })
    .with_script("value => upper(value)");

    let json = serde_json::to_value(&change).unwrap();
    assert_eq!(json["change"]["op"], "rename_field");
    assert_eq!(json["change"]["new_name"], "headline");
    assert_eq!(json["script"], "value => upper(value)");

    let back: Change = serde_json::from_value(json).unwrap();
    assert_eq!(back, change);
  }

  #[test]
  fn kind_display_is_screaming() {
    let c = SchemaChange::RemoveField { field: "x".into() };
    assert_eq!(c.kind().to_string(), "REMOVE_FIELD");
    assert_eq!(c.to_string(), "REMOVE_FIELD \"x\"");
  }

  #[test]
  fn add_field_respects_after() {
    let out = apply_changes(&base(), &[SchemaChange::AddField {
      field: FieldSchema::new("teaser", FieldType::String),
      after: Some("title".into()),
    }])
    .unwrap();
    let names: Vec<_> = out.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["title", "teaser", "body"]);
  }

  #[test]
  fn rename_moves_display_field() {
    let mut snapshot = base();
    snapshot.display_field = Some("title".into());
    let out = apply_changes(&snapshot, &[SchemaChange::RenameField {
      field:    "title".into(),
      new_name: "headline".into(),
    }])
    .unwrap();
    assert_eq!(out.display_field.as_deref(), Some("headline"));
    assert!(out.field("title").is_none());
  }

  #[test]
  fn structural_errors() {
    let missing = apply_changes(&base(), &[SchemaChange::RemoveField {
      field: "nope".into(),
    }]);
    assert!(matches!(missing, Err(Error::FieldNotFound(_))));

    let clash = apply_changes(&base(), &[SchemaChange::RenameField {
      field:    "title".into(),
      new_name: "body".into(),
    }]);
    assert!(matches!(clash, Err(Error::FieldExists(_))));
  }

  #[test]
  fn empty_label_clears() {
    let snapshot = SchemaSnapshot::new("a", 1)
      .with_field(FieldSchema::new("x", FieldType::Number).with_label("X"));
    let out = apply_changes(&snapshot, &[SchemaChange::UpdateField {
      field:    "x".into(),
      label:    Some(String::new()),
      required: Some(true),
      allow:    None,
    }])
    .unwrap();
    assert_eq!(out.fields[0].label, None);
    assert!(out.fields[0].required);
  }
}
