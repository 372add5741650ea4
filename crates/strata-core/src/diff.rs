//! The schema comparator.
//!
//! [`diff`] turns two snapshots into the ordered list of atomic changes that
//! leads from the first to the second. Fields are matched by name; their
//! position in the snapshot is not a signal.

use std::collections::HashMap;

use crate::{
  change::SchemaChange,
  schema::{FieldSchema, SchemaSnapshot, same_allow},
};

/// Compute the changes leading from `a` to `b`.
///
/// Output order: removals, renames, type changes, field updates, additions,
/// then at most one container-level update.
pub fn diff(a: &SchemaSnapshot, b: &SchemaSnapshot) -> Vec<SchemaChange> {
  let in_a: HashMap<&str, &FieldSchema> =
    a.fields.iter().map(|f| (f.name.as_str(), f)).collect();
  let in_b: HashMap<&str, &FieldSchema> =
    b.fields.iter().map(|f| (f.name.as_str(), f)).collect();

  let mut only_a: Vec<&FieldSchema> =
    a.fields.iter().filter(|f| !in_b.contains_key(f.name.as_str())).collect();
  let mut only_b: Vec<&FieldSchema> =
    b.fields.iter().filter(|f| !in_a.contains_key(f.name.as_str())).collect();

  // Pair identical definitions under different names, first come first served.
  let mut renames = Vec::new();
  only_a.retain(|old| {
    match only_b.iter().position(|new| old.same_definition(new)) {
      Some(i) => {
        let new = only_b.remove(i);
        renames.push(SchemaChange::RenameField {
          field:    old.name.clone(),
          new_name: new.name.clone(),
        });
        false
      }
      None => true,
    }
  });

  let mut type_changes = Vec::new();
  let mut updates = Vec::new();
  for old in &a.fields {
    let Some(new) = in_b.get(old.name.as_str()) else {
      continue;
    };
    let allow_differs = !same_allow(&old.allow, &new.allow);

    if old.field_type != new.field_type {
      type_changes.push(SchemaChange::ChangeFieldType {
        field:    old.name.clone(),
        new_type: new.field_type,
        label:    (old.label != new.label).then(|| new.label.clone().unwrap_or_default()),
        required: (old.required != new.required).then_some(new.required),
        allow:    allow_differs.then(|| new.allow.clone()),
      });
    } else if let Some(update) = field_update(old, new, allow_differs) {
      updates.push(update);
    }
  }

  let mut changes: Vec<SchemaChange> = only_a
    .into_iter()
    .map(|f| SchemaChange::RemoveField { field: f.name.clone() })
    .collect();
  changes.extend(renames);
  changes.extend(type_changes);
  changes.extend(updates);
  changes.extend(only_b.into_iter().map(|f| SchemaChange::AddField {
    field: f.clone(),
    after: preceding_field(b, &f.name),
  }));
  changes.extend(schema_update(a, b));
  changes
}

/// An `UpdateField` carrying only the properties that differ, or `None`.
fn field_update(
  old: &FieldSchema,
  new: &FieldSchema,
  include_allow: bool,
) -> Option<SchemaChange> {
  let label = (old.label != new.label)
    .then(|| new.label.clone().unwrap_or_default());
  let required = (old.required != new.required).then_some(new.required);
  let allow = include_allow.then(|| new.allow.clone());

  if label.is_none() && required.is_none() && allow.is_none() {
    return None;
  }
  Some(SchemaChange::UpdateField {
    field: old.name.clone(),
    label,
    required,
    allow,
  })
}

fn preceding_field(snapshot: &SchemaSnapshot, name: &str) -> Option<String> {
  let i = snapshot.fields.iter().position(|f| f.name == name)?;
  i.checked_sub(1).map(|p| snapshot.fields[p].name.clone())
}

fn schema_update(a: &SchemaSnapshot, b: &SchemaSnapshot) -> Option<SchemaChange> {
  fn text(old: &Option<String>, new: &Option<String>) -> Option<String> {
    (old != new).then(|| new.clone().unwrap_or_default())
  }

  let name = (a.name != b.name).then(|| b.name.clone());
  let description = text(&a.description, &b.description);
  let display_field = text(&a.display_field, &b.display_field);
  let segment_field = text(&a.segment_field, &b.segment_field);
  let container = (a.container != b.container).then_some(b.container);

  if name.is_none()
    && description.is_none()
    && display_field.is_none()
    && segment_field.is_none()
    && container.is_none()
  {
    return None;
  }
  Some(SchemaChange::UpdateSchema {
    name,
    description,
    display_field,
    segment_field,
    container,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    change::{ChangeKind, apply_changes},
    schema::{FieldType, ListItemType},
  };

  fn snapshot(fields: Vec<FieldSchema>) -> SchemaSnapshot {
    let mut s = SchemaSnapshot::new("content", 1);
    s.fields = fields;
    s
  }

  fn kinds(changes: &[SchemaChange]) -> Vec<ChangeKind> {
    changes.iter().map(SchemaChange::kind).collect()
  }

  #[test]
  fn identical_snapshots_have_no_changes() {
    let a = snapshot(vec![
      FieldSchema::new("title", FieldType::String).required(),
      FieldSchema::new("tags", FieldType::List(ListItemType::String)),
    ]);
    assert!(diff(&a, &a.clone()).is_empty());
  }

  #[test]
  fn field_order_is_not_a_change() {
    let a = snapshot(vec![
      FieldSchema::new("x", FieldType::String),
      FieldSchema::new("y", FieldType::Number),
    ]);
    let b = snapshot(vec![
      FieldSchema::new("y", FieldType::Number),
      FieldSchema::new("x", FieldType::String),
    ]);
    assert!(diff(&a, &b).is_empty());
  }

  #[test]
  fn allow_order_is_not_a_change() {
    let a = snapshot(vec![
      FieldSchema::new("ref", FieldType::Node).with_allow(["folder", "page"]),
    ]);
    let b = snapshot(vec![
      FieldSchema::new("ref", FieldType::Node).with_allow(["page", "folder"]),
    ]);
    assert!(diff(&a, &b).is_empty());
  }

  #[test]
  fn pure_rename() {
    let a = snapshot(vec![FieldSchema::new("name", FieldType::String)]);
    let b = snapshot(vec![FieldSchema::new("title", FieldType::String)]);
    assert_eq!(diff(&a, &b), vec![SchemaChange::RenameField {
      field:    "name".into(),
      new_name: "title".into(),
    }]);
  }

  #[test]
  fn update_carries_only_differing_properties() {
    let a = snapshot(vec![
      FieldSchema::new("ref", FieldType::Node)
        .with_label("Reference")
        .with_allow(["folder"]),
    ]);
    let b = snapshot(vec![
      FieldSchema::new("ref", FieldType::Node)
        .with_label("Reference")
        .with_allow(["folder", "page"]),
    ]);
    assert_eq!(diff(&a, &b), vec![SchemaChange::UpdateField {
      field:    "ref".into(),
      label:    None,
      required: None,
      allow:    Some(vec!["folder".into(), "page".into()]),
    }]);
  }

  #[test]
  fn label_change_is_an_update() {
    let a = snapshot(vec![FieldSchema::new("x", FieldType::String).with_label("X")]);
    let b = snapshot(vec![FieldSchema::new("x", FieldType::String)]);
    assert_eq!(diff(&a, &b), vec![SchemaChange::UpdateField {
      field:    "x".into(),
      label:    Some(String::new()),
      required: None,
      allow:    None,
    }]);
  }

  #[test]
  fn type_change_replaces_update() {
    let a = snapshot(vec![FieldSchema::new("n", FieldType::Number).with_allow(["a"])]);
    let b = snapshot(vec![FieldSchema::new("n", FieldType::String).with_allow(["b"])]);
    assert_eq!(diff(&a, &b), vec![SchemaChange::ChangeFieldType {
      field:    "n".into(),
      new_type: FieldType::String,
      label:    None,
      required: None,
      allow:    Some(vec!["b".into()]),
    }]);
  }

  #[test]
  fn type_change_carries_property_differences() {
    let a = snapshot(vec![FieldSchema::new("n", FieldType::Number).with_label("N")]);
    let b = snapshot(vec![FieldSchema::new("n", FieldType::String).with_label("Name").required()]);
    let changes = diff(&a, &b);
    assert_eq!(changes, vec![SchemaChange::ChangeFieldType {
      field:    "n".into(),
      new_type: FieldType::String,
      label:    Some("Name".into()),
      required: Some(true),
      allow:    None,
    }]);
    assert_eq!(apply_changes(&a, &changes).unwrap().fields, b.fields);
  }

  #[test]
  fn output_is_ordered_by_kind() {
    let a = snapshot(vec![
      FieldSchema::new("gone", FieldType::Boolean),
      FieldSchema::new("old", FieldType::Date),
      FieldSchema::new("n", FieldType::Number),
      FieldSchema::new("s", FieldType::String),
    ]);
    let mut b = snapshot(vec![
      FieldSchema::new("added", FieldType::Binary),
      FieldSchema::new("s", FieldType::String).required(),
      FieldSchema::new("n", FieldType::Html),
      FieldSchema::new("new", FieldType::Date),
    ]);
    b.container = true;

    let changes = diff(&a, &b);
    assert_eq!(kinds(&changes), [
      ChangeKind::RemoveField,
      ChangeKind::RenameField,
      ChangeKind::ChangeFieldType,
      ChangeKind::UpdateField,
      ChangeKind::AddField,
      ChangeKind::UpdateSchema,
    ]);
    assert_eq!(changes[4], SchemaChange::AddField {
      field: FieldSchema::new("added", FieldType::Binary),
      after: None,
    });
  }

  #[test]
  fn applying_the_diff_reaches_the_target_field_set() {
    let a = snapshot(vec![
      FieldSchema::new("title", FieldType::String).required(),
      FieldSchema::new("count", FieldType::Number),
      FieldSchema::new("legacy", FieldType::Html),
    ]);
    let mut b = snapshot(vec![
      FieldSchema::new("headline", FieldType::String).required(),
      FieldSchema::new("count", FieldType::String).with_label("Count"),
      FieldSchema::new("published", FieldType::Date),
    ]);
    b.name = "story".into();
    b.display_field = Some("headline".into());

    let changes = diff(&a, &b);
    let applied = apply_changes(&a, &changes).unwrap();
    assert!(diff(&applied, &b).is_empty());
  }
}
