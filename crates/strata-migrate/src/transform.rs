//! Applies a change chain to the field map of one container or micronode.
//!
//! The chain is prepared once per run: every change is paired with the field
//! set it produces (so results can be checked against the right type) and
//! its custom expression, compiled up front. Preparing never fails; a broken
//! chain or an expression that does not compile surfaces as a
//! [`TransformError`] on each entity it would have touched.

use serde_json::Value;
use strata_core::{
  change::{Change, SchemaChange, apply_changes},
  content::{FieldMap, FieldValue, ListValue, Micronode},
  convert::convert,
  schema::SchemaSnapshot,
};
use strata_script::{Limits, Script};
use uuid::Uuid;

use crate::error::TransformError;

struct Step {
  change: SchemaChange,
  script: Option<Result<Script, String>>,
  /// Field set after this change.
  after:  SchemaSnapshot,
}

pub struct Transformer {
  steps:  Vec<Step>,
  broken: Option<String>,
}

impl Transformer {
  /// Prepare `changes`, which lead away from `source`.
  pub fn new(source: &SchemaSnapshot, changes: &[Change], limits: &Limits) -> Self {
    let mut steps = Vec::with_capacity(changes.len());
    let mut current = source.clone();
    for change in changes {
      let after = match apply_changes(&current, [&change.change]) {
        Ok(after) => after,
        Err(e) => {
          return Self { steps, broken: Some(format!("{}: {e}", change.change)) };
        }
      };
      let script = change
        .script
        .as_deref()
        .map(|src| Script::compile(src, limits).map_err(|e| e.to_string()));
      steps.push(Step { change: change.change.clone(), script, after: after.clone() });
      current = after;
    }
    Self { steps, broken: None }
  }

  pub fn is_empty(&self) -> bool { self.steps.is_empty() && self.broken.is_none() }

  /// Run every change over a copy of `fields`.
  pub fn apply(&self, fields: &FieldMap) -> Result<FieldMap, TransformError> {
    if let Some(reason) = &self.broken {
      return Err(TransformError::Structure(reason.clone()));
    }
    let mut fields = fields.clone();
    for step in &self.steps {
      step.apply(&mut fields)?;
    }
    Ok(fields)
  }

  /// Migrate the micronodes in `fields` that are on version `from`,
  /// re-pointing them at `to`. Micronodes on any other version are left
  /// untouched, even inside the same list.
  pub fn apply_to_micronodes(
    &self,
    fields: &FieldMap,
    from: Uuid,
    to: Uuid,
  ) -> Result<FieldMap, TransformError> {
    let mut out = fields.clone();
    for value in out.values_mut() {
      match value {
        FieldValue::Micronode(m) => self.migrate_micronode(m, from, to)?,
        FieldValue::List(ListValue::Micronode(list)) => {
          for m in list.iter_mut() {
            self.migrate_micronode(m, from, to)?;
          }
        }
        _ => {}
      }
    }
    Ok(out)
  }

  fn migrate_micronode(
    &self,
    micronode: &mut Micronode,
    from: Uuid,
    to: Uuid,
  ) -> Result<(), TransformError> {
    if micronode.microschema.version == from {
      micronode.fields = self.apply(&micronode.fields)?;
      micronode.microschema.version = to;
    }
    Ok(())
  }
}

impl Step {
  fn apply(&self, fields: &mut FieldMap) -> Result<(), TransformError> {
    match &self.change {
      SchemaChange::AddField { field, .. } => {
        fields.remove(&field.name);
        self.put(fields, &field.name, None)?;
      }
      SchemaChange::RemoveField { field } => {
        fields.remove(field);
      }
      SchemaChange::RenameField { field, new_name } => {
        if let Some(old) = fields.remove(field) {
          self.put(fields, new_name, Some(&old))?;
        }
      }
      SchemaChange::UpdateField { field, .. } => {
        if let Some(old) = fields.remove(field) {
          self.put(fields, field, Some(&old))?;
        }
      }
      SchemaChange::ChangeFieldType { field, new_type, .. } => {
        if let Some(old) = fields.remove(field) {
          if self.script.is_some() {
            self.put(fields, field, Some(&old))?;
          } else if let Some(converted) = convert(&old, *new_type) {
            fields.insert(field.clone(), converted);
          }
        }
      }
      SchemaChange::UpdateSchema { .. } => {}
    }
    Ok(())
  }

  /// Store the value for `name`: the expression's result when there is one,
  /// else `old` unchanged. An absent result leaves the field unset.
  fn put(
    &self,
    fields: &mut FieldMap,
    name: &str,
    old: Option<&FieldValue>,
  ) -> Result<(), TransformError> {
    let value = match &self.script {
      None => old.cloned(),
      Some(script) => self.run(script, name, old)?,
    };
    if let Some(value) = value {
      fields.insert(name.to_owned(), value);
    }
    Ok(())
  }

  fn run(
    &self,
    script: &Result<Script, String>,
    name: &str,
    old: Option<&FieldValue>,
  ) -> Result<Option<FieldValue>, TransformError> {
    let change = || self.change.to_string();
    let script = script
      .as_ref()
      .map_err(|message| TransformError::Compile { change: change(), message: message.clone() })?;

    let input = old.map_or(Value::Null, FieldValue::to_json);
    let output = script.eval(&input, name).map_err(|source| {
      if source.is_violation() {
        TransformError::Sandbox { change: change(), field: name.to_owned(), source }
      } else {
        TransformError::Script { change: change(), field: name.to_owned(), source }
      }
    })?;

    let field_type = self
      .after
      .field(name)
      .map(|f| f.field_type)
      .ok_or_else(|| TransformError::Structure(format!("{}: no field {name:?}", change())))?;
    let value = FieldValue::from_json(name, field_type, &output)
      .map_err(|source| TransformError::Shape { change: change(), source })?;

    if let (Some(before), Some(after)) = (old, &value) {
      keeps_identity(name, before, after)?;
    }
    Ok(value)
  }
}

/// Every micronode in `after` must be one of `before`'s, with the same
/// microschema reference.
fn keeps_identity(
  field: &str,
  before: &FieldValue,
  after: &FieldValue,
) -> Result<(), TransformError> {
  let original = before.micronodes();
  for m in after.micronodes() {
    let kept = original
      .iter()
      .any(|o| o.uuid == m.uuid && o.microschema == m.microschema);
    if !kept {
      return Err(TransformError::MicronodeIdentity { field: field.to_owned(), uuid: m.uuid });
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use strata_core::schema::{FieldSchema, FieldType, ListItemType, SchemaVersionRef};

  use super::*;

  fn source() -> SchemaSnapshot {
    SchemaSnapshot::new("article", 1)
      .with_field(FieldSchema::new("title", FieldType::String))
      .with_field(FieldSchema::new("count", FieldType::Number))
  }

  fn fields() -> FieldMap {
    FieldMap::from([
      ("title".to_owned(), FieldValue::String("first content".into())),
      ("count".to_owned(), FieldValue::Number(3.0)),
    ])
  }

  fn transformer(changes: Vec<Change>) -> Transformer {
    Transformer::new(&source(), &changes, &Limits::default())
  }

  fn update(field: &str) -> SchemaChange {
    SchemaChange::UpdateField { field: field.into(), label: Some("L".into()), required: None, allow: None }
  }

  #[test]
  fn update_runs_the_expression() {
    let t = transformer(vec![
      Change::new(update("title")).with_script("value => \"modified \" + value"),
    ]);
    let out = t.apply(&fields()).unwrap();
    assert_eq!(out["title"], FieldValue::String("modified first content".into()));
    assert_eq!(out["count"], FieldValue::Number(3.0));
  }

  #[test]
  fn rename_moves_the_value() {
    let t = transformer(vec![Change::new(SchemaChange::RenameField {
      field:    "title".into(),
      new_name: "headline".into(),
    })]);
    let out = t.apply(&fields()).unwrap();
    assert!(!out.contains_key("title"));
    assert_eq!(out["headline"], FieldValue::String("first content".into()));
  }

  #[test]
  fn remove_drops_and_add_starts_empty() {
    let t = transformer(vec![
      Change::new(SchemaChange::RemoveField { field: "count".into() }),
      Change::new(SchemaChange::AddField {
        field: FieldSchema::new("summary", FieldType::String),
        after: Some("title".into()),
      }),
    ]);
    let out = t.apply(&fields()).unwrap();
    assert_eq!(out.len(), 1);
    assert!(out.contains_key("title"));
  }

  #[test]
  fn add_expression_receives_null() {
    let t = transformer(vec![
      Change::new(SchemaChange::AddField {
        field: FieldSchema::new("summary", FieldType::String),
        after: None,
      })
      .with_script("(v, f) => v == null ? 'new ' + f : 'unexpected'"),
    ]);
    let out = t.apply(&fields()).unwrap();
    assert_eq!(out["summary"], FieldValue::String("new summary".into()));
  }

  #[test]
  fn absent_fields_skip_the_expression() {
    let t = transformer(vec![Change::new(update("title")).with_script("fail('ran')")]);
    let out = t.apply(&FieldMap::new()).unwrap();
    assert!(out.is_empty());
  }

  #[test]
  fn type_change_converts_by_default() {
    let t = transformer(vec![Change::new(SchemaChange::ChangeFieldType {
      field:    "count".into(),
      new_type: FieldType::String,
      label:    None,
      required: None,
      allow:    None,
    })]);
    let out = t.apply(&fields()).unwrap();
    assert_eq!(out["count"], FieldValue::String("3".into()));

    let t = transformer(vec![Change::new(SchemaChange::ChangeFieldType {
      field:    "title".into(),
      new_type: FieldType::Number,
      label:    None,
      required: None,
      allow:    None,
    })]);
    let out = t.apply(&fields()).unwrap();
    assert!(!out.contains_key("title"));
  }

  #[test]
  fn type_change_with_expression_is_shape_checked() {
    let t = transformer(vec![
      Change::new(SchemaChange::ChangeFieldType {
        field:    "count".into(),
        new_type: FieldType::List(ListItemType::Number),
        label:    None,
        required: None,
        allow:    None,
      })
      .with_script("v => [v, v * 2]"),
    ]);
    let out = t.apply(&fields()).unwrap();
    assert_eq!(out["count"].field_type(), FieldType::List(ListItemType::Number));

    let bad = transformer(vec![Change::new(update("count")).with_script("v => 'text'")]);
    assert!(matches!(bad.apply(&fields()), Err(TransformError::Shape { .. })));
  }

  #[test]
  fn expression_errors_are_classified() {
    let compile = transformer(vec![Change::new(update("title")).with_script("value +")]);
    assert!(matches!(compile.apply(&fields()), Err(TransformError::Compile { .. })));

    let failed = transformer(vec![Change::new(update("title")).with_script("fail('no')")]);
    assert!(matches!(failed.apply(&fields()), Err(TransformError::Script { .. })));

    let limits = Limits { max_steps: 3, ..Limits::default() };
    let changes = vec![Change::new(update("title")).with_script("v => v + v + v + v")];
    let sandboxed = Transformer::new(&source(), &changes, &limits);
    assert!(matches!(sandboxed.apply(&fields()), Err(TransformError::Sandbox { .. })));
  }

  #[test]
  fn inapplicable_chain_is_a_structure_error() {
    let t = transformer(vec![Change::new(SchemaChange::RemoveField { field: "missing".into() })]);
    assert!(matches!(t.apply(&fields()), Err(TransformError::Structure(_))));
  }

  #[test]
  fn only_micronodes_on_source_version_migrate() {
    let (container, from, to, other) =
      (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let micronode = |version: Uuid, text: &str| Micronode {
      uuid:        Uuid::new_v4(),
      microschema: SchemaVersionRef { container, version },
      fields:      FieldMap::from([("title".to_owned(), FieldValue::String(text.into()))]),
    };
    let list = vec![micronode(from, "a"), micronode(other, "b"), micronode(from, "c")];
    let input = FieldMap::from([(
      "blocks".to_owned(),
      FieldValue::List(ListValue::Micronode(list.clone())),
    )]);

    let t = transformer(vec![Change::new(update("title")).with_script("v => upper(v)")]);
    let out = t.apply_to_micronodes(&input, from, to).unwrap();
    let FieldValue::List(ListValue::Micronode(migrated)) = &out["blocks"] else {
      panic!("list kept its type");
    };

    assert_eq!(migrated[0].uuid, list[0].uuid);
    assert_eq!(migrated[0].microschema.version, to);
    assert_eq!(migrated[0].fields["title"], FieldValue::String("A".into()));
    assert_eq!(migrated[1], list[1]);
    assert_eq!(migrated[2].fields["title"], FieldValue::String("C".into()));
  }

  #[test]
  fn micronode_identity_is_enforced() {
    let reference = SchemaVersionRef { container: Uuid::new_v4(), version: Uuid::new_v4() };
    let original = Micronode { uuid: Uuid::new_v4(), microschema: reference, fields: FieldMap::new() };
    let source = SchemaSnapshot::new("page", 1)
      .with_field(FieldSchema::new("hero", FieldType::Micronode));
    let input = FieldMap::from([("hero".to_owned(), FieldValue::Micronode(original.clone()))]);

    let forged = format!(
      "v => {{ uuid: '{}', microschema: v.microschema, fields: {{}} }}",
      Uuid::new_v4()
    );
    let changes = vec![Change::new(update("hero")).with_script(forged)];
    let t = Transformer::new(&source, &changes, &Limits::default());
    assert!(matches!(t.apply(&input), Err(TransformError::MicronodeIdentity { .. })));

    let changes = vec![Change::new(update("hero")).with_script("v => v")];
    let t = Transformer::new(&source, &changes, &Limits::default());
    assert_eq!(t.apply(&input).unwrap()["hero"], FieldValue::Micronode(original));
  }
}
