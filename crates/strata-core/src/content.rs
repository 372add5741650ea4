//! Content entities and their versioned, copy-on-write containers.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
  Error, Result,
  schema::{FieldType, ListItemType, SchemaVersionRef},
  versioning::VersionNumber,
};

/// Field values keyed by field name.
pub type FieldMap = BTreeMap<String, FieldValue>;

// ─── Values ──────────────────────────────────────────────────────────────────

/// Metadata of a stored binary. The bytes themselves live elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryValue {
  pub file_name: String,
  pub mime_type: String,
  pub size:      u64,
  pub sha512:    String,
}

/// An embedded sub-entity governed by a microschema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Micronode {
  pub uuid:        Uuid,
  pub microschema: SchemaVersionRef,
  #[serde(default)]
  pub fields:      FieldMap,
}

/// The elements of a list field. A list is homogeneous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "item", content = "items", rename_all = "snake_case")]
pub enum ListValue {
  String(Vec<String>),
  Html(Vec<String>),
  Number(Vec<f64>),
  Boolean(Vec<bool>),
  Date(Vec<DateTime<Utc>>),
  Node(Vec<Uuid>),
  Micronode(Vec<Micronode>),
}

impl ListValue {
  pub fn item_type(&self) -> ListItemType {
    match self {
      Self::String(_) => ListItemType::String,
      Self::Html(_) => ListItemType::Html,
      Self::Number(_) => ListItemType::Number,
      Self::Boolean(_) => ListItemType::Boolean,
      Self::Date(_) => ListItemType::Date,
      Self::Node(_) => ListItemType::Node,
      Self::Micronode(_) => ListItemType::Micronode,
    }
  }

  pub fn len(&self) -> usize {
    match self {
      Self::String(v) | Self::Html(v) => v.len(),
      Self::Number(v) => v.len(),
      Self::Boolean(v) => v.len(),
      Self::Date(v) => v.len(),
      Self::Node(v) => v.len(),
      Self::Micronode(v) => v.len(),
    }
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Split into scalar values, one per element.
  pub fn into_items(self) -> Vec<FieldValue> {
    match self {
      Self::String(v) => v.into_iter().map(FieldValue::String).collect(),
      Self::Html(v) => v.into_iter().map(FieldValue::Html).collect(),
      Self::Number(v) => v.into_iter().map(FieldValue::Number).collect(),
      Self::Boolean(v) => v.into_iter().map(FieldValue::Boolean).collect(),
      Self::Date(v) => v.into_iter().map(FieldValue::Date).collect(),
      Self::Node(v) => v.into_iter().map(FieldValue::Node).collect(),
      Self::Micronode(v) => v.into_iter().map(FieldValue::Micronode).collect(),
    }
  }

  /// Collect scalar values of `item` type into a list. Values of any other
  /// type are skipped.
  pub fn from_items(
    item: ListItemType,
    values: impl IntoIterator<Item = FieldValue>,
  ) -> Self {
    let values = values.into_iter();
    match item {
      ListItemType::String => Self::String(
        values.filter_map(|v| match v { FieldValue::String(s) => Some(s), _ => None }).collect(),
      ),
      ListItemType::Html => Self::Html(
        values.filter_map(|v| match v { FieldValue::Html(s) => Some(s), _ => None }).collect(),
      ),
      ListItemType::Number => Self::Number(
        values.filter_map(|v| match v { FieldValue::Number(n) => Some(n), _ => None }).collect(),
      ),
      ListItemType::Boolean => Self::Boolean(
        values.filter_map(|v| match v { FieldValue::Boolean(b) => Some(b), _ => None }).collect(),
      ),
      ListItemType::Date => Self::Date(
        values.filter_map(|v| match v { FieldValue::Date(d) => Some(d), _ => None }).collect(),
      ),
      ListItemType::Node => Self::Node(
        values.filter_map(|v| match v { FieldValue::Node(n) => Some(n), _ => None }).collect(),
      ),
      ListItemType::Micronode => Self::Micronode(
        values
          .filter_map(|v| match v { FieldValue::Micronode(m) => Some(m), _ => None })
          .collect(),
      ),
    }
  }
}

/// The value of one field in a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
  String(String),
  Html(String),
  Number(f64),
  Boolean(bool),
  Date(DateTime<Utc>),
  Node(Uuid),
  Binary(BinaryValue),
  Micronode(Micronode),
  List(ListValue),
}

impl FieldValue {
  pub fn field_type(&self) -> FieldType {
    match self {
      Self::String(_) => FieldType::String,
      Self::Html(_) => FieldType::Html,
      Self::Number(_) => FieldType::Number,
      Self::Boolean(_) => FieldType::Boolean,
      Self::Date(_) => FieldType::Date,
      Self::Node(_) => FieldType::Node,
      Self::Binary(_) => FieldType::Binary,
      Self::Micronode(_) => FieldType::Micronode,
      Self::List(list) => FieldType::List(list.item_type()),
    }
  }

  pub fn fits(&self, field_type: FieldType) -> bool {
    self.field_type() == field_type
  }

  /// The plain JSON form handed to custom migration expressions.
  ///
  /// Dates become RFC 3339 strings, node references become uuid strings,
  /// binaries and micronodes use their serde form.
  pub fn to_json(&self) -> Value {
    match self {
      Self::String(s) | Self::Html(s) => Value::String(s.clone()),
      Self::Number(n) => serde_json::Number::from_f64(*n)
        .map_or(Value::Null, Value::Number),
      Self::Boolean(b) => Value::Bool(*b),
      Self::Date(d) => Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
      Self::Node(id) => Value::String(id.hyphenated().to_string()),
      Self::Binary(b) => serde_json::to_value(b).unwrap_or(Value::Null),
      Self::Micronode(m) => serde_json::to_value(m).unwrap_or(Value::Null),
      Self::List(list) => {
        Value::Array(list.clone().into_items().iter().map(Self::to_json).collect())
      }
    }
  }

  /// Read a plain JSON value back as a value of `field_type`.
  ///
  /// `null` yields `Ok(None)`: the field is absent. Anything that does not
  /// have the shape of `field_type` is an [`Error::Shape`].
  pub fn from_json(
    field: &str,
    field_type: FieldType,
    json: &Value,
  ) -> Result<Option<FieldValue>> {
    if json.is_null() {
      return Ok(None);
    }
    let shape = |reason: &str| Error::Shape {
      field:    field.to_owned(),
      expected: field_type.to_string(),
      reason:   reason.to_owned(),
    };

    let value = match field_type {
      FieldType::String => {
        Self::String(json.as_str().ok_or_else(|| shape("expected a string"))?.to_owned())
      }
      FieldType::Html => {
        Self::Html(json.as_str().ok_or_else(|| shape("expected a string"))?.to_owned())
      }
      FieldType::Number => Self::Number(
        json
          .as_f64()
          .filter(|n| n.is_finite())
          .ok_or_else(|| shape("expected a finite number"))?,
      ),
      FieldType::Boolean => {
        Self::Boolean(json.as_bool().ok_or_else(|| shape("expected a boolean"))?)
      }
      FieldType::Date => {
        let s = json.as_str().ok_or_else(|| shape("expected an RFC 3339 string"))?;
        let parsed = DateTime::parse_from_rfc3339(s)
          .map_err(|e| shape(&format!("invalid date {s:?}: {e}")))?;
        Self::Date(parsed.with_timezone(&Utc))
      }
      FieldType::Node => {
        let s = json.as_str().ok_or_else(|| shape("expected a node uuid"))?;
        Self::Node(Uuid::parse_str(s).map_err(|e| shape(&format!("invalid uuid {s:?}: {e}")))?)
      }
      FieldType::Binary => Self::Binary(
        serde_json::from_value(json.clone()).map_err(|e| shape(&e.to_string()))?,
      ),
      FieldType::Micronode => Self::Micronode(
        serde_json::from_value(json.clone()).map_err(|e| shape(&e.to_string()))?,
      ),
      FieldType::List(item) => {
        let elements = json.as_array().ok_or_else(|| shape("expected an array"))?;
        let mut items = Vec::with_capacity(elements.len());
        for element in elements {
          match Self::from_json(field, item.scalar(), element)? {
            Some(v) => items.push(v),
            None => return Err(shape("list elements must not be null")),
          }
        }
        Self::List(ListValue::from_items(item, items))
      }
    };
    Ok(Some(value))
  }

  /// Micronodes embedded directly in this value.
  pub fn micronodes(&self) -> Vec<&Micronode> {
    match self {
      Self::Micronode(m) => vec![m],
      Self::List(ListValue::Micronode(list)) => list.iter().collect(),
      _ => Vec::new(),
    }
  }
}

// ─── Entities ────────────────────────────────────────────────────────────────

/// A top-level content entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
  pub node_id:          Uuid,
  pub project_id:       Uuid,
  pub schema_container: Uuid,
  pub parent_id:        Option<Uuid>,
  pub created_at:       DateTime<Utc>,
}

/// Which head pointer of a (node, language, branch) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerType {
  Draft,
  Published,
}

/// An immutable language- and branch-specific payload of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentContainer {
  pub container_id:   Uuid,
  pub node_id:        Uuid,
  pub language:       String,
  pub branch_id:      Uuid,
  pub schema_version: Uuid,
  pub version:        VersionNumber,
  pub previous:       Option<Uuid>,
  pub fields:         FieldMap,
  pub created_at:     DateTime<Utc>,
  pub editor:         Option<String>,
}

impl ContentContainer {
  /// Derive a successor container carrying `fields` at `version`.
  pub fn successor(
    &self,
    version: VersionNumber,
    schema_version: Uuid,
    fields: FieldMap,
  ) -> ContentContainer {
    ContentContainer {
      container_id: Uuid::new_v4(),
      node_id: self.node_id,
      language: self.language.clone(),
      branch_id: self.branch_id,
      schema_version,
      version,
      previous: Some(self.container_id),
      fields,
      created_at: Utc::now(),
      editor: self.editor.clone(),
    }
  }

  /// All micronodes embedded in this container, in field order.
  pub fn micronodes(&self) -> impl Iterator<Item = &Micronode> {
    self.fields.values().flat_map(FieldValue::micronodes)
  }
}

/// The draft and published pointers of one (node, language, branch) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeads {
  pub node_id:   Uuid,
  pub language:  String,
  pub branch_id: Uuid,
  pub draft:     Option<Uuid>,
  pub published: Option<Uuid>,
}

impl ContainerHeads {
  /// True when draft and published point at the same container.
  pub fn shared(&self) -> bool {
    self.draft.is_some() && self.draft == self.published
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn value_serde_is_adjacently_tagged() {
    let v = FieldValue::List(ListValue::String(vec!["a".into()]));
    let json = serde_json::to_value(&v).unwrap();
    assert_eq!(json, json!({ "type": "list", "value": { "item": "string", "items": ["a"] } }));
    let back: FieldValue = serde_json::from_value(json).unwrap();
    assert_eq!(back, v);
  }

  #[test]
  fn from_json_checks_shape() {
    assert_eq!(
      FieldValue::from_json("n", FieldType::Number, &json!(3)).unwrap(),
      Some(FieldValue::Number(3.0))
    );
    assert_eq!(FieldValue::from_json("n", FieldType::Number, &Value::Null).unwrap(), None);
    assert!(matches!(
      FieldValue::from_json("n", FieldType::Number, &json!("3")),
      Err(Error::Shape { .. })
    ));
    assert!(
      FieldValue::from_json("l", FieldType::List(ListItemType::Number), &json!([1, "x"]))
        .is_err()
    );
  }

  #[test]
  fn date_round_trips_through_plain_json() {
    let d = FieldValue::Date("2024-05-01T10:00:00Z".parse().unwrap());
    let back = FieldValue::from_json("d", FieldType::Date, &d.to_json()).unwrap();
    assert_eq!(back, Some(d));
  }

  #[test]
  fn micronodes_are_collected_from_fields() {
    let reference = SchemaVersionRef { container: Uuid::new_v4(), version: Uuid::new_v4() };
    let micro = |n: f64| Micronode {
      uuid:        Uuid::new_v4(),
      microschema: reference,
      fields:      FieldMap::from([("n".to_owned(), FieldValue::Number(n))]),
    };
    let mut fields = FieldMap::new();
    fields.insert("one".into(), FieldValue::Micronode(micro(1.0)));
    fields.insert("many".into(), FieldValue::List(ListValue::Micronode(vec![micro(2.0), micro(3.0)])));
    fields.insert("title".into(), FieldValue::String("t".into()));

    let container = ContentContainer {
      container_id:   Uuid::new_v4(),
      node_id:        Uuid::new_v4(),
      language:       "en".into(),
      branch_id:      Uuid::new_v4(),
      schema_version: Uuid::new_v4(),
      version:        VersionNumber::new(0, 1),
      previous:       None,
      fields,
      created_at:     Utc::now(),
      editor:         None,
    };
    assert_eq!(container.micronodes().count(), 3);
  }
}
