//! Default value conversion for `CHANGE_FIELD_TYPE` without a custom
//! expression.
//!
//! Conversions that cannot preserve the value return `None`, which drops the
//! field from the migrated container.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::{
  content::{FieldValue, ListValue},
  schema::FieldType,
};

/// Convert `value` to `to`, or `None` when there is no sensible conversion.
pub fn convert(value: &FieldValue, to: FieldType) -> Option<FieldValue> {
  if value.fits(to) {
    return Some(value.clone());
  }

  match (value, to) {
    (FieldValue::List(list), FieldType::List(item)) => {
      let target = item.scalar();
      let items = list.clone().into_items();
      Some(FieldValue::List(ListValue::from_items(
        item,
        items.iter().filter_map(|v| convert_scalar(v, target)),
      )))
    }
    (scalar, FieldType::List(item)) => {
      let converted = convert_scalar(scalar, item.scalar())?;
      Some(FieldValue::List(ListValue::from_items(item, [converted])))
    }
    (FieldValue::List(list), FieldType::String | FieldType::Html) => {
      let parts: Option<Vec<String>> = list
        .clone()
        .into_items()
        .iter()
        .map(text)
        .collect();
      let joined = parts?.join(",");
      Some(match to {
        FieldType::Html => FieldValue::Html(joined),
        _ => FieldValue::String(joined),
      })
    }
    (FieldValue::List(list), scalar) => {
      let first = list.clone().into_items().into_iter().next()?;
      convert_scalar(&first, scalar)
    }
    (scalar, to) => convert_scalar(scalar, to),
  }
}

fn convert_scalar(value: &FieldValue, to: FieldType) -> Option<FieldValue> {
  if value.fits(to) {
    return Some(value.clone());
  }
  match to {
    FieldType::String => text(value).map(FieldValue::String),
    FieldType::Html => text(value).map(FieldValue::Html),
    FieldType::Number => number(value).map(FieldValue::Number),
    FieldType::Boolean => boolean(value).map(FieldValue::Boolean),
    FieldType::Date => date(value).map(FieldValue::Date),
    FieldType::Node => match value {
      FieldValue::String(s) => Uuid::parse_str(s.trim()).ok().map(FieldValue::Node),
      _ => None,
    },
    FieldType::Binary | FieldType::Micronode | FieldType::List(_) => None,
  }
}

fn text(value: &FieldValue) -> Option<String> {
  match value {
    FieldValue::String(s) | FieldValue::Html(s) => Some(s.clone()),
    FieldValue::Number(n) => Some(format_number(*n)),
    FieldValue::Boolean(b) => Some(b.to_string()),
    FieldValue::Date(d) => Some(d.to_rfc3339_opts(SecondsFormat::Millis, true)),
    FieldValue::Node(id) => Some(id.hyphenated().to_string()),
    FieldValue::Binary(_) | FieldValue::Micronode(_) | FieldValue::List(_) => None,
  }
}

fn number(value: &FieldValue) -> Option<f64> {
  match value {
    FieldValue::String(s) | FieldValue::Html(s) => {
      s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
    }
    FieldValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
    FieldValue::Date(d) => Some(d.timestamp_millis() as f64),
    _ => None,
  }
}

fn boolean(value: &FieldValue) -> Option<bool> {
  match value {
    FieldValue::String(s) | FieldValue::Html(s) => {
      match s.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
      }
    }
    FieldValue::Number(n) if *n == 1.0 => Some(true),
    FieldValue::Number(n) if *n == 0.0 => Some(false),
    _ => None,
  }
}

fn date(value: &FieldValue) -> Option<DateTime<Utc>> {
  match value {
    FieldValue::String(s) | FieldValue::Html(s) => DateTime::parse_from_rfc3339(s.trim())
      .ok()
      .map(|d| d.with_timezone(&Utc)),
    FieldValue::Number(n) if n.fract() == 0.0 => {
      DateTime::from_timestamp_millis(*n as i64)
    }
    _ => None,
  }
}

/// Integral values print without a fractional part.
fn format_number(n: f64) -> String {
  if n.fract() == 0.0 && n.abs() < 1e15 {
    format!("{}", n as i64)
  } else {
    n.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::schema::ListItemType;

  #[test]
  fn number_to_string_and_back() {
    assert_eq!(
      convert(&FieldValue::Number(42.0), FieldType::String),
      Some(FieldValue::String("42".into()))
    );
    assert_eq!(
      convert(&FieldValue::Number(1.5), FieldType::Html),
      Some(FieldValue::Html("1.5".into()))
    );
    assert_eq!(
      convert(&FieldValue::String(" 7.25 ".into()), FieldType::Number),
      Some(FieldValue::Number(7.25))
    );
    assert_eq!(convert(&FieldValue::String("seven".into()), FieldType::Number), None);
  }

  #[test]
  fn boolean_conversions() {
    assert_eq!(
      convert(&FieldValue::String("TRUE".into()), FieldType::Boolean),
      Some(FieldValue::Boolean(true))
    );
    assert_eq!(
      convert(&FieldValue::Number(0.0), FieldType::Boolean),
      Some(FieldValue::Boolean(false))
    );
    assert_eq!(convert(&FieldValue::Number(3.0), FieldType::Boolean), None);
    assert_eq!(
      convert(&FieldValue::Boolean(true), FieldType::Number),
      Some(FieldValue::Number(1.0))
    );
  }

  #[test]
  fn dates_and_epoch_millis() {
    let d: DateTime<Utc> = "2020-01-01T00:00:00Z".parse().unwrap();
    let millis = convert(&FieldValue::Date(d), FieldType::Number).unwrap();
    assert_eq!(millis, FieldValue::Number(1_577_836_800_000.0));
    assert_eq!(convert(&millis, FieldType::Date), Some(FieldValue::Date(d)));
  }

  #[test]
  fn scalar_and_list() {
    assert_eq!(
      convert(&FieldValue::String("a".into()), FieldType::List(ListItemType::String)),
      Some(FieldValue::List(ListValue::String(vec!["a".into()])))
    );
    let list = FieldValue::List(ListValue::Number(vec![1.0, 2.0]));
    assert_eq!(convert(&list, FieldType::Number), Some(FieldValue::Number(1.0)));
    assert_eq!(convert(&list, FieldType::String), Some(FieldValue::String("1,2".into())));
    assert_eq!(
      convert(&list, FieldType::List(ListItemType::String)),
      Some(FieldValue::List(ListValue::String(vec!["1".into(), "2".into()])))
    );
  }

  #[test]
  fn impossible_conversions_drop_the_value() {
    assert_eq!(convert(&FieldValue::Boolean(true), FieldType::Node), None);
    assert_eq!(convert(&FieldValue::String("x".into()), FieldType::Micronode), None);
  }
}
