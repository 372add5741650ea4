//! The whitelisted function library.
//!
//! These are the only callable functions; the sandbox exposes no I/O, no
//! clock and no randomness, so a script is a pure function of its inputs.

use serde_json::Value;

use crate::{
  error::{Error, Result},
  eval::{as_number, display, truthy},
  parse::number,
};

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
  Upper,
  Lower,
  Trim,
  Len,
  ToString,
  ToNumber,
  ToBoolean,
  Replace,
  Split,
  Join,
  Substring,
  Contains,
  StartsWith,
  EndsWith,
  Keys,
  Round,
  Floor,
  Ceil,
  Abs,
  Min,
  Max,
  Fail,
}

const TABLE: &[(&str, Builtin, usize, Option<usize>)] = &[
  ("upper", Builtin::Upper, 1, Some(1)),
  ("lower", Builtin::Lower, 1, Some(1)),
  ("trim", Builtin::Trim, 1, Some(1)),
  ("len", Builtin::Len, 1, Some(1)),
  ("string", Builtin::ToString, 1, Some(1)),
  ("number", Builtin::ToNumber, 1, Some(1)),
  ("boolean", Builtin::ToBoolean, 1, Some(1)),
  ("replace", Builtin::Replace, 3, Some(3)),
  ("split", Builtin::Split, 2, Some(2)),
  ("join", Builtin::Join, 1, Some(2)),
  ("substring", Builtin::Substring, 2, Some(3)),
  ("contains", Builtin::Contains, 2, Some(2)),
  ("starts_with", Builtin::StartsWith, 2, Some(2)),
  ("ends_with", Builtin::EndsWith, 2, Some(2)),
  ("keys", Builtin::Keys, 1, Some(1)),
  ("round", Builtin::Round, 1, Some(1)),
  ("floor", Builtin::Floor, 1, Some(1)),
  ("ceil", Builtin::Ceil, 1, Some(1)),
  ("abs", Builtin::Abs, 1, Some(1)),
  ("min", Builtin::Min, 1, None),
  ("max", Builtin::Max, 1, None),
  ("fail", Builtin::Fail, 0, Some(1)),
];

impl Builtin {
  pub(crate) fn from_name(name: &str) -> Option<Builtin> {
    TABLE.iter().find(|(n, ..)| *n == name).map(|(_, b, ..)| *b)
  }

  fn entry(self) -> &'static (&'static str, Builtin, usize, Option<usize>) {
    // Every variant has a row.
    TABLE.iter().find(|(_, b, ..)| *b == self).unwrap_or(&TABLE[0])
  }

  pub(crate) fn name(self) -> &'static str { self.entry().0 }

  pub(crate) fn check_arity(self, got: usize) -> Result<()> {
    let (name, _, min, max) = *self.entry();
    let expected = match (min, max) {
      (0, Some(1)) => "0 or 1",
      (1, Some(1)) => "1",
      (1, Some(2)) => "1 or 2",
      (2, Some(2)) => "2",
      (2, Some(3)) => "2 or 3",
      (3, Some(3)) => "3",
      _ => "at least 1",
    };
    if got < min || max.is_some_and(|m| got > m) {
      return Err(Error::Arity { name, expected, got });
    }
    Ok(())
  }

  /// Apply to already evaluated arguments. `max_output` bounds produced
  /// strings in bytes.
  pub(crate) fn call(self, args: Vec<Value>, max_output: usize) -> Result<Value> {
    let bounded = |s: String| -> Result<Value> {
      if s.len() > max_output {
        Err(Error::OutputLimit(max_output))
      } else {
        Ok(Value::String(s))
      }
    };
    let arg = |i: usize| args.get(i).unwrap_or(&NULL);

    match self {
      Self::Upper => Ok(Value::String(text(self, arg(0))?.to_uppercase())),
      Self::Lower => Ok(Value::String(text(self, arg(0))?.to_lowercase())),
      Self::Trim => Ok(Value::String(text(self, arg(0))?.trim().to_owned())),
      Self::Len => match arg(0) {
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Array(a) => Ok(Value::from(a.len())),
        Value::Object(o) => Ok(Value::from(o.len())),
        Value::Null => Ok(Value::from(0)),
        other => Err(type_error(self, other)),
      },
      Self::ToString => match arg(0) {
        Value::Null => Ok(Value::Null),
        v => bounded(display(v)),
      },
      Self::ToNumber => Ok(match arg(0) {
        Value::Number(n) => Value::Number(n.clone()),
        Value::Bool(b) => Value::from(u8::from(*b)),
        Value::String(s) => s
          .trim()
          .parse::<f64>()
          .ok()
          .filter(|n| n.is_finite())
          .map_or(Value::Null, number),
        _ => Value::Null,
      }),
      Self::ToBoolean => Ok(Value::Bool(truthy(arg(0)))),
      Self::Replace => {
        let (s, from, to) = (text(self, arg(0))?, text(self, arg(1))?, text(self, arg(2))?);
        if from.is_empty() {
          return Ok(Value::String(s.to_owned()));
        }
        let estimate = s.len() + s.matches(from).count() * to.len();
        if estimate > max_output {
          return Err(Error::OutputLimit(max_output));
        }
        Ok(Value::String(s.replace(from, to)))
      }
      Self::Split => {
        let (s, sep) = (text(self, arg(0))?, text(self, arg(1))?);
        let parts: Vec<Value> = if sep.is_empty() {
          s.chars().map(|c| Value::String(c.to_string())).collect()
        } else {
          s.split(sep).map(|p| Value::String(p.to_owned())).collect()
        };
        Ok(Value::Array(parts))
      }
      Self::Join => {
        let Value::Array(items) = arg(0) else {
          return Err(type_error(self, arg(0)));
        };
        let sep = match arg(1) {
          Value::Null => ",",
          v => text(self, v)?,
        };
        let joined = items.iter().map(display).collect::<Vec<_>>().join(sep);
        bounded(joined)
      }
      Self::Substring => {
        let s = text(self, arg(0))?;
        let len = s.chars().count();
        let start = index(self, arg(0), arg(1))?.min(len);
        let end = match arg(2) {
          Value::Null => len,
          v => index(self, arg(0), v)?.min(len),
        };
        Ok(Value::String(
          s.chars().skip(start).take(end.saturating_sub(start)).collect(),
        ))
      }
      Self::Contains => match arg(0) {
        Value::String(s) => Ok(Value::Bool(s.contains(text(self, arg(1))?))),
        Value::Array(items) => Ok(Value::Bool(items.contains(arg(1)))),
        other => Err(type_error(self, other)),
      },
      Self::StartsWith => {
        Ok(Value::Bool(text(self, arg(0))?.starts_with(text(self, arg(1))?)))
      }
      Self::EndsWith => Ok(Value::Bool(text(self, arg(0))?.ends_with(text(self, arg(1))?))),
      Self::Keys => match arg(0) {
        Value::Object(o) => Ok(Value::Array(o.keys().cloned().map(Value::String).collect())),
        other => Err(type_error(self, other)),
      },
      Self::Round => unary_math(self, arg(0), f64::round),
      Self::Floor => unary_math(self, arg(0), f64::floor),
      Self::Ceil => unary_math(self, arg(0), f64::ceil),
      Self::Abs => unary_math(self, arg(0), f64::abs),
      Self::Min | Self::Max => {
        let values: Vec<&Value> = match args.as_slice() {
          [Value::Array(items)] => items.iter().collect(),
          all => all.iter().collect(),
        };
        let mut best: Option<f64> = None;
        for v in values {
          let n = as_number(v).ok_or_else(|| type_error(self, v))?;
          best = Some(match (best, self) {
            (None, _) => n,
            (Some(b), Self::Min) => b.min(n),
            (Some(b), _) => b.max(n),
          });
        }
        Ok(best.map_or(Value::Null, number))
      }
      Self::Fail => Err(Error::Failed(match arg(0) {
        Value::Null => "fail() called".to_owned(),
        v => display(v),
      })),
    }
  }
}

fn type_error(f: Builtin, got: &Value) -> Error {
  Error::Type(format!("{}() does not accept {}", f.name(), kind_of(got)))
}

pub(crate) fn kind_of(v: &Value) -> &'static str {
  match v {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "a list",
    Value::Object(_) => "an object",
  }
}

fn text(f: Builtin, v: &Value) -> Result<&str> {
  v.as_str().ok_or_else(|| type_error(f, v))
}

fn index(f: Builtin, subject: &Value, v: &Value) -> Result<usize> {
  let n = as_number(v).ok_or_else(|| type_error(f, subject))?;
  Ok(if n <= 0.0 { 0 } else { n as usize })
}

fn unary_math(f: Builtin, v: &Value, op: fn(f64) -> f64) -> Result<Value> {
  let n = as_number(v).ok_or_else(|| type_error(f, v))?;
  Ok(number(op(n)))
}
