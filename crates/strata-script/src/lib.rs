//! Sandboxed field-transform scripts.
//!
//! A script is a single expression over two bound parameters, the old field
//! value (as JSON) and the field name, optionally introduced by an arrow
//! header:
//!
//! ```text
//! value => "modified " + value
//! (v, f) => f == "price" ? round(v * 100) / 100 : v
//! ```
//!
//! The language has literals, arithmetic, comparison, `&&`/`||`/`??`, the
//! conditional operator, member and index access, and a fixed set of pure
//! builtins. There is no assignment, looping, I/O or ambient state. Each
//! evaluation is bounded in steps, nesting depth and output size.

mod builtins;
pub mod error;
mod eval;
mod parse;

use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::{Error, Result};

use crate::{eval::Machine, parse::Expr};

/// Resource bounds applied to every compile and evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
  /// Evaluation steps (one per expression node visited).
  pub max_steps:        u64,
  pub max_depth:        usize,
  /// Bytes of any produced string and of the serialized result.
  pub max_output_bytes: usize,
  /// Estimated bytes of all values built during one evaluation.
  pub max_memory_bytes: usize,
  pub max_source_bytes: usize,
}

impl Default for Limits {
  fn default() -> Self {
    Self {
      max_steps:        10_000,
      max_depth:        64,
      max_output_bytes: 65_536,
      max_memory_bytes: 1_048_576,
      max_source_bytes: 16_384,
    }
  }
}

/// A compiled script, reusable across many evaluations.
#[derive(Debug, Clone)]
pub struct Script {
  source: String,
  body:   Expr,
  limits: Limits,
}

impl Script {
  pub fn compile(source: &str, limits: &Limits) -> Result<Self> {
    let body = parse::Parser::new(source, limits)?.script()?;
    Ok(Self { source: source.to_owned(), body, limits: *limits })
  }

  pub fn source(&self) -> &str { &self.source }

  /// Evaluate against one field. `value` is `null` when the field is absent
  /// from the source content.
  pub fn eval(&self, value: &Value, field: &str) -> Result<Value> {
    let params = [value.clone(), Value::String(field.to_owned())];
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
      Machine::run(&self.body, &params, &self.limits)
    }))
    .map_err(|payload| Error::Panicked(panic_message(payload.as_ref())))??;

    let size = serde_json::to_string(&result).map_or(usize::MAX, |s| s.len());
    if size > self.limits.max_output_bytes {
      return Err(Error::OutputLimit(self.limits.max_output_bytes));
    }
    Ok(result)
  }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_owned()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_owned()
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn run(src: &str, value: Value) -> Result<Value> {
    Script::compile(src, &Limits::default())?.eval(&value, "content")
  }

  #[test]
  fn prefixes_a_string() {
    let out = run("value => \"modified \" + value", json!("first content")).unwrap();
    assert_eq!(out, json!("modified first content"));
  }

  #[test]
  fn field_name_is_bound() {
    assert_eq!(run("(v, f) => f + ':' + v", json!(3)).unwrap(), json!("content:3"));
    assert_eq!(run("field", Value::Null).unwrap(), json!("content"));
  }

  #[test]
  fn absent_value_is_null() {
    assert_eq!(run("value ?? 'default'", Value::Null).unwrap(), json!("default"));
    assert_eq!(run("value == null", Value::Null).unwrap(), json!(true));
  }

  #[test]
  fn arithmetic_and_comparison() {
    assert_eq!(run("v => v * 2 + 1", json!(4)).unwrap(), json!(9));
    assert_eq!(run("v => v / 4", json!(2)).unwrap(), json!(0.5));
    assert_eq!(run("v => v % 3 == 1 ? 'one' : 'other'", json!(7)).unwrap(), json!("one"));
    assert_eq!(run("v => 'b' > 'a' && v", json!(1)).unwrap(), json!(1));
    assert_eq!(run("v => 2 == 2.0", Value::Null).unwrap(), json!(true));
    assert!(matches!(run("v => v / 0", json!(1)), Err(Error::Type(_))));
  }

  #[test]
  fn builtins_compose() {
    assert_eq!(run("v => upper(trim(v))", json!("  hi ")).unwrap(), json!("HI"));
    assert_eq!(run("v => v.split(',').join(';')", json!("a,b")).unwrap(), json!("a;b"));
    assert_eq!(run("v => number(v) + 1", json!("41")).unwrap(), json!(42));
    assert_eq!(run("v => string(v)", json!(5)).unwrap(), json!("5"));
    assert_eq!(run("v => max(v)", json!([3, 9, 2])).unwrap(), json!(9));
    assert_eq!(run("v => substring(v, 1, 3)", json!("abcd")).unwrap(), json!("bc"));
    assert_eq!(run("v => v.length", json!([1, 2])).unwrap(), json!(2));
    assert_eq!(run("v => v.a[1]", json!({"a": [1, 2]})).unwrap(), json!(2));
    assert_eq!(run("v => { x: v }", json!(1)).unwrap(), json!({"x": 1}));
  }

  #[test]
  fn fail_reports_message() {
    let err = run("v => v ? v : fail('empty')", json!("")).unwrap_err();
    assert!(matches!(&err, Error::Failed(m) if m == "empty"));
    assert!(!err.is_violation());
  }

  #[test]
  fn member_of_null_is_a_type_error() {
    assert!(matches!(run("v => v.x", Value::Null), Err(Error::Type(_))));
  }

  #[test]
  fn step_limit_is_enforced() {
    let limits = Limits { max_steps: 10, ..Limits::default() };
    let script = Script::compile("v => v + v + v + v + v + v + v + v", &limits).unwrap();
    let err = script.eval(&json!(1), "n").unwrap_err();
    assert!(matches!(err, Error::StepLimit(10)));
    assert!(err.is_violation());
  }

  #[test]
  fn output_limit_is_enforced() {
    let limits = Limits { max_output_bytes: 8, ..Limits::default() };
    let script = Script::compile("v => v + v", &limits).unwrap();
    assert!(matches!(script.eval(&json!("12345"), "s"), Err(Error::OutputLimit(8))));
    assert!(matches!(script.eval(&json!([1, 2, 3, 4, 5]), "l"), Err(Error::OutputLimit(8))));
  }

  #[test]
  fn intermediate_values_are_bounded() {
    let big = json!("x".repeat(60_000));
    let copies = vec!["v"; 40].join(", ");
    let script = Script::compile(&format!("v => len([{copies}])"), &Limits::default()).unwrap();
    let err = script.eval(&big, "s").unwrap_err();
    assert!(matches!(err, Error::MemoryLimit(1_048_576)));
    assert!(err.is_violation());

    let small = Script::compile("v => len([v, v])", &Limits::default()).unwrap();
    assert_eq!(small.eval(&big, "s").unwrap(), json!(2));
  }

  #[test]
  fn numbers_compare_by_value() {
    assert_eq!(run("v => v < 10", json!(9.5)).unwrap(), json!(true));
    assert_eq!(run("v => v >= 10", json!(9.5)).unwrap(), json!(false));
    assert_eq!(run("v => v > 2", json!(10)).unwrap(), json!(true));
  }

  #[test]
  fn compiled_script_is_reusable() {
    let script = Script::compile("v => lower(v)", &Limits::default()).unwrap();
    assert_eq!(script.source(), "v => lower(v)");
    assert_eq!(script.eval(&json!("A"), "t").unwrap(), json!("a"));
    assert_eq!(script.eval(&json!("B"), "t").unwrap(), json!("b"));
  }

  #[test]
  fn limits_deserialize_with_defaults() {
    let limits: Limits = serde_json::from_value(json!({ "max_steps": 5 })).unwrap();
    assert_eq!(limits.max_steps, 5);
    assert_eq!(limits.max_depth, Limits::default().max_depth);
  }
}
