//! Tree-walking evaluator with step and depth accounting.

use serde_json::Value;

use crate::{
  Limits,
  builtins::kind_of,
  error::{Error, Result},
  parse::{BinaryOp, Expr, UnaryOp, number},
};

pub(crate) struct Machine<'a> {
  params:    &'a [Value],
  limits:    &'a Limits,
  steps:     u64,
  depth:     usize,
  /// Estimated bytes of every value built so far; never refunded.
  allocated: usize,
}

impl<'a> Machine<'a> {
  pub(crate) fn run(body: &Expr, params: &'a [Value], limits: &'a Limits) -> Result<Value> {
    Machine { params, limits, steps: 0, depth: 0, allocated: 0 }.eval(body)
  }

  fn eval(&mut self, e: &Expr) -> Result<Value> {
    self.steps += 1;
    if self.steps > self.limits.max_steps {
      return Err(Error::StepLimit(self.limits.max_steps));
    }
    // Operator chains nest deeper than the parser counts.
    self.depth += 1;
    if self.depth > self.limits.max_depth.saturating_mul(8) {
      return Err(Error::DepthLimit(self.limits.max_depth));
    }
    let out = self.step(e);
    self.depth -= 1;
    out
  }

  /// Count `v` against the evaluation's memory budget.
  fn charge(&mut self, v: Value) -> Result<Value> {
    self.allocated = self.allocated.saturating_add(size_estimate(&v));
    if self.allocated > self.limits.max_memory_bytes {
      return Err(Error::MemoryLimit(self.limits.max_memory_bytes));
    }
    Ok(v)
  }

  fn step(&mut self, e: &Expr) -> Result<Value> {
    match e {
      Expr::Literal(v) => Ok(v.clone()),
      Expr::Param(i) => {
        let v = self.params.get(*i).cloned().unwrap_or(Value::Null);
        self.charge(v)
      }
      Expr::List(items) => {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
          out.push(self.eval(item)?);
        }
        self.charge(Value::Array(out))
      }
      Expr::Object(entries) => {
        let mut out = serde_json::Map::new();
        for (key, value) in entries {
          let v = self.eval(value)?;
          out.insert(key.clone(), v);
        }
        self.charge(Value::Object(out))
      }
      Expr::Unary(op, operand) => {
        let v = self.eval(operand)?;
        match op {
          UnaryOp::Not => Ok(Value::Bool(!truthy(&v))),
          UnaryOp::Neg => {
            let n = as_number(&v)
              .ok_or_else(|| Error::Type(format!("cannot negate {}", kind_of(&v))))?;
            Ok(number(-n))
          }
        }
      }
      Expr::Binary(op, lhs, rhs) => {
        let l = self.eval(lhs)?;
        let r = self.eval(rhs)?;
        let v = self.binary(*op, l, r)?;
        self.charge(v)
      }
      Expr::And(lhs, rhs) => {
        let l = self.eval(lhs)?;
        if truthy(&l) { self.eval(rhs) } else { Ok(l) }
      }
      Expr::Or(lhs, rhs) => {
        let l = self.eval(lhs)?;
        if truthy(&l) { Ok(l) } else { self.eval(rhs) }
      }
      Expr::Coalesce(lhs, rhs) => {
        let l = self.eval(lhs)?;
        if l.is_null() { self.eval(rhs) } else { Ok(l) }
      }
      Expr::Conditional(cond, then, otherwise) => {
        if truthy(&self.eval(cond)?) {
          self.eval(then)
        } else {
          self.eval(otherwise)
        }
      }
      Expr::Member(target, name) => {
        let t = self.eval(target)?;
        let v = match (&t, name.as_str()) {
          (Value::Object(o), _) => o.get(name).cloned().unwrap_or(Value::Null),
          (Value::String(s), "length") => Value::from(s.chars().count()),
          (Value::Array(a), "length") => Value::from(a.len()),
          _ => return Err(Error::Type(format!("cannot read {name:?} of {}", kind_of(&t)))),
        };
        self.charge(v)
      }
      Expr::Index(target, index) => {
        let t = self.eval(target)?;
        let i = self.eval(index)?;
        let v = match (&t, &i) {
          (Value::Array(a), Value::Number(_)) => {
            Ok(position(&i).and_then(|p| a.get(p)).cloned().unwrap_or(Value::Null))
          }
          (Value::String(s), Value::Number(_)) => Ok(
            position(&i)
              .and_then(|p| s.chars().nth(p))
              .map_or(Value::Null, |c| Value::String(c.to_string())),
          ),
          (Value::Object(o), Value::String(k)) => {
            Ok(o.get(k).cloned().unwrap_or(Value::Null))
          }
          _ => Err(Error::Type(format!(
            "cannot index {} with {}",
            kind_of(&t),
            kind_of(&i)
          ))),
        }?;
        self.charge(v)
      }
      Expr::Call(builtin, args) => {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
          values.push(self.eval(arg)?);
        }
        let v = builtin.call(values, self.limits.max_output_bytes)?;
        self.charge(v)
      }
    }
  }

  fn binary(&self, op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    let max = self.limits.max_output_bytes;
    match op {
      BinaryOp::Add => match (l, r) {
        (Value::Number(a), Value::Number(b)) => {
          finite(a.as_f64().unwrap_or(f64::NAN) + b.as_f64().unwrap_or(f64::NAN))
        }
        (Value::Array(mut a), Value::Array(b)) => {
          if 2 + array_bytes(&a) + array_bytes(&b) > max {
            return Err(Error::OutputLimit(max));
          }
          a.extend(b);
          Ok(Value::Array(a))
        }
        (l @ Value::String(_), r) | (l, r @ Value::String(_)) => {
          let mut s = display(&l);
          s.push_str(&display(&r));
          if s.len() > max {
            return Err(Error::OutputLimit(max));
          }
          Ok(Value::String(s))
        }
        (l, r) => Err(Error::Type(format!("cannot add {} and {}", kind_of(&l), kind_of(&r)))),
      },
      BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
        let (Some(a), Some(b)) = (as_number(&l), as_number(&r)) else {
          return Err(Error::Type(format!(
            "arithmetic on {} and {}",
            kind_of(&l),
            kind_of(&r)
          )));
        };
        if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0.0 {
          return Err(Error::Type("division by zero".into()));
        }
        finite(match op {
          BinaryOp::Sub => a - b,
          BinaryOp::Mul => a * b,
          BinaryOp::Div => a / b,
          _ => a % b,
        })
      }
      BinaryOp::Eq => Ok(Value::Bool(loose_eq(&l, &r))),
      BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&l, &r))),
      BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
        let ordering = match (&l, &r) {
          (Value::Number(_), Value::Number(_)) => {
            as_number(&l).zip(as_number(&r)).and_then(|(a, b)| a.partial_cmp(&b))
          }
          (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
          _ => None,
        }
        .ok_or_else(|| {
          Error::Type(format!("cannot compare {} and {}", kind_of(&l), kind_of(&r)))
        })?;
        Ok(Value::Bool(match op {
          BinaryOp::Lt => ordering.is_lt(),
          BinaryOp::Le => ordering.is_le(),
          BinaryOp::Gt => ordering.is_gt(),
          _ => ordering.is_ge(),
        }))
      }
    }
  }
}

fn finite(n: f64) -> Result<Value> {
  if n.is_finite() {
    Ok(number(n))
  } else {
    Err(Error::Type("arithmetic produced a non-finite number".into()))
  }
}

fn position(v: &Value) -> Option<usize> {
  let n = v.as_f64()?;
  (n >= 0.0 && n.fract() == 0.0).then_some(n as usize)
}

fn loose_eq(l: &Value, r: &Value) -> bool {
  match (l, r) {
    (Value::Number(_), Value::Number(_)) => as_number(l) == as_number(r),
    _ => l == r,
  }
}

pub(crate) fn as_number(v: &Value) -> Option<f64> { v.as_f64() }

/// Rough serialized size of `v` in bytes.
pub(crate) fn size_estimate(v: &Value) -> usize {
  match v {
    Value::Null | Value::Bool(_) => 5,
    Value::Number(_) => 8,
    Value::String(s) => s.len() + 2,
    Value::Array(a) => 2 + array_bytes(a),
    Value::Object(o) => 2 + o.iter().map(|(k, v)| k.len() + 4 + size_estimate(v)).sum::<usize>(),
  }
}

fn array_bytes(items: &[Value]) -> usize { items.iter().map(|v| size_estimate(v) + 1).sum() }

/// `null`, `false`, `0`, `""` and empty lists are falsy.
pub(crate) fn truthy(v: &Value) -> bool {
  match v {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(a) => !a.is_empty(),
    Value::Object(_) => true,
  }
}

/// The string form used by concatenation, `string()` and `join()`.
pub(crate) fn display(v: &Value) -> String {
  match v {
    Value::String(s) => s.clone(),
    Value::Number(n) => match n.as_f64() {
      Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("{}", f as i64),
      _ => n.to_string(),
    },
    other => other.to_string(),
  }
}
