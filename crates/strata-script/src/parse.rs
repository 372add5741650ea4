//! Expression lexer and parser.
//!
//! Pipeline:
//!   raw &str
//!     └─ lex()            → Vec<Token>
//!          └─ Parser::header()  → parameter names
//!               └─ Parser::expr()  → Expr tree, identifiers resolved

use serde_json::Value;

use crate::{
  Limits,
  builtins::Builtin,
  error::{Error, Result},
};

/// Names a script may not mention at all, even as an object key.
const FORBIDDEN: &[&str] = &[
  "__proto__", "class", "constructor", "const", "delete", "do", "env", "eval",
  "exec", "exit", "fetch", "file", "for", "Function", "function", "global",
  "globalThis", "import", "let", "new", "open", "process", "prototype",
  "require", "return", "socket", "spawn", "system", "this", "throw", "var",
  "while", "write",
];

// ─── Tree ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
  Not,
  Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
  Literal(Value),
  List(Vec<Expr>),
  Object(Vec<(String, Expr)>),
  /// Index into the bound parameters: 0 is the value, 1 the field name.
  Param(usize),
  Unary(UnaryOp, Box<Expr>),
  Binary(BinaryOp, Box<Expr>, Box<Expr>),
  And(Box<Expr>, Box<Expr>),
  Or(Box<Expr>, Box<Expr>),
  Coalesce(Box<Expr>, Box<Expr>),
  Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
  Member(Box<Expr>, String),
  Index(Box<Expr>, Box<Expr>),
  Call(Builtin, Vec<Expr>),
}

// ─── Lexer ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
  Num(f64),
  Str(String),
  Ident(String),
  Punct(&'static str),
  Eof,
}

#[derive(Debug, Clone)]
struct Token {
  tok: Tok,
  pos: usize,
}

/// Longest first so `==` wins over `=`.
const PUNCT: &[&str] = &[
  "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "(", ")", "[", "]", "{", "}",
  ",", ".", ":", "?", "+", "-", "*", "/", "%", "!", "<", ">", "=",
];

fn syntax(pos: usize, message: impl Into<String>) -> Error {
  Error::Syntax { pos, message: message.into() }
}

fn lex(src: &str) -> Result<Vec<Token>> {
  let bytes = src.as_bytes();
  let mut tokens = Vec::new();
  let mut i = 0;

  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_whitespace() {
      i += 1;
      continue;
    }

    let start = i;
    if c.is_ascii_digit() {
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
      if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
          i += 1;
        }
      }
      if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
          j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
          i = j;
          while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
          }
        }
      }
      let n = src[start..i]
        .parse::<f64>()
        .map_err(|e| syntax(start, format!("invalid number: {e}")))?;
      tokens.push(Token { tok: Tok::Num(n), pos: start });
      continue;
    }

    if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
      while i < bytes.len()
        && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
      {
        i += 1;
      }
      tokens.push(Token { tok: Tok::Ident(src[start..i].to_owned()), pos: start });
      continue;
    }

    if c == b'"' || c == b'\'' {
      let (s, end) = lex_string(src, start)?;
      tokens.push(Token { tok: Tok::Str(s), pos: start });
      i = end;
      continue;
    }

    match PUNCT.iter().find(|p| src[i..].starts_with(**p)) {
      Some(p) => {
        tokens.push(Token { tok: Tok::Punct(*p), pos: start });
        i += p.len();
      }
      None => {
        let ch = src[i..].chars().next().unwrap_or('?');
        return Err(syntax(start, format!("unexpected character {ch:?}")));
      }
    }
  }

  tokens.push(Token { tok: Tok::Eof, pos: src.len() });
  Ok(tokens)
}

/// Lex a quoted string starting at `start`. Returns the value and the offset
/// just past the closing quote.
fn lex_string(src: &str, start: usize) -> Result<(String, usize)> {
  let mut chars = src[start..].char_indices();
  let quote = chars.next().map(|(_, q)| q).unwrap_or('"');
  let mut out = String::new();

  while let Some((off, ch)) = chars.next() {
    match ch {
      c if c == quote => return Ok((out, start + off + c.len_utf8())),
      '\\' => {
        let Some((_, esc)) = chars.next() else { break };
        match esc {
          'n' => out.push('\n'),
          't' => out.push('\t'),
          'r' => out.push('\r'),
          '0' => out.push('\0'),
          'u' => {
            let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
            let decoded = u32::from_str_radix(&hex, 16)
              .ok()
              .and_then(char::from_u32)
              .ok_or_else(|| syntax(start + off, format!("invalid escape \\u{hex}")))?;
            out.push(decoded);
          }
          other => out.push(other),
        }
      }
      c => out.push(c),
    }
  }
  Err(syntax(start, "unterminated string"))
}

// ─── Parser ──────────────────────────────────────────────────────────────────

pub(crate) struct Parser<'a> {
  tokens: Vec<Token>,
  at:     usize,
  params: Vec<String>,
  limits: &'a Limits,
  depth:  usize,
}

impl<'a> Parser<'a> {
  pub(crate) fn new(src: &str, limits: &'a Limits) -> Result<Self> {
    if src.len() > limits.max_source_bytes {
      return Err(Error::SourceTooLarge(limits.max_source_bytes));
    }
    Ok(Self {
      tokens: lex(src)?,
      at: 0,
      params: vec!["value".to_owned(), "field".to_owned()],
      limits,
      depth: 0,
    })
  }

  /// Parse the whole script: an optional `params =>` header and one
  /// expression.
  pub(crate) fn script(mut self) -> Result<Expr> {
    self.header()?;
    let body = self.expr()?;
    match &self.peek().tok {
      Tok::Eof => Ok(body),
      Tok::Punct("=") => Err(Error::Violation("assignment is not permitted".into())),
      other => Err(syntax(self.peek().pos, format!("unexpected {other:?} after expression"))),
    }
  }

  fn peek(&self) -> &Token { &self.tokens[self.at.min(self.tokens.len() - 1)] }

  fn peek_at(&self, offset: usize) -> &Tok {
    &self.tokens[(self.at + offset).min(self.tokens.len() - 1)].tok
  }

  fn bump(&mut self) -> Token {
    let token = self.peek().clone();
    if self.at < self.tokens.len() - 1 {
      self.at += 1;
    }
    token
  }

  fn eat(&mut self, punct: &str) -> bool {
    if matches!(&self.peek().tok, Tok::Punct(p) if *p == punct) {
      self.bump();
      true
    } else {
      false
    }
  }

  fn expect(&mut self, punct: &str) -> Result<()> {
    if self.eat(punct) {
      Ok(())
    } else {
      let t = self.peek();
      Err(syntax(t.pos, format!("expected {punct:?}, found {:?}", t.tok)))
    }
  }

  fn ident(&mut self) -> Result<String> {
    let t = self.bump();
    match t.tok {
      Tok::Ident(name) => {
        check_allowed(&name)?;
        Ok(name)
      }
      other => Err(syntax(t.pos, format!("expected identifier, found {other:?}"))),
    }
  }

  fn header(&mut self) -> Result<()> {
    let is_single = matches!(self.peek_at(0), Tok::Ident(_))
      && matches!(self.peek_at(1), Tok::Punct("=>"));
    if is_single {
      let name = self.ident()?;
      self.expect("=>")?;
      self.params = vec![name];
      return Ok(());
    }

    if !matches!(self.peek_at(0), Tok::Punct("(")) {
      return Ok(());
    }
    // Lookahead for `( [ident [, ident]] ) =>`.
    let mut n = 1;
    let mut names = 0;
    loop {
      match self.peek_at(n) {
        Tok::Ident(_) => names += 1,
        Tok::Punct(")") => break,
        _ => return Ok(()),
      }
      n += 1;
      match self.peek_at(n) {
        Tok::Punct(",") => n += 1,
        Tok::Punct(")") => break,
        _ => return Ok(()),
      }
    }
    if !matches!(self.peek_at(n + 1), Tok::Punct("=>")) {
      return Ok(());
    }
    if names > 2 {
      return Err(syntax(self.peek().pos, "at most two parameters (value, field)"));
    }

    self.expect("(")?;
    let mut params = Vec::new();
    while !self.eat(")") {
      params.push(self.ident()?);
      self.eat(",");
    }
    self.expect("=>")?;
    self.params = params;
    Ok(())
  }

  fn enter(&mut self) -> Result<()> {
    self.depth += 1;
    if self.depth > self.limits.max_depth {
      return Err(Error::DepthLimit(self.limits.max_depth));
    }
    Ok(())
  }

  fn expr(&mut self) -> Result<Expr> {
    self.enter()?;
    let e = self.conditional();
    self.depth -= 1;
    e
  }

  fn conditional(&mut self) -> Result<Expr> {
    let cond = self.coalesce()?;
    if !self.eat("?") {
      return Ok(cond);
    }
    let then = self.expr()?;
    self.expect(":")?;
    let otherwise = self.expr()?;
    Ok(Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)))
  }

  fn coalesce(&mut self) -> Result<Expr> {
    let mut lhs = self.or()?;
    while self.eat("??") {
      let rhs = self.or()?;
      lhs = Expr::Coalesce(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  fn or(&mut self) -> Result<Expr> {
    let mut lhs = self.and()?;
    while self.eat("||") {
      let rhs = self.and()?;
      lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  fn and(&mut self) -> Result<Expr> {
    let mut lhs = self.binary_level(0)?;
    while self.eat("&&") {
      let rhs = self.binary_level(0)?;
      lhs = Expr::And(Box::new(lhs), Box::new(rhs));
    }
    Ok(lhs)
  }

  /// Left-associative binary operators, loosest level first.
  fn binary_level(&mut self, level: usize) -> Result<Expr> {
    const LEVELS: &[&[(&str, BinaryOp)]] = &[
      &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)],
      &[
        ("<=", BinaryOp::Le),
        (">=", BinaryOp::Ge),
        ("<", BinaryOp::Lt),
        (">", BinaryOp::Gt),
      ],
      &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
      &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
    ];

    let Some(ops) = LEVELS.get(level) else {
      return self.unary();
    };
    let mut lhs = self.binary_level(level + 1)?;
    'outer: loop {
      for (punct, op) in *ops {
        if self.eat(punct) {
          let rhs = self.binary_level(level + 1)?;
          lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
          continue 'outer;
        }
      }
      return Ok(lhs);
    }
  }

  fn unary(&mut self) -> Result<Expr> {
    let op = if self.eat("!") {
      UnaryOp::Not
    } else if self.eat("-") {
      UnaryOp::Neg
    } else {
      return self.postfix();
    };
    self.enter()?;
    let operand = self.unary();
    self.depth -= 1;
    Ok(Expr::Unary(op, Box::new(operand?)))
  }

  fn postfix(&mut self) -> Result<Expr> {
    let mut e = self.primary()?;
    loop {
      if self.eat(".") {
        let name = self.ident()?;
        if self.eat("(") {
          // `x.f(a)` is sugar for `f(x, a)`.
          let mut args = vec![e];
          args.extend(self.args()?);
          e = call(&name, args)?;
        } else {
          e = Expr::Member(Box::new(e), name);
        }
      } else if self.eat("[") {
        let index = self.expr()?;
        self.expect("]")?;
        e = Expr::Index(Box::new(e), Box::new(index));
      } else if matches!(self.peek().tok, Tok::Punct("(")) {
        return Err(Error::Violation("only built-in functions may be called".into()));
      } else {
        return Ok(e);
      }
    }
  }

  /// Comma-separated expressions up to the closing `)`.
  fn args(&mut self) -> Result<Vec<Expr>> {
    let mut args = Vec::new();
    while !self.eat(")") {
      args.push(self.expr()?);
      if !self.eat(",") {
        self.expect(")")?;
        break;
      }
    }
    Ok(args)
  }

  fn primary(&mut self) -> Result<Expr> {
    let t = self.bump();
    match t.tok {
      Tok::Num(n) => Ok(Expr::Literal(number(n))),
      Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
      Tok::Ident(name) => match name.as_str() {
        "true" => Ok(Expr::Literal(Value::Bool(true))),
        "false" => Ok(Expr::Literal(Value::Bool(false))),
        "null" | "undefined" => Ok(Expr::Literal(Value::Null)),
        _ => {
          check_allowed(&name)?;
          if self.eat("(") {
            let args = self.args()?;
            return call(&name, args);
          }
          match self.params.iter().position(|p| *p == name) {
            Some(i) => Ok(Expr::Param(i)),
            None => Err(Error::UnknownIdentifier(name)),
          }
        }
      },
      Tok::Punct("(") => {
        let e = self.expr()?;
        self.expect(")")?;
        Ok(e)
      }
      Tok::Punct("[") => {
        let mut items = Vec::new();
        while !self.eat("]") {
          items.push(self.expr()?);
          if !self.eat(",") {
            self.expect("]")?;
            break;
          }
        }
        Ok(Expr::List(items))
      }
      Tok::Punct("{") => {
        let mut entries = Vec::new();
        while !self.eat("}") {
          let key_token = self.bump();
          let key = match key_token.tok {
            Tok::Ident(k) | Tok::Str(k) => {
              check_allowed(&k)?;
              k
            }
            other => {
              return Err(syntax(key_token.pos, format!("expected object key, found {other:?}")));
            }
          };
          self.expect(":")?;
          entries.push((key, self.expr()?));
          if !self.eat(",") {
            self.expect("}")?;
            break;
          }
        }
        Ok(Expr::Object(entries))
      }
      Tok::Punct("=") => Err(Error::Violation("assignment is not permitted".into())),
      Tok::Eof => Err(syntax(t.pos, "unexpected end of script")),
      other => Err(syntax(t.pos, format!("unexpected {other:?}"))),
    }
  }
}

fn check_allowed(name: &str) -> Result<()> {
  if FORBIDDEN.contains(&name) {
    Err(Error::Violation(format!("{name:?} is not permitted")))
  } else {
    Ok(())
  }
}

fn call(name: &str, args: Vec<Expr>) -> Result<Expr> {
  let builtin =
    Builtin::from_name(name).ok_or_else(|| Error::UnknownFunction(name.to_owned()))?;
  builtin.check_arity(args.len())?;
  Ok(Expr::Call(builtin, args))
}

/// Integral literals become JSON integers.
pub(crate) fn number(n: f64) -> Value {
  if n.fract() == 0.0 && n.abs() < 9.0e15 {
    Value::from(n as i64)
  } else {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
  }
}
