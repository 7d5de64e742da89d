//! Field selectors for picking the identifying part of a request.
//!
//! A deliberately small path language:
//!
//! | Form                     | Meaning                                        |
//! |--------------------------|------------------------------------------------|
//! | `order.id`               | object field access                            |
//! | `items[0]`, `items[-1]`  | array index, negative counts from the end      |
//! | `"user name".first`      | quoted field name                              |
//! | `json(body).order_id`    | decode a JSON string, then keep navigating     |
//! | `[order_id, customer.id]`| multi-select list (top level only)             |
//!
//! `powertools_json(...)` is accepted as an alias of `json(...)`. Missing fields
//! and out-of-range indices select `null`.

use std::borrow::Cow;
use std::fmt;

use serde_json::Value;

use crate::error::IdempotencyError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Field(String),
    Index(i64),
    Json(Vec<Step>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Path(Vec<Step>),
    MultiSelect(Vec<Vec<Step>>),
}

/// A parsed selector expression.
#[derive(Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    expr: Expr,
}

impl Selector {
    /// Parses a selector, failing with a Key error on invalid syntax.
    pub fn parse(source: &str) -> Result<Self, IdempotencyError> {
        let expr = Parser::new(source).parse_expression().map_err(|reason| {
            IdempotencyError::key(format!("Invalid selector '{}': {}", source, reason))
        })?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// The expression as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if this selector yields a list of values.
    pub fn is_multi_select(&self) -> bool {
        matches!(self.expr, Expr::MultiSelect(_))
    }

    /// Evaluates the selector against `value`.
    ///
    /// Missing elements evaluate to `null`; a `json(...)` step over a string that
    /// is not valid JSON is a Key error.
    pub fn select(&self, value: &Value) -> Result<Value, IdempotencyError> {
        match &self.expr {
            Expr::Path(steps) => Ok(walk(steps, value)?
                .map(Cow::into_owned)
                .unwrap_or(Value::Null)),
            Expr::MultiSelect(paths) => paths
                .iter()
                .map(|steps| {
                    Ok(walk(steps, value)?
                        .map(Cow::into_owned)
                        .unwrap_or(Value::Null))
                })
                .collect::<Result<Vec<_>, IdempotencyError>>()
                .map(Value::Array),
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Selector").field(&self.source).finish()
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn walk<'a>(steps: &[Step], root: &'a Value) -> Result<Option<Cow<'a, Value>>, IdempotencyError> {
    let mut current = Cow::Borrowed(root);
    for step in steps {
        let next = match step {
            Step::Field(name) => field(current, name),
            Step::Index(position) => index(current, *position),
            Step::Json(inner) => decode_json(inner, &current)?.map(Cow::Owned),
        };
        current = match next {
            Some(value) => value,
            None => return Ok(None),
        };
    }
    Ok(Some(current))
}

fn field<'a>(current: Cow<'a, Value>, name: &str) -> Option<Cow<'a, Value>> {
    match current {
        Cow::Borrowed(value) => value.get(name).map(Cow::Borrowed),
        Cow::Owned(Value::Object(mut map)) => map.remove(name).map(Cow::Owned),
        Cow::Owned(_) => None,
    }
}

fn index(current: Cow<'_, Value>, position: i64) -> Option<Cow<'_, Value>> {
    let len = current.as_array()?.len() as i64;
    let resolved = if position < 0 { len + position } else { position };
    if resolved < 0 || resolved >= len {
        return None;
    }
    let resolved = resolved as usize;
    match current {
        Cow::Borrowed(value) => value.get(resolved).map(Cow::Borrowed),
        Cow::Owned(Value::Array(mut items)) => Some(Cow::Owned(items.swap_remove(resolved))),
        Cow::Owned(_) => None,
    }
}

fn decode_json(inner: &[Step], current: &Value) -> Result<Option<Value>, IdempotencyError> {
    match walk(inner, current)?.as_deref() {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => serde_json::from_str(text)
            .map(Some)
            .map_err(|e| IdempotencyError::key(format!("json() could not decode value: {}", e))),
        Some(other) => Err(IdempotencyError::key(format!(
            "json() expects a string, found {}",
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map(char::is_whitespace).unwrap_or(false) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        self.skip_whitespace();
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(format!("expected '{}' at {}, found '{}'", expected, self.pos, c)),
            None => Err(format!("expected '{}' at end of expression", expected)),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, String> {
        self.skip_whitespace();
        let expr = if self.peek() == Some('[') && !self.at_index_bracket() {
            self.pos += 1;
            let mut paths = vec![self.parse_path()?];
            loop {
                self.skip_whitespace();
                match self.peek() {
                    Some(',') => {
                        self.pos += 1;
                        paths.push(self.parse_path()?);
                    }
                    Some(']') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(format!("expected ',' or ']' at {}", self.pos)),
                }
            }
            Expr::MultiSelect(paths)
        } else {
            Expr::Path(self.parse_path()?)
        };

        self.skip_whitespace();
        match self.peek() {
            None => Ok(expr),
            Some(c) => Err(format!("unexpected '{}' at {}", c, self.pos)),
        }
    }

    /// True if the `[` at the cursor opens an array index rather than a list.
    fn at_index_bracket(&self) -> bool {
        let mut cursor = self.pos + 1;
        let skip = |mut at: usize| {
            while self.chars.get(at).map(|c| c.is_whitespace()).unwrap_or(false) {
                at += 1;
            }
            at
        };
        cursor = skip(cursor);
        if self.chars.get(cursor) == Some(&'-') {
            cursor += 1;
        }
        let digits_start = cursor;
        while self.chars.get(cursor).map(char::is_ascii_digit).unwrap_or(false) {
            cursor += 1;
        }
        if cursor == digits_start {
            return false;
        }
        cursor = skip(cursor);
        self.chars.get(cursor) == Some(&']')
    }

    fn parse_path(&mut self) -> Result<Vec<Step>, String> {
        self.skip_whitespace();
        let mut steps = Vec::new();
        if self.peek() == Some('[') {
            steps.push(self.parse_index()?);
        } else {
            steps.push(self.parse_step()?);
        }

        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    steps.push(self.parse_step()?);
                }
                Some('[') if self.at_index_bracket() => steps.push(self.parse_index()?),
                _ => break,
            }
        }
        Ok(steps)
    }

    fn parse_step(&mut self) -> Result<Step, String> {
        match self.peek() {
            Some('"') => Ok(Step::Field(self.parse_quoted()?)),
            Some(c) if is_identifier_char(c) => {
                let name = self.parse_identifier();
                if self.peek() == Some('(') {
                    if name != "json" && name != "powertools_json" {
                        return Err(format!("unknown function '{}'", name));
                    }
                    self.pos += 1;
                    let inner = self.parse_path()?;
                    self.expect(')')?;
                    Ok(Step::Json(inner))
                } else {
                    Ok(Step::Field(name))
                }
            }
            Some(c) => Err(format!("unexpected '{}' at {}", c, self.pos)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_identifier(&mut self) -> String {
        let start = self.pos;
        while self.peek().map(is_identifier_char).unwrap_or(false) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_quoted(&mut self) -> Result<String, String> {
        self.pos += 1;
        let mut name = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.pos += 1;
                    return Ok(name);
                }
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ ('"' | '\\')) => name.push(c),
                        Some(c) => return Err(format!("invalid escape '\\{}'", c)),
                        None => return Err("unterminated quoted name".to_string()),
                    }
                    self.pos += 1;
                }
                Some(c) => {
                    name.push(c);
                    self.pos += 1;
                }
                None => return Err("unterminated quoted name".to_string()),
            }
        }
    }

    fn parse_index(&mut self) -> Result<Step, String> {
        self.expect('[')?;
        self.skip_whitespace();
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            self.pos += 1;
        }
        let literal: String = self.chars[start..self.pos].iter().collect();
        let position = literal
            .parse::<i64>()
            .map_err(|_| format!("invalid index '{}'", literal))?;
        self.expect(']')?;
        Ok(Step::Index(position))
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}
