//! SQL commands and parameter binding.
//!
//! Commands name their parameters `@name`, independent of the target dialect.
//! Before execution a command is bound for a concrete provider: the text is
//! tokenized with that provider's sqlparser dialect, `@name` tokens are
//! rewritten into positional placeholders, and everything else (literals,
//! quoted identifiers, comments) is copied through untouched.

use crate::db::connection::DatabaseType;
use crate::error::{DataAccessError, DbResult};
use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use std::time::Duration;

/// A parameter value for parameterized commands.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(NaiveDateTime),
    Json(JsonValue),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Timestamp(_) => "timestamp",
            Self::Json(_) => "json",
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<NaiveDateTime> for ParamValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl From<JsonValue> for ParamValue {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Whether a command is ad-hoc SQL or a stored-procedure invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandShape {
    #[default]
    Text,
    StoredProcedure,
}

/// An SQL command: text, named parameters and shape.
///
/// Built with [`Command::text`] or [`Command::procedure`] and then handed to
/// the executor by reference, so it is never modified once issued.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    text: String,
    parameters: Vec<(String, ParamValue)>,
    shape: CommandShape,
    timeout: Option<Duration>,
}

impl Command {
    /// Create an ad-hoc SQL command.
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            text: sql.into(),
            parameters: Vec::new(),
            shape: CommandShape::Text,
            timeout: None,
        }
    }

    /// Create a stored-procedure invocation. Parameters are passed in the
    /// order they are added.
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            text: name.into(),
            parameters: Vec::new(),
            shape: CommandShape::StoredProcedure,
            timeout: None,
        }
    }

    /// Bind a named parameter. The leading `@` is optional; binding the same
    /// name twice replaces the earlier value.
    pub fn param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        let name = name.trim_start_matches('@');
        let value = value.into();
        match self.parameters.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.parameters.push((name.to_string(), value)),
        }
        self
    }

    /// Override the executor's default timeout for this command.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn sql(&self) -> &str {
        &self.text
    }

    pub fn shape(&self) -> CommandShape {
        self.shape
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn parameters(&self) -> &[(String, ParamValue)] {
        &self.parameters
    }

    /// Look up a bound parameter by name (with or without `@`).
    pub fn parameter(&self, name: &str) -> Option<&ParamValue> {
        let name = name.trim_start_matches('@');
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Render this command for `provider`.
    pub fn bind(&self, provider: DatabaseType) -> DbResult<BoundCommand<'_>> {
        match self.shape {
            CommandShape::Text => self.bind_text(provider),
            CommandShape::StoredProcedure => self.bind_procedure(provider),
        }
    }

    fn bind_text(&self, provider: DatabaseType) -> DbResult<BoundCommand<'_>> {
        let dialect = dialect_for(provider);
        let tokens = Tokenizer::new(dialect.as_ref(), &self.text)
            .with_unescape(false)
            .tokenize_with_location()
            .map_err(|e| DataAccessError::command(format!("Cannot tokenize command: {e}")))?;
        let lines = LineIndex::new(&self.text);

        let mut sql = String::with_capacity(self.text.len());
        let mut params: Vec<&ParamValue> = Vec::new();
        let mut numbered: Vec<&str> = Vec::new();
        let mut copied = 0;

        let mut tokens = tokens.iter().peekable();
        while let Some(current) = tokens.next() {
            let (name, end) = match &current.token {
                // Dialects that read `@name` as one identifier
                Token::Word(word)
                    if word.quote_style.is_none()
                        && word.value.starts_with('@')
                        && !word.value.starts_with("@@") =>
                {
                    (&word.value[1..], current.span.end)
                }
                // Dialects that split it into `@` and a word
                Token::AtSign => match tokens.peek() {
                    Some(&next) if next.span.start == current.span.end => match &next.token {
                        Token::Word(word) if word.quote_style.is_none() => {
                            tokens.next();
                            (word.value.as_str(), next.span.end)
                        }
                        _ => continue,
                    },
                    _ => continue,
                },
                _ => continue,
            };

            let (key, value) = self
                .parameters
                .iter()
                .find(|(n, _)| n == name)
                .map(|(n, v)| (n.as_str(), v))
                .ok_or_else(|| {
                    DataAccessError::command(format!("No value bound for parameter @{name}"))
                })?;

            let start = lines.offset(current.span.start);
            let stop = lines.offset(end);
            let (start, stop) = match (start, stop) {
                (Some(start), Some(stop)) if copied <= start && start < stop => (start, stop),
                _ => {
                    return Err(DataAccessError::command(format!(
                        "Cannot locate parameter @{name} in command text"
                    )));
                }
            };
            sql.push_str(&self.text[copied..start]);
            copied = stop;

            if provider.numbered_placeholders() {
                let position = match numbered.iter().position(|n| *n == key) {
                    Some(p) => p + 1,
                    None => {
                        numbered.push(key);
                        params.push(value);
                        numbered.len()
                    }
                };
                sql.push('$');
                sql.push_str(&position.to_string());
            } else {
                sql.push('?');
                params.push(value);
            }
        }
        sql.push_str(&self.text[copied..]);

        Ok(BoundCommand { sql, params })
    }

    fn bind_procedure(&self, provider: DatabaseType) -> DbResult<BoundCommand<'_>> {
        if !provider.supports_stored_procedures() {
            return Err(DataAccessError::command(format!(
                "{provider} does not support stored procedures (procedure: {})",
                self.text
            )));
        }
        let name = self.text.trim();
        if name.is_empty()
            || !name
                .chars()
                .all(|c| is_ident_char(c) || matches!(c, '.' | '"' | '`'))
        {
            return Err(DataAccessError::command(format!(
                "Invalid stored procedure name: '{}'",
                self.text
            )));
        }

        let arguments: Vec<String> = self
            .parameters
            .iter()
            .enumerate()
            .map(|(idx, (param, _))| match provider {
                DatabaseType::Postgres => format!("{param} => ${}", idx + 1),
                _ => "?".to_string(),
            })
            .collect();

        Ok(BoundCommand {
            sql: format!("CALL {name}({})", arguments.join(", ")),
            params: self.parameters.iter().map(|(_, v)| v).collect(),
        })
    }
}

/// A command rendered for one dialect: final SQL text and values in
/// placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundCommand<'a> {
    pub sql: String,
    pub params: Vec<&'a ParamValue>,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn dialect_for(provider: DatabaseType) -> Box<dyn Dialect> {
    match provider {
        DatabaseType::MySql => Box::new(MySqlDialect {}),
        DatabaseType::Postgres => Box::new(PostgreSqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Maps tokenizer locations (1-based line and character column) back to
/// byte offsets in the command text.
struct LineIndex<'a> {
    text: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(text: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, starts }
    }

    fn offset(&self, location: Location) -> Option<usize> {
        let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
        let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
        let line_start = *self.starts.get(line)?;
        let rest = &self.text[line_start..];
        rest.char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(rest.len()))
            .nth(column)
            .map(|i| line_start + i)
    }
}
