//! Driver-independent result rows.

use crate::error::{DataAccessError, DbResult};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// One result row: column names and JSON-normalised values in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<JsonValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column. Used by drivers and by test doubles.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<JsonValue>) {
        self.columns.push(column.into());
        self.values.push(value.into());
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of the named column (exact match first, then case-insensitive).
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(column))
            })
            .map(|idx| &self.values[idx])
    }

    /// Value of the first column, if the row has any.
    pub fn first_value(&self) -> Option<&JsonValue> {
        self.values.first()
    }

    /// Build a JSON object keyed by column name. A repeated column name keeps
    /// its last value.
    pub fn to_object(&self) -> serde_json::Map<String, JsonValue> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }

    /// Materialize this row into `T` by column name.
    pub fn decode<T: DeserializeOwned>(&self) -> DbResult<T> {
        serde_json::from_value(JsonValue::Object(self.to_object())).map_err(|e| {
            DataAccessError::conversion(
                std::any::type_name::<T>(),
                format!("row {{{}}}: {e}", self.columns.join(", ")),
            )
        })
    }
}
