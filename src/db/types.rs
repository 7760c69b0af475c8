//! Database-agnostic type mappings.
//!
//! Driver rows are normalised into [`Row`] values so that materialization and
//! scalar conversion work the same for every dialect.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction

use crate::db::DatabaseType;
use crate::db::row::Row;
use crate::error::{DataAccessError, DbResult};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    Date,
    Time,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Integer types
    if (lower.contains("int") && !lower.contains("interval")) || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // SQLite keeps temporal values as text; its declared types decode as text.
    if db != DatabaseType::SQLite {
        if lower.starts_with("timestamp") || lower == "datetime" {
            return TypeCategory::Timestamp;
        }
        if lower == "date" {
            return TypeCategory::Date;
        }
        if lower == "time" {
            return TypeCategory::Time;
        }
    }

    if lower.contains("char") || lower.contains("text") || lower == "enum" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => pg_numeric_text(value.as_bytes()?).map(RawDecimal),
        }
    }
}

const PG_NUMERIC_NEG: u16 = 0x4000;
const PG_NUMERIC_NAN: u16 = 0xC000;

/// Render PostgreSQL's binary NUMERIC (base-10000 digit groups) as decimal text.
fn pg_numeric_text(buf: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    let word = |at: usize| -> Result<[u8; 2], sqlx::error::BoxDynError> {
        buf.get(at..at + 2)
            .map(|b| [b[0], b[1]])
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = i16::from_be_bytes(word(0)?).max(0) as usize;
    let weight = i16::from_be_bytes(word(2)?) as i32;
    let sign = u16::from_be_bytes(word(4)?);
    let dscale = u16::from_be_bytes(word(6)?) as usize;

    if sign == PG_NUMERIC_NAN {
        return Ok("NaN".to_string());
    }

    let digits = (0..ndigits)
        .map(|i| word(8 + i * 2).map(i16::from_be_bytes))
        .collect::<Result<Vec<_>, _>>()?;
    let digit = |i: i32| -> i16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == PG_NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                out.push_str(&digit(i).to_string());
            } else {
                out.push_str(&format!("{:04}", digit(i)));
            }
        }
    }
    if dscale > 0 {
        let mut frac = String::new();
        let mut i = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }
    Ok(out)
}

/// Deserialize an `f64` from either a JSON number or decimal text.
///
/// DECIMAL columns decode to text to keep their exact representation; entity
/// fields that only need a float use this on top.
pub fn f64_from_decimal<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    match NumberOrText::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Optional variant of [`f64_from_decimal`].
pub fn opt_f64_from_decimal<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "f64_from_decimal")] f64);

    Option::<Wrapper>::deserialize(deserializer).map(|w| w.map(|Wrapper(v)| v))
}

/// Deserialize a `bool` from a JSON boolean or a 0/1 flag column.
pub fn bool_from_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Int(0) => Ok(false),
        Flag::Int(1) => Ok(true),
        Flag::Int(n) => Err(serde::de::Error::custom(format!("invalid flag value: {n}"))),
    }
}

/// Deserialize a `NaiveDateTime` from the text forms the decoders produce:
/// ISO 8601 with a `T`, RFC 3339 with an offset (converted to UTC), or
/// SQLite's `YYYY-MM-DD HH:MM:SS`.
pub fn datetime_from_text<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_datetime(&text)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {text}")))
}

/// Optional variant of [`datetime_from_text`].
pub fn opt_datetime_from_text<'de, D>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "datetime_from_text")] NaiveDateTime);

    Option::<Wrapper>::deserialize(deserializer).map(|w| w.map(|Wrapper(v)| v))
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(v) = DateTime::parse_from_rfc3339(text) {
        return Some(v.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

// =============================================================================
// Row Conversion
// =============================================================================

/// Result of decoding one non-null column value.
type Decoded = Result<JsonValue, sqlx::Error>;

/// Trait for converting driver rows into [`Row`].
///
/// SQL NULL becomes `JsonValue::Null`. A non-null value the decoder cannot
/// read fails the whole row with [`DataAccessError::Conversion`].
pub trait IntoRow {
    fn to_row(&self) -> DbResult<Row>;
}

impl IntoRow for MySqlRow {
    fn to_row(&self) -> DbResult<Row> {
        let mut row = Row::new();
        for (idx, col) in self.columns().iter().enumerate() {
            let type_name = col.type_info().name();
            let category = categorize_type(type_name, DatabaseType::MySql);
            let value = mysql::decode_column(self, idx, category)
                .map_err(|e| undecodable(col.name(), type_name, e))?;
            row.push(col.name(), value);
        }
        Ok(row)
    }
}

impl IntoRow for PgRow {
    fn to_row(&self) -> DbResult<Row> {
        let mut row = Row::new();
        for (idx, col) in self.columns().iter().enumerate() {
            let type_name = col.type_info().name();
            let category = categorize_type(type_name, DatabaseType::Postgres);
            let value = postgres::decode_column(self, idx, category)
                .map_err(|e| undecodable(col.name(), type_name, e))?;
            row.push(col.name(), value);
        }
        Ok(row)
    }
}

impl IntoRow for SqliteRow {
    fn to_row(&self) -> DbResult<Row> {
        let mut row = Row::new();
        for (idx, col) in self.columns().iter().enumerate() {
            let declared = col.type_info();
            // Expressions (COUNT(*), a + 1, ...) carry no declared type; fall
            // back to the storage class of the value itself.
            let type_name = if declared.is_null() {
                let raw = self
                    .try_get_raw(idx)
                    .map_err(|e| undecodable(col.name(), "NULL", e))?;
                raw.type_info().name().to_string()
            } else {
                declared.name().to_string()
            };
            let category = categorize_type(&type_name, DatabaseType::SQLite);
            let value = sqlite::decode_column(self, idx, category)
                .map_err(|e| undecodable(col.name(), &type_name, e))?;
            row.push(col.name(), value);
        }
        Ok(row)
    }
}

fn undecodable(column: &str, type_name: &str, err: sqlx::Error) -> DataAccessError {
    DataAccessError::conversion(
        "a row value",
        format!("column '{column}' ({type_name}): {err}"),
    )
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn binary_value(bytes: Vec<u8>) -> JsonValue {
    JsonValue::Array(bytes.into_iter().map(JsonValue::from).collect())
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Decoded {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(JsonValue::Null);
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Date => decode_string_of::<NaiveDate>(row, idx),
            TypeCategory::Time => decode_string_of::<NaiveTime>(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> Decoded {
        row.try_get::<RawDecimal, _>(idx)
            .map(|v| JsonValue::String(v.0))
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Decoded {
        row.try_get::<i8, _>(idx)
            .map(JsonValue::from)
            .or_else(|_| row.try_get::<i16, _>(idx).map(JsonValue::from))
            .or_else(|_| row.try_get::<i32, _>(idx).map(JsonValue::from))
            .or_else(|_| row.try_get::<i64, _>(idx).map(JsonValue::from))
            .or_else(|_| row.try_get::<u64, _>(idx).map(JsonValue::from))
    }

    fn decode_boolean(row: &MySqlRow, idx: usize) -> Decoded {
        row.try_get::<bool, _>(idx).map(JsonValue::Bool)
    }

    fn decode_float(row: &MySqlRow, idx: usize) -> Decoded {
        row.try_get::<f64, _>(idx)
            .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
            .map(float_value)
    }

    fn decode_binary(row: &MySqlRow, idx: usize) -> Decoded {
        row.try_get::<Vec<u8>, _>(idx).map(binary_value)
    }

    fn decode_json(row: &MySqlRow, idx: usize) -> Decoded {
        row.try_get::<JsonValue, _>(idx)
    }

    fn decode_timestamp(row: &MySqlRow, idx: usize) -> Decoded {
        row.try_get::<NaiveDateTime, _>(idx)
            .map(|v| JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            .or_else(|_| {
                row.try_get::<DateTime<Utc>, _>(idx)
                    .map(|v| JsonValue::String(v.to_rfc3339()))
            })
    }

    fn decode_string_of<T>(row: &MySqlRow, idx: usize) -> Decoded
    where
        T: for<'r> Decode<'r, sqlx::MySql> + Type<sqlx::MySql> + ToString,
    {
        row.try_get::<T, _>(idx).map(|v| JsonValue::String(v.to_string()))
    }

    fn decode_text(row: &MySqlRow, idx: usize) -> Decoded {
        row.try_get::<String, _>(idx).map(JsonValue::String)
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Decoded {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(JsonValue::Null);
        }
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Date => decode_string_of::<NaiveDate>(row, idx),
            TypeCategory::Time => decode_string_of::<NaiveTime>(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> Decoded {
        row.try_get::<RawDecimal, _>(idx)
            .map(|v| JsonValue::String(v.0))
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Decoded {
        row.try_get::<i16, _>(idx)
            .map(JsonValue::from)
            .or_else(|_| row.try_get::<i32, _>(idx).map(JsonValue::from))
            .or_else(|_| row.try_get::<i64, _>(idx).map(JsonValue::from))
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> Decoded {
        row.try_get::<bool, _>(idx).map(JsonValue::Bool)
    }

    fn decode_float(row: &PgRow, idx: usize) -> Decoded {
        row.try_get::<f64, _>(idx)
            .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
            .map(float_value)
    }

    fn decode_binary(row: &PgRow, idx: usize) -> Decoded {
        row.try_get::<Vec<u8>, _>(idx).map(binary_value)
    }

    fn decode_json(row: &PgRow, idx: usize) -> Decoded {
        row.try_get::<JsonValue, _>(idx)
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> Decoded {
        row.try_get::<uuid::Uuid, _>(idx)
            .map(|v| JsonValue::String(v.to_string()))
    }

    fn decode_timestamp(row: &PgRow, idx: usize) -> Decoded {
        row.try_get::<DateTime<Utc>, _>(idx)
            .map(|v| JsonValue::String(v.to_rfc3339()))
            .or_else(|_| {
                row.try_get::<NaiveDateTime, _>(idx)
                    .map(|v| JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
            })
    }

    fn decode_string_of<T>(row: &PgRow, idx: usize) -> Decoded
    where
        T: for<'r> Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres> + ToString,
    {
        row.try_get::<T, _>(idx).map(|v| JsonValue::String(v.to_string()))
    }

    fn decode_text(row: &PgRow, idx: usize) -> Decoded {
        row.try_get::<String, _>(idx).map(JsonValue::String)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Decoded {
        if row.try_get_raw(idx)?.is_null() {
            return Ok(JsonValue::Null);
        }
        match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            _ => decode_text(row, idx),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize) -> Decoded {
        row.try_get::<i64, _>(idx).map(JsonValue::from)
    }

    fn decode_boolean(row: &SqliteRow, idx: usize) -> Decoded {
        row.try_get::<bool, _>(idx).map(JsonValue::Bool)
    }

    fn decode_float(row: &SqliteRow, idx: usize) -> Decoded {
        row.try_get::<f64, _>(idx)
            // NUMERIC affinity stores whole numbers as INTEGER
            .or_else(|_| row.try_get::<i64, _>(idx).map(|v| v as f64))
            .map(float_value)
    }

    fn decode_binary(row: &SqliteRow, idx: usize) -> Decoded {
        row.try_get::<Vec<u8>, _>(idx).map(binary_value)
    }

    fn decode_text(row: &SqliteRow, idx: usize) -> Decoded {
        row.try_get::<String, _>(idx).map(JsonValue::String)
    }
}
