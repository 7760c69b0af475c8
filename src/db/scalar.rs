//! Scalar conversion rules for `execute_scalar`.
//!
//! A SQL NULL (or a command that returns no rows) converts to the target's
//! `Default`. Non-null values convert by these rules and nothing else:
//!
//! | target            | accepted                                                     |
//! |-------------------|--------------------------------------------------------------|
//! | integers          | in-range integers, floats with no fraction, booleans, numeric text |
//! | `f32`, `f64`      | any number, numeric text                                     |
//! | `bool`            | booleans, `0`/`1`, `"true"`/`"false"`                        |
//! | `String`          | any non-null value; JSON documents are serialized            |
//! | `JsonValue`       | anything                                                     |
//! | `Option<T>`       | `None` for NULL, otherwise the rule for `T`                  |
//!
//! Types outside this table (enums, money types) implement [`FromScalar`]
//! themselves.

use crate::error::{DataAccessError, DbResult};
use serde_json::Value as JsonValue;

pub trait FromScalar: Sized {
    /// Convert a non-null value.
    fn from_scalar(value: &JsonValue) -> DbResult<Self>;

    /// Value used for SQL NULL and for an empty result.
    fn from_null() -> Self;
}

/// Apply the scalar rules to an optional first value.
pub fn convert<T: FromScalar>(value: Option<&JsonValue>) -> DbResult<T> {
    match value {
        None | Some(JsonValue::Null) => Ok(T::from_null()),
        Some(v) => T::from_scalar(v),
    }
}

fn mismatch<T>(value: &JsonValue) -> DataAccessError {
    DataAccessError::conversion(std::any::type_name::<T>(), describe(value))
}

fn describe(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "null".to_string(),
        JsonValue::Bool(b) => format!("bool {b}"),
        JsonValue::Number(n) => format!("number {n}"),
        JsonValue::String(s) => format!("string {s:?}"),
        JsonValue::Array(_) => "array".to_string(),
        JsonValue::Object(_) => "object".to_string(),
    }
}

/// Widest integer reading of a value, if it has one.
fn as_integer(value: &JsonValue) -> Option<i128> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| n.as_f64().and_then(integral_f64)),
        JsonValue::Bool(b) => Some(i128::from(*b)),
        JsonValue::String(s) => {
            let s = s.trim();
            s.parse::<i128>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral_f64))
        }
        _ => None,
    }
}

fn integral_f64(f: f64) -> Option<i128> {
    (f.is_finite() && f.fract() == 0.0).then_some(f as i128)
}

macro_rules! impl_from_scalar_int {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl FromScalar for $ty {
                fn from_scalar(value: &JsonValue) -> DbResult<Self> {
                    as_integer(value)
                        .and_then(|i| <$ty>::try_from(i).ok())
                        .ok_or_else(|| mismatch::<$ty>(value))
                }

                fn from_null() -> Self {
                    0
                }
            }
        )+
    };
}

impl_from_scalar_int!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl FromScalar for f64 {
    fn from_scalar(value: &JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .ok_or_else(|| mismatch::<f64>(value))
    }

    fn from_null() -> Self {
        0.0
    }
}

impl FromScalar for f32 {
    fn from_scalar(value: &JsonValue) -> DbResult<Self> {
        f64::from_scalar(value)
            .map(|v| v as f32)
            .map_err(|_| mismatch::<f32>(value))
    }

    fn from_null() -> Self {
        0.0
    }
}

impl FromScalar for bool {
    fn from_scalar(value: &JsonValue) -> DbResult<Self> {
        match value {
            JsonValue::Bool(b) => Some(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => None,
            },
            JsonValue::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            JsonValue::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
        .ok_or_else(|| mismatch::<bool>(value))
    }

    fn from_null() -> Self {
        false
    }
}

impl FromScalar for String {
    fn from_scalar(value: &JsonValue) -> DbResult<Self> {
        Ok(match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    fn from_null() -> Self {
        String::new()
    }
}

impl FromScalar for JsonValue {
    fn from_scalar(value: &JsonValue) -> DbResult<Self> {
        Ok(value.clone())
    }

    fn from_null() -> Self {
        JsonValue::Null
    }
}

impl<T: FromScalar> FromScalar for Option<T> {
    fn from_scalar(value: &JsonValue) -> DbResult<Self> {
        T::from_scalar(value).map(Some)
    }

    fn from_null() -> Self {
        None
    }
}
