//! Row decoding.
//!
//! Rows from every shard are converted to JSON maps so results from
//! differently-typed drivers merge into one uniform result set.
//!
//! Decoding works in two steps:
//! 1. `ValueKind` classifies the column's declared type name
//! 2. a per-driver decoder tries the matching Rust types, falling back to
//!    progressively looser ones for columns without a declared type
//!    (expressions such as `COUNT(*)` on SQLite)
//!
//! DECIMAL/NUMERIC values are returned as their exact decimal text and
//! temporal values as ISO-8601 strings.

use crate::models::Row;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::error::BoxDynError;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};
use std::fmt::Write as _;

/// Logical category of a column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Date,
    Time,
    DateTime,
    /// Declared type unknown or not mapped; decoded by probing.
    Untyped,
}

/// Classify a declared column type name.
pub fn classify(type_name: &str) -> ValueKind {
    let lower = type_name.to_ascii_lowercase();
    match lower.as_str() {
        "" | "null" | "interval" => ValueKind::Untyped,
        "bool" | "boolean" => ValueKind::Boolean,
        "json" | "jsonb" => ValueKind::Json,
        "real" | "float4" | "float8" | "double precision" => ValueKind::Float,
        "bytea" => ValueKind::Binary,
        "date" => ValueKind::Date,
        "time" => ValueKind::Time,
        "datetime" | "timestamp" | "timestamptz" => ValueKind::DateTime,
        _ if lower.contains("decimal") || lower.contains("numeric") => ValueKind::Decimal,
        _ if lower.contains("int") || lower.contains("serial") => ValueKind::Integer,
        _ if lower.contains("float") || lower.contains("double") => ValueKind::Float,
        _ if lower.contains("blob") || lower.contains("binary") => ValueKind::Binary,
        _ if lower.contains("char") || lower.contains("text") || lower.contains("uuid") => {
            ValueKind::Text
        }
        _ => ValueKind::Untyped,
    }
}

/// Exact text of a DECIMAL/NUMERIC value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecimalText(pub String);

impl Type<sqlx::MySql> for DecimalText {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        classify(ty.name()) == ValueKind::Decimal
    }
}

impl<'r> Decode<'r, sqlx::MySql> for DecimalText {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, BoxDynError> {
        // MySQL sends DECIMAL as text in both protocols.
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(DecimalText(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for DecimalText {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        classify(ty.name()) == ValueKind::Decimal
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for DecimalText {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(DecimalText(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(DecimalText(pg_numeric_text(value.as_bytes()?)?)),
        }
    }
}

/// Render a NUMERIC in PostgreSQL's binary wire format as decimal text.
///
/// Layout: `ndigits`, `weight`, `sign`, `dscale` (all 16-bit big-endian),
/// followed by `ndigits` base-10000 digits, most significant first.
pub fn pg_numeric_text(buf: &[u8]) -> Result<String, BoxDynError> {
    let word = |at: usize| -> Result<i16, BoxDynError> {
        buf.get(at..at + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = usize::try_from(word(0)?)?;
    let weight = i32::from(word(2)?);
    let sign = word(4)? as u16;
    let dscale = usize::from(word(6)? as u16);

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|k| word(8 + 2 * k))
        .collect::<Result<Vec<_>, _>>()?;
    let digit = |i: i32| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for i in 0..=weight {
            if i == 0 {
                write!(out, "{}", digit(i))?;
            } else {
                write!(out, "{:04}", digit(i))?;
            }
        }
    }
    if dscale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < dscale {
            write!(fraction, "{:04}", digit(i))?;
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

fn date_value(v: NaiveDate) -> JsonValue {
    JsonValue::String(v.format("%Y-%m-%d").to_string())
}

fn time_value(v: NaiveTime) -> JsonValue {
    JsonValue::String(v.format("%H:%M:%S%.f").to_string())
}

fn naive_datetime_value(v: NaiveDateTime) -> JsonValue {
    JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn utc_datetime_value(v: DateTime<Utc>) -> JsonValue {
    JsonValue::String(v.to_rfc3339())
}

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_row(&self) -> Row;
}

/// Generates a decoder probing the given Rust types in order.
///
/// A value no candidate can decode is logged and returned as null.
macro_rules! probe {
    ($row:expr, $idx:expr, $($ty:ty => $conv:expr),+ $(,)?) => {{
        let mut value = None;
        let mut last_error = None;
        $(
            if value.is_none() {
                match $row.try_get::<Option<$ty>, _>($idx) {
                    Ok(Some(v)) => value = Some(($conv)(v)),
                    Ok(None) => value = Some(JsonValue::Null),
                    Err(e) => last_error = Some(e),
                }
            }
        )+
        value.unwrap_or_else(|| {
            let column = $row.column($idx);
            tracing::error!(
                column = %column.name(),
                type_name = %column.type_info().name(),
                error = ?last_error,
                "Failed to decode column value"
            );
            JsonValue::Null
        })
    }};
}

impl RowToJson for MySqlRow {
    fn to_row(&self) -> Row {
        self.columns()
            .iter()
            .map(|col| {
                let idx = col.ordinal();
                let value = match classify(col.type_info().name()) {
                    ValueKind::Integer => probe!(self, idx,
                        i64 => |v: i64| JsonValue::from(v),
                        u64 => |v: u64| JsonValue::from(v),
                        i32 => |v: i32| JsonValue::from(v),
                        i8 => |v: i8| JsonValue::from(v),
                        bool => JsonValue::Bool,
                    ),
                    ValueKind::Float => probe!(self, idx, f64 => float_value, f32 => |v: f32| float_value(v as f64)),
                    ValueKind::Decimal => probe!(self, idx, DecimalText => |v: DecimalText| JsonValue::String(v.0)),
                    ValueKind::Boolean => probe!(self, idx, bool => JsonValue::Bool),
                    ValueKind::Binary => probe!(self, idx, Vec<u8> => |v: Vec<u8>| binary_value(&v)),
                    ValueKind::Json => probe!(self, idx, JsonValue => |v| v),
                    ValueKind::Date => probe!(self, idx, NaiveDate => date_value),
                    ValueKind::Time => probe!(self, idx, NaiveTime => time_value, String => JsonValue::String),
                    ValueKind::DateTime => probe!(self, idx,
                        NaiveDateTime => naive_datetime_value,
                        DateTime<Utc> => utc_datetime_value,
                    ),
                    ValueKind::Text | ValueKind::Untyped => probe!(self, idx,
                        String => JsonValue::String,
                        i64 => |v: i64| JsonValue::from(v),
                        f64 => float_value,
                    ),
                };
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_row(&self) -> Row {
        self.columns()
            .iter()
            .map(|col| {
                let idx = col.ordinal();
                let value = match classify(col.type_info().name()) {
                    ValueKind::Integer => probe!(self, idx,
                        i64 => |v: i64| JsonValue::from(v),
                        i32 => |v: i32| JsonValue::from(v),
                        i16 => |v: i16| JsonValue::from(v),
                    ),
                    ValueKind::Float => probe!(self, idx, f64 => float_value, f32 => |v: f32| float_value(v as f64)),
                    ValueKind::Decimal => probe!(self, idx, DecimalText => |v: DecimalText| JsonValue::String(v.0)),
                    ValueKind::Boolean => probe!(self, idx, bool => JsonValue::Bool),
                    ValueKind::Binary => probe!(self, idx, Vec<u8> => |v: Vec<u8>| binary_value(&v)),
                    ValueKind::Json => probe!(self, idx, JsonValue => |v| v),
                    ValueKind::Date => probe!(self, idx, NaiveDate => date_value),
                    ValueKind::Time => probe!(self, idx, NaiveTime => time_value, String => JsonValue::String),
                    ValueKind::DateTime => probe!(self, idx,
                        NaiveDateTime => naive_datetime_value,
                        DateTime<Utc> => utc_datetime_value,
                    ),
                    ValueKind::Text | ValueKind::Untyped => probe!(self, idx,
                        String => JsonValue::String,
                        i64 => |v: i64| JsonValue::from(v),
                        f64 => float_value,
                    ),
                };
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_row(&self) -> Row {
        self.columns()
            .iter()
            .map(|col| {
                let idx = col.ordinal();
                // SQLite is dynamically typed; the declared type is only a hint.
                let value = match classify(col.type_info().name()) {
                    ValueKind::Boolean => probe!(self, idx, bool => JsonValue::Bool, i64 => |v: i64| JsonValue::from(v)),
                    ValueKind::Binary => probe!(self, idx, Vec<u8> => |v: Vec<u8>| binary_value(&v)),
                    ValueKind::Json => probe!(self, idx,
                        String => |v: String| serde_json::from_str(&v).unwrap_or(JsonValue::String(v)),
                    ),
                    _ => probe!(self, idx,
                        i64 => |v: i64| JsonValue::from(v),
                        f64 => float_value,
                        String => JsonValue::String,
                        Vec<u8> => |v: Vec<u8>| binary_value(&v),
                    ),
                };
                (col.name().to_string(), value)
            })
            .collect()
    }
}

/// Read a count-like column as an unsigned integer.
///
/// Drivers disagree on the type of `COUNT(*)` (BIGINT, NUMERIC, untyped), so
/// integral floats and numeric strings are accepted too.
pub fn row_count_value(row: &Row, column: &str) -> Option<u64> {
    match row.get(column)? {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
