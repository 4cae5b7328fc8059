//! Row decoding into backend-neutral [`Record`]s.
//!
//! Column types are first classified into a [`ColumnKind`], then decoded by
//! a per-backend routine. Values that cannot be decoded become `null` and are
//! logged; a single odd column never fails a whole query.

use crate::models::{BackendKind, Record};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// Logical kind of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
}

/// Classify a driver type name.
pub fn column_kind(type_name: &str, backend: BackendKind) -> ColumnKind {
    let lower = type_name.to_ascii_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite NUMERIC affinity stores REAL or INTEGER
        if backend == BackendKind::Sqlite {
            return ColumnKind::Float;
        }
        return ColumnKind::Decimal;
    }
    if lower == "bool" || lower == "boolean" {
        return ColumnKind::Boolean;
    }
    if lower.contains("int") || lower.contains("serial") || lower == "tiny" {
        return ColumnKind::Integer;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return ColumnKind::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return ColumnKind::Json;
    }
    if lower == "uuid" {
        return ColumnKind::Uuid;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return ColumnKind::Binary;
    }
    // SQLite stores temporal values as text; decode them as text
    if backend != BackendKind::Sqlite {
        match lower.as_str() {
            "timestamptz" => return ColumnKind::TimestampTz,
            "timestamp" | "datetime" => return ColumnKind::Timestamp,
            "date" => return ColumnKind::Date,
            "time" => return ColumnKind::Time,
            _ => {}
        }
    }
    ColumnKind::Text
}

/// Binary values are rendered as base64 strings.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

fn text_or_json(v: String, type_name: &str) -> JsonValue {
    if type_name.to_ascii_lowercase().contains("json") {
        if let Ok(json) = serde_json::from_str::<JsonValue>(&v) {
            return json;
        }
    }
    JsonValue::String(v)
}

/// DECIMAL/NUMERIC read as the server's exact textual representation.
#[derive(Debug)]
struct ExactDecimal(String);

impl Type<sqlx::MySql> for ExactDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        ty.name().eq_ignore_ascii_case("decimal")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for ExactDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(ExactDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for ExactDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        ty.name().eq_ignore_ascii_case("numeric")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for ExactDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(ExactDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => numeric_to_string(value.as_bytes()?).map(ExactDecimal),
        }
    }
}

/// Render the binary NUMERIC wire format: a header of
/// (ndigits, weight, sign, dscale) followed by base-10000 digit groups.
fn numeric_to_string(buf: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    const NEGATIVE: u16 = 0x4000;
    const NAN: u16 = 0xC000;
    const POS_INFINITY: u16 = 0xD000;
    const NEG_INFINITY: u16 = 0xF000;

    if buf.len() < 8 {
        return Err("NUMERIC value shorter than its header".into());
    }
    let word = |i: usize| i16::from_be_bytes([buf[i], buf[i + 1]]);
    let ndigits = usize::try_from(word(0))?;
    let weight = i32::from(word(2));
    let sign = u16::from_be_bytes([buf[4], buf[5]]);
    let dscale = usize::from(u16::from_be_bytes([buf[6], buf[7]]));

    match sign {
        NAN => return Ok("NaN".to_string()),
        POS_INFINITY => return Ok("Infinity".to_string()),
        NEG_INFINITY => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if buf.len() < 8 + ndigits * 2 {
        return Err("NUMERIC value truncated".into());
    }
    let digits: Vec<i16> = (0..ndigits).map(|i| word(8 + i * 2)).collect();
    let group = |i: i32| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NEGATIVE {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", group(i)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

/// Convert driver rows to [`Record`]s.
pub trait RowToRecord {
    fn to_record(&self) -> Record;
}

impl RowToRecord for PgRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .map(|col| {
                let type_name = col.type_info().name();
                let kind = column_kind(type_name, BackendKind::Postgres);
                (col.name().to_string(), postgres::decode(self, col.ordinal(), kind))
            })
            .collect()
    }
}

impl RowToRecord for MySqlRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .map(|col| {
                let type_name = col.type_info().name();
                let kind = column_kind(type_name, BackendKind::MySql);
                let value = mysql::decode(self, col.ordinal(), kind, type_name);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToRecord for SqliteRow {
    fn to_record(&self) -> Record {
        self.columns()
            .iter()
            .map(|col| {
                let type_name = col.type_info().name();
                let kind = column_kind(type_name, BackendKind::Sqlite);
                let value = sqlite::decode(self, col.ordinal(), kind, type_name);
                (col.name().to_string(), value)
            })
            .collect()
    }
}

/// Decode an optional column, logging and nulling on failure.
macro_rules! column {
    ($row:expr, $idx:expr, $ty:ty) => {
        match $row.try_get::<Option<$ty>, _>($idx) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(column = $idx, error = %e, "Failed to decode column");
                None
            }
        }
    };
}

mod postgres {
    use super::*;

    pub(super) fn decode(row: &PgRow, idx: usize, kind: ColumnKind) -> JsonValue {
        let value = match kind {
            ColumnKind::Integer => integer(row, idx),
            ColumnKind::Float => float(row, idx),
            ColumnKind::Decimal => column!(row, idx, ExactDecimal).map(|d| JsonValue::String(d.0)),
            ColumnKind::Boolean => column!(row, idx, bool).map(JsonValue::Bool),
            ColumnKind::Binary => column!(row, idx, Vec<u8>).map(|b| encode_binary(&b)),
            ColumnKind::Json => column!(row, idx, JsonValue),
            ColumnKind::Uuid => column!(row, idx, uuid::Uuid).map(|u| JsonValue::String(u.to_string())),
            ColumnKind::TimestampTz => {
                column!(row, idx, DateTime<Utc>).map(|t| JsonValue::String(t.to_rfc3339()))
            }
            ColumnKind::Timestamp => {
                column!(row, idx, NaiveDateTime).map(|t| JsonValue::String(t.to_string()))
            }
            ColumnKind::Date => column!(row, idx, NaiveDate).map(|t| JsonValue::String(t.to_string())),
            ColumnKind::Time => column!(row, idx, NaiveTime).map(|t| JsonValue::String(t.to_string())),
            ColumnKind::Text => column!(row, idx, String).map(JsonValue::String),
        };
        value.unwrap_or(JsonValue::Null)
    }

    fn integer(row: &PgRow, idx: usize) -> Option<JsonValue> {
        // Postgres type checks are strict, so try each width
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Into::into);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(Into::into);
        }
        column!(row, idx, i16).map(Into::into)
    }

    fn float(row: &PgRow, idx: usize) -> Option<JsonValue> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(float_value);
        }
        column!(row, idx, f32).map(|v| float_value(v.into()))
    }
}

mod mysql {
    use super::*;

    pub(super) fn decode(row: &MySqlRow, idx: usize, kind: ColumnKind, type_name: &str) -> JsonValue {
        let value = match kind {
            ColumnKind::Integer => integer(row, idx),
            ColumnKind::Float => column!(row, idx, f64).map(float_value),
            ColumnKind::Decimal => column!(row, idx, ExactDecimal).map(|d| JsonValue::String(d.0)),
            ColumnKind::Boolean => column!(row, idx, bool).map(JsonValue::Bool),
            ColumnKind::Binary => column!(row, idx, Vec<u8>).map(|b| encode_binary(&b)),
            ColumnKind::Json => column!(row, idx, JsonValue),
            ColumnKind::TimestampTz | ColumnKind::Timestamp => {
                if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
                    v.map(|t| JsonValue::String(t.to_rfc3339()))
                } else {
                    column!(row, idx, NaiveDateTime).map(|t| JsonValue::String(t.to_string()))
                }
            }
            ColumnKind::Date => column!(row, idx, NaiveDate).map(|t| JsonValue::String(t.to_string())),
            ColumnKind::Time => column!(row, idx, NaiveTime).map(|t| JsonValue::String(t.to_string())),
            ColumnKind::Uuid | ColumnKind::Text => {
                column!(row, idx, String).map(|v| text_or_json(v, type_name))
            }
        };
        value.unwrap_or(JsonValue::Null)
    }

    fn integer(row: &MySqlRow, idx: usize) -> Option<JsonValue> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Into::into);
        }
        // BIGINT UNSIGNED does not fit i64
        column!(row, idx, u64).map(Into::into)
    }
}

mod sqlite {
    use super::*;

    pub(super) fn decode(row: &SqliteRow, idx: usize, kind: ColumnKind, type_name: &str) -> JsonValue {
        let value = match kind {
            ColumnKind::Integer => column!(row, idx, i64).map(Into::into),
            ColumnKind::Float | ColumnKind::Decimal => column!(row, idx, f64).map(float_value),
            ColumnKind::Boolean => column!(row, idx, bool).map(JsonValue::Bool),
            ColumnKind::Binary => column!(row, idx, Vec<u8>).map(|b| encode_binary(&b)),
            _ => dynamic(row, idx, type_name),
        };
        value.unwrap_or(JsonValue::Null)
    }

    /// Expression columns (`SELECT 1`, `count(*)`) carry the value's storage
    /// class rather than a declared type, so fall through the classes.
    fn dynamic(row: &SqliteRow, idx: usize, type_name: &str) -> Option<JsonValue> {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(|s| text_or_json(s, type_name));
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Into::into);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(float_value);
        }
        column!(row, idx, Vec<u8>).map(|b| encode_binary(&b))
    }
}
