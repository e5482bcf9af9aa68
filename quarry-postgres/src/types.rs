//! PostgreSQL type mapping and value decoding.

use std::error::Error;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::types::{FromSql, Type};
use postgres::Row;
use serde_json::Value;

type DecodeError = Box<dyn Error + Sync + Send>;

/// Map a PostgreSQL type name to a semantic type name.
///
/// Array types (names starting with `_`) map to `array`; unknown types keep
/// their PostgreSQL name.
pub fn semantic_type(pg_type: &str) -> String {
    let semantic = match pg_type {
        "int2" | "int4" | "int8" | "oid" => "integer",
        "float4" | "float8" => "float",
        "numeric" | "money" => "decimal",
        "text" | "varchar" | "bpchar" | "char" | "name" | "citext" => "string",
        "bool" => "boolean",
        "date" => "date",
        "time" | "timetz" => "time",
        "timestamp" | "timestamptz" => "datetime",
        "json" | "jsonb" => "json",
        "uuid" => "uuid",
        "bytea" => "binary",
        array if array.starts_with('_') => "array",
        other => return other.to_string(),
    };
    semantic.to_string()
}

/// Whether [`cell_to_json`] can decode values of `ty`.
///
/// Types with no JSON mapping are read as text when the driver accepts them
/// as text (`citext`, `ltree`, ...).
pub(crate) fn is_decodable(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::CHAR
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::OID
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::NUMERIC
            | Type::JSON
            | Type::JSONB
            | Type::UUID
            | Type::DATE
            | Type::TIME
            | Type::TIMESTAMP
            | Type::TIMESTAMPTZ
            | Type::BYTEA
            | Type::BOOL_ARRAY
            | Type::INT2_ARRAY
            | Type::INT4_ARRAY
            | Type::INT8_ARRAY
            | Type::FLOAT4_ARRAY
            | Type::FLOAT8_ARRAY
            | Type::NUMERIC_ARRAY
            | Type::TEXT_ARRAY
            | Type::VARCHAR_ARRAY
    ) || <String as FromSql>::accepts(ty)
}

/// First column whose type cannot be decoded, as an error reason.
pub(crate) fn check_decodable<'a>(
    columns: impl IntoIterator<Item = (&'a str, &'a Type)>,
) -> Result<(), String> {
    match columns.into_iter().find(|(_, ty)| !is_decodable(ty)) {
        Some((name, ty)) => Err(format!(
            "column {} has type {}, which cannot be decoded",
            name,
            ty.name()
        )),
        None => Ok(()),
    }
}

/// Decode column `idx` of `row` into JSON.
///
/// Only called for columns accepted by [`is_decodable`].
pub(crate) fn cell_to_json(row: &Row, idx: usize) -> Result<Value, postgres::Error> {
    let ty = row.columns()[idx].type_().clone();

    let value = match ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::from),
        // "char" is a single byte.
        Type::CHAR => row
            .try_get::<_, Option<i8>>(idx)?
            .map(|c| Value::from(char::from(c as u8).to_string())),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(Value::from),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(Value::from),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::from),
        Type::OID => row.try_get::<_, Option<u32>>(idx)?.map(Value::from),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(Value::from),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::from),
        Type::NUMERIC => row
            .try_get::<_, Option<NumericText>>(idx)?
            .map(|n| Value::from(n.0)),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx)?,
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)?
            .map(|u| Value::from(u.to_string())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|d| Value::from(d.to_string())),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)?
            .map(|t| Value::from(t.to_string())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|t| Value::from(t.to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|t| Value::from(t.to_rfc3339())),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|b| Value::from(format!("\\x{}", hex::encode(b)))),
        Type::BOOL_ARRAY => row
            .try_get::<_, Option<Vec<Option<bool>>>>(idx)?
            .map(Value::from),
        Type::INT2_ARRAY => row
            .try_get::<_, Option<Vec<Option<i16>>>>(idx)?
            .map(Value::from),
        Type::FLOAT4_ARRAY => row
            .try_get::<_, Option<Vec<Option<f32>>>>(idx)?
            .map(Value::from),
        Type::FLOAT8_ARRAY => row
            .try_get::<_, Option<Vec<Option<f64>>>>(idx)?
            .map(Value::from),
        Type::NUMERIC_ARRAY => row
            .try_get::<_, Option<Vec<Option<NumericText>>>>(idx)?
            .map(|values| {
                Value::from(
                    values
                        .into_iter()
                        .map(|n| n.map(|n| n.0))
                        .collect::<Vec<_>>(),
                )
            }),
        Type::INT4_ARRAY => row
            .try_get::<_, Option<Vec<Option<i32>>>>(idx)?
            .map(Value::from),
        Type::INT8_ARRAY => row
            .try_get::<_, Option<Vec<Option<i64>>>>(idx)?
            .map(Value::from),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => row
            .try_get::<_, Option<Vec<Option<String>>>>(idx)?
            .map(Value::from),
        _ => row.try_get::<_, Option<String>>(idx)?.map(Value::from),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// `numeric` value rendered as decimal text.
struct NumericText(String);

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, DecodeError> {
        decode_numeric(raw).map(NumericText)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Decode the binary `numeric` wire format: a header of digit count, weight,
/// sign and display scale, followed by base-10000 digit groups.
fn decode_numeric(raw: &[u8]) -> Result<String, DecodeError> {
    if raw.len() < 8 {
        return Err("numeric value is too short".into());
    }
    let word = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);

    let ndigits = word(0) as usize;
    let weight = word(2) as i16 as i32;
    let sign = word(4);
    let dscale = word(6) as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if raw.len() < 8 + ndigits * 2 {
        return Err("numeric value is truncated".into());
    }

    let digits: Vec<u16> = (0..ndigits).map(|i| word(8 + i * 2)).collect();
    // Group `g` counts from the most significant digit group.
    let group = |g: i32| -> u16 {
        if g < 0 {
            0
        } else {
            digits.get(g as usize).copied().unwrap_or(0)
        }
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG {
        text.push('-');
    }

    if weight < 0 {
        text.push('0');
    } else {
        text.push_str(&group(0).to_string());
        for g in 1..=weight {
            text.push_str(&format!("{:04}", group(g)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut g = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(g)));
            g += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }

    Ok(text)
}
