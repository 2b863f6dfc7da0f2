use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::ClientError;
use crate::protocol::{Column, TypeSignature};

static TIME_WITH_ZONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*)([+-])(\d{2}):(\d{2})$").expect("time-with-zone pattern is valid")
});

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMP_WITH_OFFSET_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f %z";

/// A protocol cell converted to a native value.
///
/// Only the temporal and decimal families have dedicated representations;
/// every other cell keeps its JSON value under [`TypedValue::Json`].
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Decimal(Decimal),
    Date(NaiveDate),
    Time(NaiveTime),
    TimeWithOffset {
        time: NaiveTime,
        offset: FixedOffset,
    },
    Timestamp(NaiveDateTime),
    /// Zoned timestamps normalize to a fixed-offset datetime; named zones
    /// are resolved first, so the instant and local offset are preserved.
    TimestampWithTimeZone(DateTime<FixedOffset>),
    Array(Vec<TypedValue>),
    /// Identity mapping for types without a dedicated representation.
    Json(Value),
}

/// Convert one row using its column descriptors. Cells are paired with
/// columns positionally.
pub fn map_row(row: &[Value], columns: &[Column]) -> Result<Vec<TypedValue>, ClientError> {
    row.iter()
        .zip(columns)
        .map(|(value, column)| map_cell(value, &column.type_signature))
        .collect()
}

/// Convert one cell according to its type signature.
///
/// Dispatch follows the signature's `rawType`, with substring matching so
/// parametrized variants (`decimal(38,6)`, `timestamp(3)`) share their base
/// type's conversion. The with-time-zone forms are tested before the bare
/// `timestamp`/`time` substrings.
pub fn map_cell(value: &Value, signature: &TypeSignature) -> Result<TypedValue, ClientError> {
    if value.is_null() {
        return Ok(TypedValue::Null);
    }

    if let Value::Array(items) = value {
        let element = element_signature(signature)?;
        return items
            .iter()
            .map(|item| map_cell(item, &element))
            .collect::<Result<Vec<_>, _>>()
            .map(TypedValue::Array);
    }

    let raw_type = signature.raw_type.as_str();

    if raw_type.contains("decimal") {
        let text = scalar_text(value, raw_type)?;
        return Decimal::from_str(text)
            .map(TypedValue::Decimal)
            .map_err(|_| mapping_error(value, raw_type));
    }

    if raw_type == "date" {
        let text = scalar_text(value, raw_type)?;
        return NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map(TypedValue::Date)
            .map_err(|_| mapping_error(value, raw_type));
    }

    if raw_type == "timestamp with time zone" {
        return map_timestamp_with_time_zone(value, raw_type);
    }

    if raw_type.contains("timestamp") {
        let text = scalar_text(value, raw_type)?;
        return NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
            .map(TypedValue::Timestamp)
            .map_err(|_| mapping_error(value, raw_type));
    }

    if raw_type.contains("time with time zone") {
        return map_time_with_offset(value, raw_type);
    }

    if raw_type.contains("time") {
        let text = scalar_text(value, raw_type)?;
        return NaiveTime::parse_from_str(text, TIME_FORMAT)
            .map(TypedValue::Time)
            .map_err(|_| mapping_error(value, raw_type));
    }

    Ok(TypedValue::Json(value.clone()))
}

/// Zoned timestamps arrive as `<timestamp> <zone>` where the zone is either
/// a numeric offset or a named time zone.
fn map_timestamp_with_time_zone(
    value: &Value,
    raw_type: &str,
) -> Result<TypedValue, ClientError> {
    let text = scalar_text(value, raw_type)?;
    let (head, zone) = text
        .rsplit_once(' ')
        .ok_or_else(|| mapping_error(value, raw_type))?;

    if zone.starts_with('+') || zone.starts_with('-') {
        return DateTime::parse_from_str(text, TIMESTAMP_WITH_OFFSET_FORMAT)
            .map(TypedValue::TimestampWithTimeZone)
            .map_err(|_| mapping_error(value, raw_type));
    }

    let naive = NaiveDateTime::parse_from_str(head, TIMESTAMP_FORMAT)
        .map_err(|_| mapping_error(value, raw_type))?;
    let tz: chrono_tz::Tz = zone.parse().map_err(|_| mapping_error(value, raw_type))?;
    // Ambiguous or nonexistent local times (DST transitions) are mapping
    // failures rather than an arbitrary pick.
    tz.from_local_datetime(&naive)
        .single()
        .map(|datetime| TypedValue::TimestampWithTimeZone(datetime.fixed_offset()))
        .ok_or_else(|| mapping_error(value, raw_type))
}

fn map_time_with_offset(value: &Value, raw_type: &str) -> Result<TypedValue, ClientError> {
    let text = scalar_text(value, raw_type)?;
    let captures = TIME_WITH_ZONE
        .captures(text)
        .ok_or_else(|| mapping_error(value, raw_type))?;

    let time = NaiveTime::parse_from_str(&captures[1], TIME_FORMAT)
        .map_err(|_| mapping_error(value, raw_type))?;

    let hours: i32 = captures[3].parse().map_err(|_| mapping_error(value, raw_type))?;
    let minutes: i32 = captures[4].parse().map_err(|_| mapping_error(value, raw_type))?;
    let mut seconds = hours * 3600 + minutes * 60;
    if &captures[2] == "-" {
        seconds = -seconds;
    }
    let offset = FixedOffset::east_opt(seconds).ok_or_else(|| mapping_error(value, raw_type))?;

    Ok(TypedValue::TimeWithOffset { time, offset })
}

/// The element signature of a container type is its first type argument.
fn element_signature(signature: &TypeSignature) -> Result<TypeSignature, ClientError> {
    let argument = signature
        .arguments
        .first()
        .ok_or_else(|| ClientError::TypeMapping {
            value: "[...]".to_owned(),
            raw_type: signature.raw_type.clone(),
        })?;
    serde_json::from_value(argument.value.clone()).map_err(|_| ClientError::TypeMapping {
        value: argument.value.to_string(),
        raw_type: signature.raw_type.clone(),
    })
}

fn scalar_text<'a>(value: &'a Value, raw_type: &str) -> Result<&'a str, ClientError> {
    value.as_str().ok_or_else(|| mapping_error(value, raw_type))
}

fn mapping_error(value: &Value, raw_type: &str) -> ClientError {
    let value = match value.as_str() {
        Some(text) => text.to_owned(),
        None => value.to_string(),
    };
    ClientError::TypeMapping {
        value,
        raw_type: raw_type.to_owned(),
    }
}
