//! Turning raw request strings (and text read back from the store) into
//! typed `Value`s according to a column's kind.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::data_types::{ColumnKind, Value};

enum Layout {
    DateTime(&'static str),
    Date(&'static str),
}

// Order matters: the first layout that parses the whole input wins.
const ACCEPTED_LAYOUTS: &[Layout] = &[
    Layout::DateTime("%Y-%m-%d %H:%M:%S"),
    Layout::DateTime("%Y-%m-%d %H:%M:%S%.f"),
    Layout::DateTime("%Y-%m-%dT%H:%M:%S"),
    Layout::DateTime("%Y-%m-%dT%H:%M:%S%.f"),
    Layout::DateTime("%Y-%m-%d %H:%M"),
    Layout::DateTime("%Y-%m-%dT%H:%M"),
    Layout::Date("%Y-%m-%d"),
    Layout::DateTime("%Y/%m/%d %H:%M:%S"),
    Layout::DateTime("%Y/%m/%d %H:%M"),
    Layout::Date("%Y/%m/%d"),
    Layout::DateTime("%d.%m.%Y %H:%M:%S"),
    Layout::DateTime("%d.%m.%Y %H:%M"),
    Layout::Date("%d.%m.%Y"),
    Layout::DateTime("%d/%m/%Y %H:%M:%S"),
    Layout::DateTime("%d/%m/%Y %H:%M"),
    Layout::Date("%d/%m/%Y"),
    Layout::DateTime("%m/%d/%Y %I:%M:%S %p"),
    Layout::DateTime("%m/%d/%Y %I:%M %p"),
    Layout::DateTime("%Y-%m-%d %I:%M:%S %p"),
    Layout::DateTime("%Y-%m-%d %I:%M %p"),
    Layout::DateTime("%Y%m%d%H%M%S"),
    Layout::DateTime("%Y%m%d%H%M"),
    Layout::Date("%Y%m%d"),
];

// Only used when reading values back: offsets as printed by timestamptz columns
const OFFSET_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"];

/// Parse a user-supplied date/time in any of the accepted layouts.
/// Date-only inputs are taken at midnight.
pub fn parse_date_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    ACCEPTED_LAYOUTS.iter().find_map(|layout| match layout {
        Layout::DateTime(fmt) => NaiveDateTime::parse_from_str(raw, fmt).ok(),
        Layout::Date(fmt) => NaiveDate::parse_from_str(raw, fmt)
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN)),
    })
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Coerce a raw request value to the column kind. `None` means the value
/// doesn't fit the kind; text always fits.
pub fn coerce_value(raw: &str, kind: ColumnKind) -> Option<Value> {
    match kind {
        ColumnKind::Integer => raw.trim().parse::<i64>().ok().map(Value::Integer),
        ColumnKind::Floating => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Value::Float),
        ColumnKind::Boolean => parse_bool(raw).map(Value::Boolean),
        ColumnKind::DateTime => parse_date_time(raw).map(Value::DateTime),
        ColumnKind::Text => Some(Value::Text(raw.to_string())),
    }
}

/// Decode a value the store rendered as text. Never fails: anything that
/// doesn't fit the kind is kept as text.
pub fn decode_stored(raw: Option<String>, kind: ColumnKind) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };

    let decoded = match kind {
        ColumnKind::Text => None,
        ColumnKind::DateTime => parse_date_time(&raw)
            .or_else(|| {
                OFFSET_LAYOUTS.iter().find_map(|fmt| {
                    DateTime::parse_from_str(&raw, fmt)
                        .ok()
                        .map(|dt| dt.naive_utc())
                })
            })
            .map(Value::DateTime),
        _ => coerce_value(&raw, kind),
    };

    decoded.unwrap_or(Value::Text(raw))
}
