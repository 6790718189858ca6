// Placeholder substitution and due-date expressions for action configuration

use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use super::record::{parse_timestamp, Record};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("valid placeholder pattern"));

static RELATIVE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\+\s*(\d+)\s*([hdwm])$").expect("valid relative date pattern"));

/// Replace every `{{Field}}` with the field's textual value on `record`.
/// Unknown fields resolve to an empty string.
pub fn resolve_placeholders(template: &str, record: &Record) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures| {
            record.text(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Resolve placeholders in every string inside a JSON document.
pub fn resolve_json(value: &Value, record: &Record) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_placeholders(s, record)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_json(v, record)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_json(v, record)).collect()),
        other => other.clone(),
    }
}

/// `+3d`-style offset from `now`, or a literal timestamp. Anything else is no
/// due date at all.
pub fn parse_due_date(expression: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let expression = expression.trim();

    if let Some(caps) = RELATIVE_DATE.captures(expression) {
        let amount: i64 = caps[1].parse().ok()?;
        return match caps[2].to_ascii_lowercase().as_str() {
            "h" => now.checked_add_signed(Duration::try_hours(amount)?),
            "d" => now.checked_add_signed(Duration::try_days(amount)?),
            "w" => now.checked_add_signed(Duration::try_weeks(amount)?),
            "m" => now.checked_add_months(Months::new(u32::try_from(amount).ok()?)),
            _ => None,
        };
    }

    parse_timestamp(expression)
}
