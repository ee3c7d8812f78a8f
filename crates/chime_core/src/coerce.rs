//! Conversions from loosely-typed request values into the strict internal
//! types. None of these fail: bad input falls back to a safe default and
//! leaves a diagnostic behind.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::diagnostics::Diagnostics;

pub type NotificationId = i64;

pub const DEFAULT_ID: NotificationId = 0;

/// Canonical field name followed by every key that may carry it, in lookup order.
pub const ALIASES: &[(&str, &[&str])] = &[
    ("at", &["at", "firstAt", "date"]),
    ("text", &["text", "message"]),
    ("data", &["data", "json"]),
    ("autoClear", &["autoClear", "autoCancel"]),
];

pub fn aliases_for(canonical: &str) -> &'static [&'static str] {
    ALIASES
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, keys)| *keys)
        .unwrap_or(&[])
}

/// Value of the first key that is present on `obj`, even when that value is null.
pub fn first_defined<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key))
}

/// Like [`first_defined`] but skips keys whose value is null.
pub fn first_non_null<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !value.is_null())
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().filter(|parsed| parsed.is_finite())
        }
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    if let Some(int) = value.as_i64() {
        return Some(int);
    }
    as_number(value).map(|number| number.trunc() as i64)
}

pub fn to_id(value: &Value, diags: &mut Diagnostics) -> NotificationId {
    if value.is_null() {
        return DEFAULT_ID;
    }
    match as_integer(value) {
        Some(id) => id,
        None => {
            diags.warn("id", format!("id is not a number: {value}"));
            DEFAULT_ID
        }
    }
}

/// Accepts a single id or an array of ids.
pub fn to_ids(value: &Value, diags: &mut Diagnostics) -> Vec<NotificationId> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(|item| to_id(item, diags)).collect(),
        other => vec![to_id(other, diags)],
    }
}

pub fn to_badge(value: &Value, diags: &mut Diagnostics) -> Option<i64> {
    if value.is_null() {
        return None;
    }
    let badge = as_integer(value);
    if badge.is_none() {
        diags.warn("badge", format!("badge number is not a number: {value}"));
    }
    badge
}

/// Date strings are converted through their millisecond timestamp; numbers
/// are taken to be epoch seconds already.
pub fn to_epoch_seconds(value: &Value, diags: &mut Diagnostics) -> Option<i64> {
    match value {
        Value::Null => None,
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|secs| secs.round() as i64)),
        Value::String(raw) => {
            if let Some(secs) = as_number(value) {
                return Some(secs.round() as i64);
            }
            match parse_date(raw) {
                Some(date) => Some(date_to_epoch_seconds(date)),
                None => {
                    diags.warn("at", format!("unrecognised date `{raw}`"));
                    None
                }
            }
        }
        other => {
            diags.warn("at", format!("unrecognised date {other}"));
            None
        }
    }
}

pub fn date_to_epoch_seconds(date: DateTime<Utc>) -> i64 {
    (date.timestamp_millis() + 500).div_euclid(1000)
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(date.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Objects and arrays are serialized; strings pass through untouched.
pub fn to_json(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(raw) => Some(raw.clone()),
        other => Some(other.to_string()),
    }
}

pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

pub fn to_bool(value: Option<&Value>, default: bool) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.0).unwrap_or(default),
        Some(Value::String(raw)) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        },
        _ => default,
    }
}

pub fn to_f64(value: &Value) -> Option<f64> {
    as_number(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn id_coercion_truncates_and_falls_back() {
        let mut diags = Diagnostics::new();
        assert_eq!(to_id(&json!(42), &mut diags), 42);
        assert_eq!(to_id(&json!(7.9), &mut diags), 7);
        assert_eq!(to_id(&json!(" 12 "), &mut diags), 12);
        assert!(diags.is_empty());

        assert_eq!(to_id(&json!("abc"), &mut diags), DEFAULT_ID);
        assert_eq!(to_id(&json!({ "id": 1 }), &mut diags), DEFAULT_ID);
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn ids_accept_scalar_or_list() {
        let mut diags = Diagnostics::new();
        assert_eq!(to_ids(&json!(3), &mut diags), vec![3]);
        assert_eq!(to_ids(&json!(["1", 2, 3.5]), &mut diags), vec![1, 2, 3]);
        assert!(to_ids(&Value::Null, &mut diags).is_empty());
    }

    #[test]
    fn badge_rejects_garbage() {
        let mut diags = Diagnostics::new();
        assert_eq!(to_badge(&json!("5"), &mut diags), Some(5));
        assert_eq!(to_badge(&json!("five"), &mut diags), None);
        assert_eq!(diags.for_field("badge").count(), 1);
    }

    #[test]
    fn dates_round_to_nearest_second() {
        let mut diags = Diagnostics::new();
        let at = to_epoch_seconds(&json!("2025-11-07T09:00:00.600Z"), &mut diags);
        let expected = Utc.with_ymd_and_hms(2025, 11, 7, 9, 0, 1).unwrap().timestamp();
        assert_eq!(at, Some(expected));

        let date = Utc.timestamp_millis_opt(1_499_999).unwrap();
        assert_eq!(date_to_epoch_seconds(date), 1_500);
    }

    #[test]
    fn numeric_dates_are_already_seconds() {
        let mut diags = Diagnostics::new();
        assert_eq!(to_epoch_seconds(&json!(1_700_000_000), &mut diags), Some(1_700_000_000));
        assert_eq!(to_epoch_seconds(&json!("1700000000"), &mut diags), Some(1_700_000_000));
        assert_eq!(to_epoch_seconds(&json!("next tuesday"), &mut diags), None);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn json_serializes_objects_only() {
        assert_eq!(to_json(&json!({ "a": 1 })).as_deref(), Some(r#"{"a":1}"#));
        assert_eq!(to_json(&json!("raw")).as_deref(), Some("raw"));
        assert_eq!(to_json(&Value::Null), None);
    }

    #[test]
    fn first_defined_respects_presence() {
        let obj = json!({ "firstAt": null, "date": 5 });
        let map = obj.as_object().unwrap();
        assert_eq!(first_defined(map, &["at", "firstAt", "date"]), Some(&Value::Null));
        assert_eq!(first_non_null(map, aliases_for("at")), Some(&json!(5)));
        assert_eq!(first_defined(map, &["missing"]), None);
    }
}
