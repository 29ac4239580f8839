//! Helpers for reading heterogeneous note content.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use reviewcrawl_shared::RawNote;

/// `"8"`, `"8: Accept"`, `"-1.5 : weak"`; the label may span lines.
static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*([+-]?\d+(?:\.\d+)?)\s*(?::.*)?$").expect("valid regex")
});

/// Content value for `key`, matching the key case-insensitively.
pub(crate) fn field_ci<'a>(note: &'a RawNote, key: &str) -> Option<&'a Value> {
    if let Some(value) = note.field(key) {
        return Some(value);
    }
    note.fields()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

/// First of `keys` that is present with a non-empty value.
pub(crate) fn first_present<'a>(
    note: &'a RawNote,
    keys: &[String],
    min_chars: usize,
) -> Option<(&'a str, &'a Value)> {
    keys.iter().find_map(|key| {
        let value = field_ci(note, key)?;
        if !is_non_empty(value, min_chars) {
            return None;
        }
        let stored = note
            .content
            .keys()
            .find(|k| k.eq_ignore_ascii_case(key))
            .map(String::as_str)?;
        Some((stored, value))
    })
}

/// Whether a value carries content.
pub(crate) fn is_non_empty(value: &Value, min_chars: usize) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(_) => true,
        Value::String(s) => s.trim().chars().count() >= min_chars.max(1),
        Value::Array(items) => items.iter().any(|v| is_non_empty(v, min_chars)),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Text form of a scalar value: strings verbatim, numbers printed.
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric score and its label.
///
/// Numbers label themselves; strings must start with a number optionally
/// followed by `: label`, and keep their original spelling as the label.
pub(crate) fn parse_score(value: &Value) -> Option<(f64, String)> {
    match value {
        Value::Number(n) => n.as_f64().map(|v| (v, n.to_string())),
        Value::String(s) => {
            let caps = SCORE_RE.captures(s)?;
            let number = caps.get(1)?.as_str().parse::<f64>().ok()?;
            Some((number, s.clone()))
        }
        _ => None,
    }
}

/// A list of names from either a JSON array or a comma-separated string.
///
/// Entries are trimmed; empties and repeats are dropped; order is kept.
pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    let raw: Vec<String> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(value_text).collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    };

    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for item in raw {
        let item = item.trim();
        if !item.is_empty() && !out.iter().any(|seen| seen == item) {
            out.push(item.to_string());
        }
    }
    out
}
