//! Response parsing: turn a model's answer into fields.
//!
//! Models are asked for bare JSON but still wrap it in code fences, add a
//! sentence before it, answer with an array, or ignore the format and write
//! `Key: value` lines. Each of those is handled here by a small rule:
//!
//! 1. Strip invisible characters and outer code fences
//! 2. Parse JSON; failing that, parse the outermost `{ … }` span
//! 3. Accept an object, or the first object inside an array
//! 4. Unwrap the `{fields, confidence, document_type}` envelope when present
//! 5. Otherwise scan `key: value` lines
//! 6. Otherwise keep the raw text
//!
//! The result is a tagged [`Extraction`]; nothing downstream has to guess at
//! the shape of a response.

use crate::output::ExtractionMethod;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A parsed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Structured {
        fields: Map<String, Value>,
        confidence: BTreeMap<String, f32>,
        document_type: Option<String>,
        method: ExtractionMethod,
    },
    RawText(String),
}

/// Parse a model response. Never fails: unparseable text comes back as
/// [`Extraction::RawText`] (possibly empty).
pub fn parse_response(text: &str) -> Extraction {
    let cleaned = strip_code_fences(&remove_invisible_chars(text));
    let cleaned = cleaned.trim();

    if let Some(obj) = parse_json_object(cleaned) {
        return from_object(obj);
    }

    let fields = scan_key_values(cleaned);
    if !fields.is_empty() {
        return Extraction::Structured {
            fields,
            confidence: BTreeMap::new(),
            document_type: None,
            method: ExtractionMethod::KeyValueScan,
        };
    }

    Extraction::RawText(cleaned.to_string())
}

// ── Rule 1: Invisible characters and fences ──────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\s*\n(.*?)\n?```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    match RE_OUTER_FENCES.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn remove_invisible_chars(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\u{FEFF}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{00AD}'))
        .collect()
}

// ── Rules 2–3: JSON object ───────────────────────────────────────────────────

/// The JSON object in `input`, tolerating surrounding prose. An array
/// yields its first object.
pub fn parse_json_object(input: &str) -> Option<Map<String, Value>> {
    let value = serde_json::from_str::<Value>(input).ok().or_else(|| {
        // Prose around the JSON: take the outermost braces.
        let start = input.find('{')?;
        let end = input.rfind('}')?;
        (start < end)
            .then(|| serde_json::from_str::<Value>(&input[start..=end]).ok())
            .flatten()
    })?;

    match value {
        Value::Object(obj) => Some(obj),
        Value::Array(items) => items.into_iter().find_map(|v| match v {
            Value::Object(obj) => Some(obj),
            _ => None,
        }),
        _ => None,
    }
}

// ── Rule 4: Envelope ─────────────────────────────────────────────────────────

fn from_object(mut obj: Map<String, Value>) -> Extraction {
    let document_type = match obj.shift_remove("document_type") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    };
    let mut confidence = match obj.shift_remove("confidence") {
        Some(Value::Object(c)) => confidence_map(&c),
        _ => BTreeMap::new(),
    };

    let raw_fields = match obj.shift_remove("fields") {
        Some(Value::Object(f)) => f,
        Some(other) => {
            // A document field that happens to be called "fields".
            obj.insert("fields".to_string(), other);
            obj
        }
        None => obj,
    };

    // Accept per-field `{"value": …, "confidence": …}` pairs too.
    let mut fields = Map::new();
    for (key, value) in raw_fields {
        match value {
            Value::Object(mut inner)
                if inner.len() == 2 && inner.contains_key("value") && inner.contains_key("confidence") =>
            {
                if let Some(score) = inner.get("confidence").and_then(Value::as_f64) {
                    confidence.insert(key.clone(), clamp_score(score));
                }
                fields.insert(key, inner.shift_remove("value").unwrap_or(Value::Null));
            }
            other => {
                fields.insert(key, other);
            }
        }
    }

    Extraction::Structured {
        fields,
        confidence,
        document_type,
        method: ExtractionMethod::Model,
    }
}

fn confidence_map(obj: &Map<String, Value>) -> BTreeMap<String, f32> {
    obj.iter()
        .filter_map(|(k, v)| {
            let score = match v {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }?;
            Some((k.clone(), clamp_score(score)))
        })
        .collect()
}

fn clamp_score(score: f64) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, 1.0) as f32
    } else {
        0.0
    }
}

// ── Rule 5: key: value scan ──────────────────────────────────────────────────

static RE_LIST_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[-*•]\s+|\d+[.)]\s+)").unwrap());

/// Longest key accepted by [`scan_key_values`]; longer "keys" are sentences.
const MAX_KEY_LEN: usize = 64;

/// Recover `key: value` pairs from free text, one per line.
///
/// The first colon splits key from value. Leading list markers and
/// emphasis (`**`) are dropped from keys. JSON punctuation left over from a
/// truncated answer (quotes, braces, trailing commas) is trimmed from both
/// sides, so `"total": "12",` reads as `total` → `12`. Lines whose key is
/// empty, has no alphanumeric character, or is longer than 64 characters
/// are skipped, as are lines whose value is only punctuation; the first
/// occurrence of a key wins.
pub fn scan_key_values(text: &str) -> Map<String, Value> {
    let mut fields = Map::new();
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = RE_LIST_MARKER.replace(key.trim(), "");
        let key = key.trim_matches(|c: char| matches!(c, '*' | '_' | '"' | '{' | ',') || c.is_whitespace());
        let value = value
            .trim_matches(|c: char| matches!(c, '"' | '{' | '}' | ',') || c.is_whitespace())
            .trim_matches('*')
            .trim();

        if key.is_empty()
            || key.len() > MAX_KEY_LEN
            || !key.chars().any(char::is_alphanumeric)
            || value.is_empty()
        {
            continue;
        }
        if !fields.contains_key(key) {
            fields.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn structured(e: Extraction) -> (Map<String, Value>, BTreeMap<String, f32>, Option<String>, ExtractionMethod) {
        match e {
            Extraction::Structured {
                fields,
                confidence,
                document_type,
                method,
            } => (fields, confidence, document_type, method),
            Extraction::RawText(t) => panic!("expected structured, got raw text {t:?}"),
        }
    }

    #[test]
    fn truncated_json_is_scanned_without_punctuation() {
        let text = "{\"fields\": {\n \"name\": \"ACME\",\n \"total\": \"12";
        let (fields, _, _, method) = structured(parse_response(text));
        assert_eq!(method, ExtractionMethod::KeyValueScan);
        assert_eq!(fields.len(), 2, "{fields:?}");
        assert_eq!(fields["name"], "ACME");
        assert_eq!(fields["total"], "12");
        assert!(fields.get("fields").is_none());
    }

    #[test]
    fn plain_json_object() {
        let (fields, conf, _, method) = structured(parse_response(r#"{"name": "ACME", "total": 12.5}"#));
        assert_eq!(fields["name"], "ACME");
        assert_eq!(fields["total"], json!(12.5));
        assert!(conf.is_empty());
        assert_eq!(method, ExtractionMethod::Model);
    }

    #[test]
    fn fenced_envelope_with_confidence() {
        let text = "```json\n{\"document_type\": \"invoice\", \"fields\": {\"total\": \"10\"}, \"confidence\": {\"total\": 0.9}}\n```";
        let (fields, conf, doc_type, _) = structured(parse_response(text));
        assert_eq!(fields["total"], "10");
        assert!((conf["total"] - 0.9).abs() < 1e-6);
        assert_eq!(doc_type.as_deref(), Some("invoice"));
        assert!(!fields.contains_key("confidence"));
    }

    #[test]
    fn json_surrounded_by_prose() {
        let text = "Here is the data you asked for:\n{\"a\": 1}\nLet me know if you need more.";
        let (fields, ..) = structured(parse_response(text));
        assert_eq!(fields["a"], 1);
    }

    #[test]
    fn array_uses_first_object() {
        let (fields, ..) = structured(parse_response(r#"[1, {"x": "first"}, {"x": "second"}]"#));
        assert_eq!(fields["x"], "first");
    }

    #[test]
    fn per_field_value_confidence_pairs_are_unwrapped() {
        let text = r#"{"total": {"value": "99.00", "confidence": 1.7}, "vendor": "ACME"}"#;
        let (fields, conf, ..) = structured(parse_response(text));
        assert_eq!(fields["total"], "99.00");
        assert_eq!(conf["total"], 1.0);
        assert_eq!(fields["vendor"], "ACME");
    }

    #[test]
    fn confidence_scores_are_clamped() {
        let text = r#"{"fields": {"a": "x", "b": "y"}, "confidence": {"a": -3, "b": "0.25"}}"#;
        let (_, conf, ..) = structured(parse_response(text));
        assert_eq!(conf["a"], 0.0);
        assert_eq!(conf["b"], 0.25);
    }

    #[test]
    fn prose_falls_back_to_key_value_scan() {
        let text = "Invoice Number: INV-001\n- **Date**: 2024-01-05\nThe total is shown below.\nTotal: $1,200.00";
        let (fields, _, _, method) = structured(parse_response(text));
        assert_eq!(method, ExtractionMethod::KeyValueScan);
        assert_eq!(fields["Invoice Number"], "INV-001");
        assert_eq!(fields["Date"], "2024-01-05");
        assert_eq!(fields["Total"], "$1,200.00");
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn key_value_scan_keeps_first_occurrence_and_splits_on_first_colon() {
        let fields = scan_key_values("Time: 10:30\nTime: 11:00\n: orphan\n---: x");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["Time"], "10:30");
    }

    #[test]
    fn unstructured_text_is_raw() {
        assert_eq!(
            parse_response("The page is blank apart from a logo."),
            Extraction::RawText("The page is blank apart from a logo.".to_string())
        );
    }

    #[test]
    fn empty_response_is_empty_raw_text() {
        assert_eq!(parse_response("  \u{FEFF}\n"), Extraction::RawText(String::new()));
    }
}
