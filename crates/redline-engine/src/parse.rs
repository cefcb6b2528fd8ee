//! Lenient parsing of transform responses
//!
//! Language models wrap JSON in prose and code fences, or skip JSON
//! altogether. [`parse_response`] tries progressively looser extractions and
//! degrades to plain text segmentation as a last resort, so a malformed
//! response never fails the item.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::modules::OutputShape;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("valid regex"));
static OBJECT_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));
static ARRAY_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").expect("valid regex"));
static SEGMENT_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").expect("valid regex"));

/// Parsed and shape-normalized response
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub value: Value,
    /// True when no JSON could be recovered and the text was segmented
    pub degraded: bool,
}

/// Parse `raw` into a value of the given shape
pub fn parse_response(raw: &str, shape: &OutputShape) -> ParsedResponse {
    match extract_json(raw) {
        Some(value) => ParsedResponse {
            value: normalize(value, raw, shape),
            degraded: false,
        },
        None if matches!(shape, OutputShape::Text) => ParsedResponse {
            value: json!({ "text": raw.trim() }),
            degraded: false,
        },
        None => {
            log::warn!("Response is not JSON, degrading to text ({} bytes)", raw.len());
            ParsedResponse {
                value: degrade(raw, shape),
                degraded: true,
            }
        }
    }
}

/// Find the first JSON value in `raw`
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(value) = FENCED_BLOCK
        .captures_iter(trimmed)
        .filter_map(|c| c.get(1))
        .find_map(|m| serde_json::from_str::<Value>(m.as_str().trim()).ok())
    {
        return Some(value);
    }

    let object = OBJECT_SPAN.find(trimmed);
    let array = ARRAY_SPAN.find(trimmed);
    let mut spans: Vec<_> = [object, array].into_iter().flatten().collect();
    spans.sort_by_key(|m| m.start());

    spans
        .into_iter()
        .find_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
}

fn normalize(value: Value, raw: &str, shape: &OutputShape) -> Value {
    match shape {
        OutputShape::Findings { key } => match value {
            Value::Array(items) => json!({ key.as_str(): items }),
            Value::Object(map) if map.get(key).is_some_and(Value::is_array) => Value::Object(map),
            Value::Object(mut map) => {
                if let Some(Value::Array(items)) = map.remove("findings") {
                    map.insert(key.clone(), Value::Array(items));
                    Value::Object(map)
                } else if map.is_empty() {
                    json!({ key.as_str(): [] })
                } else {
                    json!({ key.as_str(): [Value::Object(map)] })
                }
            }
            _ => degrade(raw, shape),
        },
        OutputShape::Text => match value {
            Value::String(text) => json!({ "text": text }),
            Value::Object(map) => {
                let text = ["text", "summary", "response"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str))
                    .map(str::to_string)
                    .unwrap_or_else(|| raw.trim().to_string());
                json!({ "text": text })
            }
            _ => json!({ "text": raw.trim() }),
        },
        OutputShape::List => match value {
            Value::Array(_) => value,
            other => Value::Array(vec![other]),
        },
        OutputShape::Object => match value {
            Value::Object(_) => value,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Value::Object(map)
            }
        },
    }
}

fn segments(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let pieces: Vec<&str> = if SEGMENT_BREAK.is_match(trimmed) {
        SEGMENT_BREAK.split(trimmed).collect()
    } else {
        trimmed.lines().collect()
    };
    pieces
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn degrade(raw: &str, shape: &OutputShape) -> Value {
    let parts = segments(raw);
    match shape {
        OutputShape::Findings { key } => {
            let findings: Vec<Value> = parts
                .into_iter()
                .enumerate()
                .map(|(i, text)| json!({ "id": format!("d{}", i + 1), "text": text, "degraded": true }))
                .collect();
            json!({ key.as_str(): findings, "degraded": true })
        }
        OutputShape::Text => json!({ "text": raw.trim() }),
        OutputShape::List => Value::Array(parts.into_iter().map(Value::String).collect()),
        OutputShape::Object => json!({ "text": raw.trim(), "degraded": true }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn findings() -> OutputShape {
        OutputShape::findings("analysis")
    }

    #[test]
    fn test_direct_json() {
        let parsed = parse_response(r#"{"analysis": [{"id": "a1"}]}"#, &findings());
        assert!(!parsed.degraded);
        assert_eq!(parsed.value["analysis"][0]["id"], "a1");
    }

    #[test]
    fn test_fenced_json_with_prose() {
        let raw = "Here is my review:\n```json\n{\"analysis\": [{\"id\": \"a1\"}, {\"id\": \"a2\"}]}\n```\nHope it helps.";
        let parsed = parse_response(raw, &findings());
        assert!(!parsed.degraded);
        assert_eq!(parsed.value["analysis"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_embedded_object_span() {
        let raw = "Sure! {\"analysis\": []} That is all.";
        let parsed = parse_response(raw, &findings());
        assert!(!parsed.degraded);
        assert_eq!(parsed.value, json!({"analysis": []}));
    }

    #[test]
    fn test_bare_array_is_wrapped() {
        let parsed = parse_response(r#"[{"id": "x"}]"#, &findings());
        assert_eq!(parsed.value, json!({"analysis": [{"id": "x"}]}));
    }

    #[test]
    fn test_single_object_becomes_one_finding() {
        let parsed = parse_response(r#"{"id": "v1", "valid": true}"#, &OutputShape::findings("verifications"));
        assert_eq!(parsed.value["verifications"][0]["valid"], true);
    }

    #[test]
    fn test_degrades_to_segments() {
        let raw = "The first sentence has a typo.\n\nThe second is fine.";
        let parsed = parse_response(raw, &findings());
        assert!(parsed.degraded);

        let items = parsed.value["analysis"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["degraded"], true);
        assert_eq!(items[1]["text"], "The second is fine.");
    }

    #[test]
    fn test_text_shape_accepts_plain_text() {
        let parsed = parse_response("  A short summary.  ", &OutputShape::Text);
        assert!(!parsed.degraded);
        assert_eq!(parsed.value, json!({"text": "A short summary."}));

        let parsed = parse_response(r#"{"summary": "From JSON."}"#, &OutputShape::Text);
        assert_eq!(parsed.value, json!({"text": "From JSON."}));
    }
}
