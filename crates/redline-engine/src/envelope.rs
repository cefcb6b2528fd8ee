//! Typed node input
//!
//! Whatever flows along an edge is converted into an [`InputEnvelope`] once,
//! at the node boundary, and validated there. Processors then match on the
//! payload instead of probing loose JSON.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::layout::PARAGRAPH_SEPARATOR;
use crate::error::{PipelineError, Result};
use crate::modules::OutputShape;

/// Current envelope format version
pub const ENVELOPE_VERSION: u32 = 1;

static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n\s*").expect("valid regex"));

/// One paragraph of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paragraph {
    /// `p1`, `p2`, ...
    pub id: String,
    pub content: String,
    pub index: usize,
}

impl Paragraph {
    pub fn new(index: usize, content: impl Into<String>) -> Self {
        Self {
            id: format!("p{}", index + 1),
            content: content.into(),
            index,
        }
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

impl crate::batch::BatchItem for Paragraph {
    fn item_id(&self) -> Option<String> {
        Some(self.id.clone())
    }
}

/// Split text on blank lines into trimmed, non-empty paragraphs
pub fn split_paragraphs(text: &str) -> Vec<Paragraph> {
    let normalized = text.replace("\r\n", "\n");
    BLANK_LINE
        .split(&normalized)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(i, p)| Paragraph::new(i, p))
        .collect()
}

/// Flatten paragraphs into one document string
///
/// Paragraph-relative offsets become absolute offsets into this string by
/// adding the lengths of the preceding paragraphs plus one
/// [`PARAGRAPH_SEPARATOR`] each.
pub fn join_paragraphs(paragraphs: &[Paragraph]) -> String {
    paragraphs
        .iter()
        .map(|p| p.content.as_str())
        .collect::<Vec<_>>()
        .join(PARAGRAPH_SEPARATOR)
}

/// Input of a processing node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputEnvelope {
    pub version: u32,
    pub payload: Payload,
}

/// What a node receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Payload {
    /// Raw document from a document-input node
    Document {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Paragraph list from a splitter
    Paragraphs { paragraphs: Vec<Paragraph> },
    /// Findings of an upstream analysis module
    Findings { key: String, findings: Vec<Value> },
    /// Free text from an upstream text module
    Text { text: String },
}

impl InputEnvelope {
    pub fn new(payload: Payload) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            payload,
        }
    }

    pub fn document(text: impl Into<String>, name: Option<String>) -> Self {
        Self::new(Payload::Document {
            text: text.into(),
            name,
        })
    }

    pub fn paragraphs(paragraphs: Vec<Paragraph>) -> Self {
        Self::new(Payload::Paragraphs { paragraphs })
    }

    /// Name reported as `inputType` in progress and module output
    pub fn input_type(&self) -> &'static str {
        match self.payload {
            Payload::Document { .. } => "document",
            Payload::Paragraphs { .. } => "paragraphs",
            Payload::Findings { .. } => "findings",
            Payload::Text { .. } => "text",
        }
    }

    /// Check the envelope before a node consumes it
    pub fn validate(&self, node_id: &str) -> Result<()> {
        if self.version != ENVELOPE_VERSION {
            return Err(PipelineError::invalid_input(
                node_id,
                format!("unsupported envelope version {}", self.version),
            ));
        }

        match &self.payload {
            Payload::Document { text, .. } if text.trim().is_empty() => {
                Err(PipelineError::invalid_input(node_id, "document is empty"))
            }
            Payload::Paragraphs { paragraphs } => {
                if let Some(p) = paragraphs.iter().find(|p| p.id.is_empty()) {
                    return Err(PipelineError::invalid_input(
                        node_id,
                        format!("paragraph at index {} has no id", p.index),
                    ));
                }
                Ok(())
            }
            Payload::Findings { findings, .. } => {
                if findings.iter().any(|f| !f.is_object()) {
                    return Err(PipelineError::invalid_input(node_id, "findings must be objects"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Convert a module's output into the input of a downstream node
    pub fn from_module_output(node_id: &str, shape: &OutputShape, output: &Value) -> Result<Self> {
        if let Some(paragraphs) = output.get("paragraphs").filter(|p| p.is_array()) {
            let paragraphs: Vec<Paragraph> = serde_json::from_value(paragraphs.clone())?;
            return Ok(Self::paragraphs(paragraphs));
        }

        match shape {
            OutputShape::Findings { key } => {
                let findings = output
                    .get(key)
                    .and_then(Value::as_array)
                    .cloned()
                    .ok_or_else(|| PipelineError::invalid_input(node_id, format!("upstream output has no '{}' array", key)))?;
                Ok(Self::new(Payload::Findings {
                    key: key.clone(),
                    findings,
                }))
            }
            OutputShape::Text => {
                let text = output
                    .get("text")
                    .and_then(Value::as_str)
                    .or_else(|| output.as_str())
                    .ok_or_else(|| PipelineError::invalid_input(node_id, "upstream output has no text"))?;
                Ok(Self::new(Payload::Text { text: text.to_string() }))
            }
            OutputShape::List | OutputShape::Object => Ok(Self::new(Payload::Text {
                text: match output {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_paragraphs() {
        let text = "First paragraph.\r\n\r\nSecond one.\n\n\n   \nThird.\n";
        let paragraphs = split_paragraphs(text);

        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[0].id, "p1");
        assert_eq!(paragraphs[1].content, "Second one.");
        assert_eq!(paragraphs[2].index, 2);
        assert_eq!(paragraphs[2].content, "Third.");
    }

    #[test]
    fn test_join_uses_separator() {
        let paragraphs = vec![Paragraph::new(0, "Foo bar."), Paragraph::new(1, "Baz qux.")];
        assert_eq!(join_paragraphs(&paragraphs), "Foo bar.\n\nBaz qux.");
    }

    #[test]
    fn test_envelope_serde_is_tagged() {
        let envelope = InputEnvelope::document("Hello", Some("a.txt".into()));
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["payload"]["kind"], "document");
        assert_eq!(json["version"], 1);

        let back: InputEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_validate_rejects_empty_document_and_bad_version() {
        assert!(InputEnvelope::document("   ", None).validate("n").is_err());

        let mut envelope = InputEnvelope::document("text", None);
        envelope.version = 7;
        assert!(matches!(
            envelope.validate("n"),
            Err(PipelineError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_from_module_output() {
        let splitter = json!({"paragraphs": [{"id": "p1", "content": "One.", "index": 0}], "totalParagraphs": 1});
        let envelope = InputEnvelope::from_module_output("n", &OutputShape::Object, &splitter).unwrap();
        assert_eq!(envelope.input_type(), "paragraphs");

        let citations = json!({"citations": [{"id": "c1"}]});
        let envelope = InputEnvelope::from_module_output("n", &OutputShape::findings("citations"), &citations).unwrap();
        match envelope.payload {
            Payload::Findings { key, findings } => {
                assert_eq!(key, "citations");
                assert_eq!(findings.len(), 1);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        let missing = InputEnvelope::from_module_output("n", &OutputShape::findings("issues"), &json!({}));
        assert!(missing.is_err());
    }
}
