//! Absolute positions for paragraph-relative citations
//!
//! The citation finder runs per paragraph and reports offsets relative to
//! the paragraph, which models get wrong often enough that they are never
//! used. Each citation's literal text is searched for in its paragraph and
//! the hit is shifted by the paragraph's start in the joined document.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::layout::PARAGRAPH_SEPARATOR;
use crate::envelope::Paragraph;

/// A citation as reported by the finder, offsets untrusted
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFinding {
    pub id: String,
    #[serde(rename = "type")]
    pub citation_type: String,
    pub original_text: String,
    /// Reported offset exactly as the model wrote it; ignored by the mapper
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_pos: Option<Value>,
    pub paragraph_id: String,
    pub is_complete: bool,
    pub needs_verification: bool,
}

impl CandidateFinding {
    pub fn new(paragraph_id: impl Into<String>, original_text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            citation_type: String::new(),
            original_text: original_text.into(),
            start_pos: None,
            paragraph_id: paragraph_id.into(),
            is_complete: true,
            needs_verification: false,
        }
    }

    /// Read a candidate from a finding object
    ///
    /// Only the shape of the object matters: fields of an unexpected type
    /// fall back to their defaults, so a citation is never lost because of
    /// how the model typed an offset or a flag. Non-objects yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let text_of = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| obj.get(*k).and_then(lenient_string))
                .unwrap_or_default()
        };
        let flag_of = |key: &str, default: bool| obj.get(key).and_then(lenient_bool).unwrap_or(default);

        Some(Self {
            id: text_of(&["id"]),
            citation_type: text_of(&["type", "citationType"]),
            original_text: text_of(&["originalText", "text"]),
            start_pos: obj.get("startPos").filter(|v| !v.is_null()).cloned(),
            paragraph_id: text_of(&["paragraphId"]),
            is_complete: flag_of("isComplete", true),
            needs_verification: flag_of("needsVerification", false),
        })
    }
}

fn lenient_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

/// A citation with verified absolute positions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub id: String,
    #[serde(rename = "type")]
    pub citation_type: String,
    pub original_text: String,
    /// Byte offset into the joined document
    pub start_pos: usize,
    pub end_pos: usize,
    pub paragraph_id: String,
    pub is_complete: bool,
    pub needs_verification: bool,
}

/// Maps candidates onto the document built by `join_paragraphs`
pub struct CitationPositionMapper<'a> {
    paragraphs: &'a [Paragraph],
    separator_width: usize,
}

impl<'a> CitationPositionMapper<'a> {
    pub fn new(paragraphs: &'a [Paragraph]) -> Self {
        Self {
            paragraphs,
            separator_width: PARAGRAPH_SEPARATOR.len(),
        }
    }

    /// Map every candidate that can be located
    ///
    /// Output follows paragraph order, then candidate order within a
    /// paragraph. Repeated text in one paragraph resolves to successive
    /// occurrences. Candidates whose text is not found are dropped.
    pub fn map(&self, candidates: &[CandidateFinding]) -> Vec<Citation> {
        let mut by_paragraph: HashMap<&str, Vec<&CandidateFinding>> = HashMap::new();
        for candidate in candidates {
            by_paragraph
                .entry(candidate.paragraph_id.as_str())
                .or_default()
                .push(candidate);
        }

        let mut citations = Vec::new();
        let mut global_position = 0;

        for paragraph in self.paragraphs {
            let content = paragraph.content.as_str();
            let mut search_from: HashMap<&str, usize> = HashMap::new();

            for candidate in by_paragraph.remove(paragraph.id.as_str()).unwrap_or_default() {
                let text = candidate.original_text.as_str();
                if text.is_empty() {
                    log::warn!("Citation '{}' has no text, dropping", candidate.id);
                    continue;
                }

                let from = search_from.get(text).copied().unwrap_or(0);
                let found = content
                    .get(from..)
                    .and_then(|rest| rest.find(text))
                    .map(|k| from + k)
                    .or_else(|| content.find(text));

                let Some(k) = found else {
                    log::warn!(
                        "Citation '{}' not found in paragraph '{}', dropping",
                        text,
                        paragraph.id
                    );
                    continue;
                };

                search_from.insert(text, k + text.len());
                let start_pos = global_position + k;
                citations.push(Citation {
                    id: candidate.id.clone(),
                    citation_type: candidate.citation_type.clone(),
                    original_text: candidate.original_text.clone(),
                    start_pos,
                    end_pos: start_pos + text.len(),
                    paragraph_id: paragraph.id.clone(),
                    is_complete: candidate.is_complete,
                    needs_verification: candidate.needs_verification,
                });
            }

            global_position += content.len() + self.separator_width;
        }

        for (paragraph_id, orphans) in by_paragraph {
            log::warn!(
                "{} citation(s) reference unknown paragraph '{}', dropping",
                orphans.len(),
                paragraph_id
            );
        }

        citations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::join_paragraphs;

    fn paragraphs() -> Vec<Paragraph> {
        vec![Paragraph::new(0, "Foo bar."), Paragraph::new(1, "Baz qux.")]
    }

    #[test]
    fn test_ignores_reported_offset() {
        let paragraphs = paragraphs();
        let mut candidate = CandidateFinding::new("p2", "qux");
        candidate.start_pos = Some(serde_json::json!(999));

        let citations = CitationPositionMapper::new(&paragraphs).map(&[candidate]);

        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].start_pos, 14);
        assert_eq!(citations[0].end_pos, 17);

        let document = join_paragraphs(&paragraphs);
        assert_eq!(&document[citations[0].start_pos..citations[0].end_pos], "qux");
    }

    #[test]
    fn test_unlocatable_candidate_dropped() {
        let paragraphs = paragraphs();
        let citations = CitationPositionMapper::new(&paragraphs).map(&[
            CandidateFinding::new("p1", "not here"),
            CandidateFinding::new("p9", "Foo"),
            CandidateFinding::new("p1", "Foo"),
        ]);

        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].start_pos, 0);
    }

    #[test]
    fn test_repeated_text_maps_to_successive_occurrences() {
        let paragraphs = vec![Paragraph::new(0, "See Id. and again Id. here.")];
        let citations = CitationPositionMapper::new(&paragraphs).map(&[
            CandidateFinding::new("p1", "Id."),
            CandidateFinding::new("p1", "Id."),
        ]);

        assert_eq!(citations[0].start_pos, 4);
        assert_eq!(citations[1].start_pos, 18);
    }

    #[test]
    fn test_candidate_from_finding_value() {
        let value = serde_json::json!({
            "id": "c1",
            "type": "case",
            "originalText": "Roe v. Wade",
            "startPos": 3,
            "paragraphId": "p1",
            "needsVerification": true
        });
        let candidate = CandidateFinding::from_value(&value).unwrap();
        assert_eq!(candidate.citation_type, "case");
        assert!(candidate.is_complete);
        assert!(candidate.needs_verification);
    }

    #[test]
    fn test_oddly_typed_fields_do_not_reject_candidate() {
        for start_pos in [serde_json::json!(11.0), serde_json::json!("12"), serde_json::json!(-1.5)] {
            let value = serde_json::json!({
                "id": 7,
                "originalText": "Smith v. Jones",
                "startPos": start_pos,
                "paragraphId": "p1",
                "isComplete": "no",
                "needsVerification": null
            });
            let candidate = CandidateFinding::from_value(&value).unwrap();
            assert_eq!(candidate.id, "7");
            assert_eq!(candidate.original_text, "Smith v. Jones");
            assert!(!candidate.is_complete);
            assert!(!candidate.needs_verification);

            let paragraphs = vec![Paragraph::new(0, "As held in Smith v. Jones, the rule applies.")];
            let citations = CitationPositionMapper::new(&paragraphs).map(&[candidate]);
            assert_eq!(citations.len(), 1);
            assert_eq!(citations[0].start_pos, 11);
        }

        assert!(CandidateFinding::from_value(&serde_json::json!("Smith v. Jones")).is_none());
    }
}
