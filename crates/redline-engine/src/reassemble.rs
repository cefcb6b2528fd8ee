//! Merging of per-item results into one module output
//!
//! Chunked modules produce one result per chunk; [`reassemble`] merges them
//! by output shape. Per-paragraph and per-finding modules produce one result
//! per item; [`assemble_paragraph_results`] and [`assemble_tagged_results`]
//! tag each finding with the item it came from. Editing modules first fold a
//! paragraph's findings into one [`paragraph_entry`].

use serde_json::{json, Map, Value};

use crate::batch::is_error_result;
use crate::constants::layout::CHUNK_TEXT_SEPARATOR;
use crate::envelope::Paragraph;
use crate::modules::OutputShape;

/// Quality bucket for an average score
pub fn quality_label(average: Option<f64>) -> &'static str {
    match average {
        None => "unscored",
        Some(score) if score >= 90.0 => "excellent",
        Some(score) if score >= 75.0 => "good",
        Some(score) if score >= 60.0 => "fair",
        Some(_) => "needs-improvement",
    }
}

/// `{total, averageScore, qualityLabel}` over a finding list
///
/// Scores are read from each finding's numeric `score` field.
pub fn summarize_findings(findings: &[Value]) -> Value {
    let scores: Vec<f64> = findings
        .iter()
        .filter_map(|f| f.get("score").and_then(Value::as_f64))
        .collect();

    let average = (!scores.is_empty()).then(|| {
        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        (mean * 10.0).round() / 10.0
    });

    json!({
        "total": findings.len(),
        "averageScore": average,
        "qualityLabel": quality_label(average),
    })
}

fn error_entry(result: &Value) -> Value {
    json!({
        "itemId": result.get("itemId").cloned().unwrap_or(Value::Null),
        "error": result.get("error").cloned().unwrap_or(Value::Null),
    })
}

fn processing_time(result: &Value) -> u64 {
    result.get("processingTime").and_then(Value::as_u64).unwrap_or(0)
}

/// Merge chunk results into one output
///
/// A single result is returned unchanged.
pub fn reassemble(results: &[Value], shape: &OutputShape) -> Value {
    if results.len() == 1 {
        return results[0].clone();
    }

    match shape {
        OutputShape::Findings { key } => merge_findings(results, key),
        OutputShape::Text => merge_text(results),
        OutputShape::List => Value::Array(
            results
                .iter()
                .filter(|r| !is_error_result(r))
                .flat_map(|r| match r {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                })
                .collect(),
        ),
        OutputShape::Object => {
            let mut merged = Map::new();
            for result in results.iter().filter(|r| !is_error_result(r)) {
                match result {
                    Value::Object(map) => merged.extend(map.clone()),
                    _ => {
                        log::debug!("Object merge met a non-object result, falling back to text");
                        return merge_text(results);
                    }
                }
            }
            Value::Object(merged)
        }
    }
}

fn merge_findings(results: &[Value], key: &str) -> Value {
    let mut findings = Vec::new();
    let mut errors = Vec::new();
    let mut total_time = 0;

    for (index, result) in results.iter().enumerate() {
        if is_error_result(result) {
            errors.push(error_entry(result));
            continue;
        }
        total_time += processing_time(result);

        let prefix = format!("chunk{}-", index);
        let items = result.get(key).and_then(Value::as_array).cloned().unwrap_or_default();
        for (i, mut finding) in items.into_iter().enumerate() {
            if let Some(obj) = finding.as_object_mut() {
                let id = obj
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("f{}", i + 1));
                obj.insert("id".into(), Value::String(format!("{}{}", prefix, id)));

                if let Some(pid) = obj.get("paragraphId").and_then(Value::as_str).map(str::to_string) {
                    obj.insert("paragraphId".into(), Value::String(format!("{}{}", prefix, pid)));
                }
            }
            findings.push(finding);
        }
    }

    let summary = summarize_findings(&findings);
    json!({
        key: findings,
        "summary": summary,
        "processingTime": total_time,
        "totalChunks": results.len(),
        "failedItems": errors.len(),
        "errors": errors,
    })
}

fn merge_text(results: &[Value]) -> Value {
    let mut failed = 0;
    let parts: Vec<String> = results
        .iter()
        .filter(|r| {
            let is_error = is_error_result(r);
            failed += usize::from(is_error);
            !is_error
        })
        .map(|r| match r {
            Value::String(text) => text.clone(),
            other => other
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        })
        .collect();

    json!({
        "text": parts.join(CHUNK_TEXT_SEPARATOR),
        "totalChunks": results.len(),
        "failedItems": failed,
    })
}

/// Merge per-item results, tagging each finding with its item's id
///
/// `tags[i]` is the id of the item that produced `results[i]`; it is stored
/// under `tag_field` and prefixed to the finding id.
pub fn assemble_tagged_results(tags: &[String], tag_field: &str, results: &[Value], key: &str) -> Value {
    let mut findings = Vec::new();
    let mut errors = Vec::new();
    let mut total_time = 0;

    for (tag, result) in tags.iter().zip(results) {
        if is_error_result(result) {
            errors.push(error_entry(result));
            continue;
        }
        total_time += processing_time(result);

        let items = result.get(key).and_then(Value::as_array).cloned().unwrap_or_default();
        for (i, mut finding) in items.into_iter().enumerate() {
            if let Some(obj) = finding.as_object_mut() {
                let id = obj
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("f{}", i + 1));
                let id = if id == *tag { id } else { format!("{}-{}", tag, id) };
                obj.insert("id".into(), Value::String(id));
                obj.insert(tag_field.into(), Value::String(tag.clone()));
            }
            findings.push(finding);
        }
    }

    let summary = summarize_findings(&findings);
    json!({
        key: findings,
        "summary": summary,
        "processingTime": total_time,
        "totalItems": results.len(),
        "failedItems": errors.len(),
        "errors": errors,
    })
}

/// Merge per-paragraph results, tagging findings with `paragraphId`
pub fn assemble_paragraph_results(paragraphs: &[Paragraph], results: &[Value], key: &str) -> Value {
    let tags: Vec<String> = paragraphs.iter().map(|p| p.id.clone()).collect();
    let mut output = assemble_tagged_results(&tags, "paragraphId", results, key);
    if let Some(obj) = output.as_object_mut() {
        obj.insert("totalParagraphs".into(), json!(paragraphs.len()));
    }
    output
}

/// Fold one paragraph's result into a single entry keyed by the paragraph
///
/// The entry carries the paragraph as `original`, its `corrected` text and a
/// `score`, with the model's findings nested under `suggestions`. A corrected
/// text or score at the top level of `result` wins over the derived ones.
pub fn paragraph_entry(paragraph: &Paragraph, result: &Value, key: &str) -> Value {
    let findings = result.get(key).and_then(Value::as_array).cloned().unwrap_or_default();

    let corrected = ["corrected", "correctedText", "revised"]
        .iter()
        .find_map(|k| result.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| apply_corrections(&paragraph.content, &findings));

    let score = result.get("score").and_then(Value::as_f64).or_else(|| {
        if findings.is_empty() {
            Some(100.0)
        } else {
            summarize_findings(&findings)["averageScore"].as_f64()
        }
    });

    let mut entry = json!({
        "id": paragraph.id,
        "paragraphId": paragraph.id,
        "original": paragraph.content,
        "corrected": corrected,
        "score": score,
        "suggestions": findings,
    });
    if result.get("degraded").and_then(Value::as_bool) == Some(true) {
        entry["degraded"] = Value::Bool(true);
    }

    let mut wrapped = json!({ key: [entry] });
    if let Some(time) = result.get("processingTime") {
        wrapped["processingTime"] = time.clone();
    }
    wrapped
}

/// Apply each finding's `original` -> `corrected` (or `revised`) once, in order
fn apply_corrections(text: &str, findings: &[Value]) -> String {
    findings.iter().fold(text.to_string(), |acc, finding| {
        let original = finding.get("original").and_then(Value::as_str);
        let replacement = ["corrected", "revised"]
            .iter()
            .find_map(|k| finding.get(*k).and_then(Value::as_str));
        match (original, replacement) {
            (Some(from), Some(to)) if !from.is_empty() => acc.replacen(from, to, 1),
            _ => acc,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::error_placeholder;

    #[test]
    fn test_single_result_is_identity() {
        let result = json!({"analysis": [{"id": "a"}], "custom": 1});
        assert_eq!(reassemble(&[result.clone()], &OutputShape::findings("analysis")), result);
    }

    #[test]
    fn test_three_chunk_findings_merge() {
        let results = vec![
            json!({"analysis": [{"id": "a1", "score": 80}, {"id": "a2", "score": 100}], "processingTime": 10}),
            json!({"analysis": [{"id": "a1", "score": 60, "paragraphId": "p1"}], "processingTime": 5}),
            json!({"analysis": [{"id": "a1", "score": 90}], "processingTime": 7}),
        ];

        let merged = reassemble(&results, &OutputShape::findings("analysis"));
        let analysis = merged["analysis"].as_array().unwrap();

        assert_eq!(analysis.len(), 4);
        let ids: Vec<&str> = analysis.iter().map(|f| f["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["chunk0-a1", "chunk0-a2", "chunk1-a1", "chunk2-a1"]);
        assert_eq!(analysis[2]["paragraphId"], "chunk1-p1");

        assert_eq!(merged["summary"]["total"], 4);
        assert_eq!(merged["summary"]["averageScore"], 82.5);
        assert_eq!(merged["summary"]["qualityLabel"], "good");
        assert_eq!(merged["processingTime"], 22);
        assert_eq!(merged["failedItems"], 0);
    }

    #[test]
    fn test_failed_chunk_is_counted() {
        let results = vec![
            json!({"issues": [{"id": "i1"}]}),
            error_placeholder("chunk-1", "timeout"),
        ];
        let merged = reassemble(&results, &OutputShape::findings("issues"));

        assert_eq!(merged["issues"].as_array().unwrap().len(), 1);
        assert_eq!(merged["failedItems"], 1);
        assert_eq!(merged["errors"][0]["itemId"], "chunk-1");
        assert_eq!(merged["summary"]["qualityLabel"], "unscored");
    }

    #[test]
    fn test_text_list_and_object_merge() {
        let text = reassemble(
            &[json!({"text": "One."}), json!({"text": "Two."})],
            &OutputShape::Text,
        );
        assert_eq!(text["text"], "One.\n\n---\n\nTwo.");

        let list = reassemble(&[json!([1, 2]), json!([3])], &OutputShape::List);
        assert_eq!(list, json!([1, 2, 3]));

        let object = reassemble(&[json!({"a": 1, "b": 1}), json!({"b": 2})], &OutputShape::Object);
        assert_eq!(object, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_quality_buckets() {
        assert_eq!(quality_label(Some(95.0)), "excellent");
        assert_eq!(quality_label(Some(90.0)), "excellent");
        assert_eq!(quality_label(Some(75.0)), "good");
        assert_eq!(quality_label(Some(60.0)), "fair");
        assert_eq!(quality_label(Some(59.9)), "needs-improvement");
        assert_eq!(quality_label(None), "unscored");
    }

    #[test]
    fn test_paragraph_results_tagged() {
        let paragraphs = vec![Paragraph::new(0, "First paragraph."), Paragraph::new(1, "Second paragraph.")];
        let results = vec![
            json!({"analysis": [{"id": "a1", "score": 70}]}),
            json!({"analysis": [{"score": 90}]}),
        ];

        let output = assemble_paragraph_results(&paragraphs, &results, "analysis");
        let analysis = output["analysis"].as_array().unwrap();

        assert_eq!(analysis[0]["id"], "p1-a1");
        assert_eq!(analysis[0]["paragraphId"], "p1");
        assert_eq!(analysis[1]["id"], "p2-f1");
        assert_eq!(output["totalParagraphs"], 2);
        assert_eq!(output["summary"]["averageScore"], 80.0);
    }

    #[test]
    fn test_paragraph_entry_folds_findings() {
        let paragraph = Paragraph::new(0, "The defendant were late and the counsel was absent.");
        let result = json!({
            "analysis": [
                {"id": "a1", "original": "defendant were", "corrected": "defendant was", "score": 70},
                {"id": "a2", "original": "the counsel", "corrected": "counsel", "score": 85},
            ],
            "processingTime": 4,
        });

        let wrapped = paragraph_entry(&paragraph, &result, "analysis");
        let entries = wrapped["analysis"].as_array().unwrap();
        assert_eq!(entries.len(), 1);

        let entry = &entries[0];
        assert_eq!(entry["id"], "p1");
        assert_eq!(entry["paragraphId"], "p1");
        assert_eq!(entry["original"], "The defendant were late and the counsel was absent.");
        assert_eq!(entry["corrected"], "The defendant was late and counsel was absent.");
        assert_eq!(entry["score"], 77.5);
        assert_eq!(entry["suggestions"].as_array().unwrap().len(), 2);
        assert_eq!(wrapped["processingTime"], 4);
    }

    #[test]
    fn test_paragraph_entry_prefers_reported_text_and_score() {
        let paragraph = Paragraph::new(2, "Clean sentence here.");
        let clean = paragraph_entry(&paragraph, &json!({"issues": []}), "issues");
        assert_eq!(clean["issues"][0]["score"], 100.0);
        assert_eq!(clean["issues"][0]["corrected"], "Clean sentence here.");

        let reported = json!({"issues": [{"id": "i1", "score": 40}], "revised": "A clean sentence.", "score": 55});
        let entry = &paragraph_entry(&paragraph, &reported, "issues")["issues"][0];
        assert_eq!(entry["id"], "p3");
        assert_eq!(entry["corrected"], "A clean sentence.");
        assert_eq!(entry["score"], 55.0);
    }

    #[test]
    fn test_paragraph_entries_keep_paragraph_ids() {
        let paragraphs = vec![Paragraph::new(0, "First paragraph."), Paragraph::new(1, "Second paragraph.")];
        let results: Vec<Value> = paragraphs
            .iter()
            .map(|p| paragraph_entry(p, &json!({"analysis": [{"score": 60}, {"score": 80}]}), "analysis"))
            .collect();

        let output = assemble_paragraph_results(&paragraphs, &results, "analysis");
        let analysis = output["analysis"].as_array().unwrap();
        assert_eq!(analysis.len(), 2);
        assert_eq!(analysis[0]["id"], "p1");
        assert_eq!(analysis[1]["id"], "p2");
        assert_eq!(output["summary"]["averageScore"], 70.0);
    }
}
