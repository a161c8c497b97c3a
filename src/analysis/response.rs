//! Parsing model answers
//!
//! Models wrap their JSON in prose or code fences often enough that the
//! first well-formed array in the text is taken as the answer.

use super::ComplianceStatus;
use anyhow::Result;
use serde_json::Value;

/// One element of a model answer
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub status: ComplianceStatus,
    pub coverage_score: Option<f64>,
    pub reasoning: String,
    pub evidence_snippets: Vec<String>,
    pub selected_answer: Option<String>,
}

/// Find the first bracket-balanced substring that parses as a JSON array
pub fn extract_json_array(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();

    for (start, _) in text.match_indices('[') {
        let Some(end) = balanced_end(&bytes[start..]) else {
            continue;
        };
        let candidate = &text[start..start + end];
        if serde_json::from_str::<Vec<Value>>(candidate).is_ok() {
            return Some(candidate);
        }
    }

    None
}

/// Length of the bracketed span starting at `bytes[0]`, skipping string contents
fn balanced_end(bytes: &[u8]) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse a model answer into per-position assessments.
///
/// Fails when the text holds no JSON array at all. Elements that cannot be
/// read are returned as `Err` with the reason, so positions stay aligned.
pub fn parse_assessments(text: &str) -> Result<Vec<std::result::Result<Assessment, String>>> {
    let array = extract_json_array(text)
        .ok_or_else(|| anyhow::anyhow!("response contained no JSON array"))?;
    let values: Vec<Value> = serde_json::from_str(array)?;

    Ok(values.iter().map(parse_element).collect())
}

fn parse_element(value: &Value) -> std::result::Result<Assessment, String> {
    let object = value
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", type_name(value)))?;

    let raw_status = object
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing status".to_string())?;
    let status = ComplianceStatus::parse(raw_status)
        .ok_or_else(|| format!("unknown status '{}'", raw_status))?;

    let coverage_score = object.get("coverage_score").and_then(number);

    let reasoning = object
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    let evidence_snippets = match object.get("evidence_snippets") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) if !single.trim().is_empty() => vec![single.trim().to_string()],
        _ => Vec::new(),
    };

    let selected_answer = object
        .get("selected_answer")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(Assessment {
        status,
        coverage_score,
        reasoning,
        evidence_snippets,
        selected_answer,
    })
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_array_from_prose() {
        let text = "Here is my assessment:\n```json\n[{\"status\": \"FOUND\"}]\n```\nHope this helps [really].";
        assert_eq!(extract_json_array(text), Some("[{\"status\": \"FOUND\"}]"));
    }

    #[test]
    fn test_skips_malformed_candidates() {
        let text = "See [1] and [note: draft] then [{\"status\": \"MISSING\"}]";
        // [1] is itself a well-formed array and comes first.
        assert_eq!(extract_json_array(text), Some("[1]"));

        let text = "See [note: draft] then [{\"status\": \"MISSING\"}]";
        assert_eq!(extract_json_array(text), Some("[{\"status\": \"MISSING\"}]"));
    }

    #[test]
    fn test_brackets_inside_strings_are_ignored() {
        let text = r#"[{"status": "FOUND", "reasoning": "Section ] of [the] paper \" ok"}]"#;
        assert_eq!(extract_json_array(text), Some(text));
    }

    #[test]
    fn test_no_array() {
        assert!(extract_json_array("I could not find anything.").is_none());
        assert!(extract_json_array("[{\"status\": \"FOUND\"").is_none());
        assert!(parse_assessments("no json here").is_err());
    }

    #[test]
    fn test_parse_assessments_tolerates_bad_elements() {
        let text = r#"[
            {"status": "found", "coverage_score": "85%", "reasoning": " Described in section 2 ",
             "evidence_snippets": ["The issuer is Acme GmbH.", 42, ""], "selected_answer": "Yes"},
            "not an object",
            {"status": "PERHAPS"},
            {"status": "MISSING", "evidence_snippets": "single quote"}
        ]"#;

        let parsed = parse_assessments(text).unwrap();
        assert_eq!(parsed.len(), 4);

        let first = parsed[0].as_ref().unwrap();
        assert_eq!(first.status, ComplianceStatus::Found);
        assert_eq!(first.coverage_score, Some(85.0));
        assert_eq!(first.reasoning, "Described in section 2");
        assert_eq!(first.evidence_snippets, vec!["The issuer is Acme GmbH."]);
        assert_eq!(first.selected_answer.as_deref(), Some("Yes"));

        assert!(parsed[1].as_ref().unwrap_err().contains("a string"));
        assert!(parsed[2].as_ref().unwrap_err().contains("PERHAPS"));

        let last = parsed[3].as_ref().unwrap();
        assert_eq!(last.coverage_score, None);
        assert_eq!(last.evidence_snippets, vec!["single quote"]);
    }
}
