//! Parsed generation output and the parser that produces it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BriefError, Result};

/// How promising a school looks as a prospect. Orders `High` first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SalesPriority {
    High,
    Medium,
    Low,
}

impl SalesPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Self::High),
            "MEDIUM" => Some(Self::Medium),
            "LOW" => Some(Self::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for SalesPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One talking point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationStarter {
    pub topic: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f32>,
}

/// Validated output of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    /// In the order the model returned them.
    pub starters: Vec<ConversationStarter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub sales_priority: SalesPriority,
    /// Provider identity that produced the result.
    pub model: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawGeneration {
    #[serde(default)]
    conversation_starters: Option<Vec<RawStarter>>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    sales_priority: Option<String>,
}

#[derive(Deserialize)]
struct RawStarter {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    relevance_score: Option<Value>,
}

/// Parse and validate raw model output.
///
/// At most `max_starters` starters are kept. Any shape problem is a
/// [`BriefError::GenerationFailed`] carrying the raw text.
pub fn parse_generation(
    raw: &str,
    max_starters: usize,
    model: &str,
    generated_at: DateTime<Utc>,
) -> Result<GenerationResult> {
    let fail = |message: String| BriefError::GenerationFailed {
        message,
        raw_response: Some(raw.to_string()),
    };

    let parsed = find_generation(raw).map_err(fail)?;

    let raw_starters = parsed
        .conversation_starters
        .ok_or_else(|| fail("missing 'conversation_starters'".to_string()))?;
    if raw_starters.is_empty() {
        return Err(fail("no conversation starters returned".to_string()));
    }

    let mut starters = Vec::with_capacity(raw_starters.len().min(max_starters));
    for (i, s) in raw_starters.into_iter().take(max_starters.max(1)).enumerate() {
        let n = i + 1;
        let topic = non_empty(s.topic).ok_or_else(|| fail(format!("starter {n} has no topic")))?;
        let detail =
            non_empty(s.detail).ok_or_else(|| fail(format!("starter {n} has no detail")))?;
        let relevance_score = match s.relevance_score {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                score(&v).ok_or_else(|| fail(format!("starter {n} has invalid relevance_score {v}")))?,
            ),
        };
        starters.push(ConversationStarter {
            topic,
            detail,
            source: non_empty(s.source),
            relevance_score,
        });
    }

    let priority_raw = parsed
        .sales_priority
        .ok_or_else(|| fail("missing 'sales_priority'".to_string()))?;
    let sales_priority = SalesPriority::parse(&priority_raw)
        .ok_or_else(|| fail(format!("invalid sales_priority '{priority_raw}'")))?;

    Ok(GenerationResult {
        starters,
        summary: non_empty(parsed.summary),
        sales_priority,
        model: model.to_string(),
        generated_at,
    })
}

/// First JSON object in `raw` that carries `conversation_starters`.
///
/// Braces in surrounding prose (`{school_context}`) and nested objects are
/// skipped over rather than taken as the answer.
fn find_generation(raw: &str) -> std::result::Result<RawGeneration, String> {
    let mut seen_object = false;
    let mut first_syntax_error = None;
    for candidate in json_object_candidates(raw) {
        seen_object = true;
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) if map.contains_key("conversation_starters") => {
                return serde_json::from_value(Value::Object(map))
                    .map_err(|e| format!("response JSON has the wrong shape: {e}"));
            }
            Ok(_) => {}
            Err(e) => {
                first_syntax_error.get_or_insert(e);
            }
        }
    }
    Err(match (seen_object, first_syntax_error) {
        (false, _) => "response contained no JSON object".to_string(),
        (true, Some(e)) => format!("response JSON is malformed: {e}"),
        (true, None) => "missing 'conversation_starters'".to_string(),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A score in `0.0..=1.0`, given as a number or numeric string.
fn score(value: &Value) -> Option<f32> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (0.0..=1.0).contains(&n).then_some(n as f32)
}

/// First balanced `{...}` in `text`, skipping braces inside JSON strings.
///
/// Handles Markdown code fences and leading/trailing prose.
pub fn extract_json_object(text: &str) -> Option<&str> {
    json_object_candidates(text).next()
}

/// Every balanced `{...}` span, in order of its opening brace.
pub fn json_object_candidates(text: &str) -> impl Iterator<Item = &str> {
    text.match_indices('{')
        .filter_map(move |(start, _)| balanced_object_at(text, start))
}

fn balanced_object_at(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "conversation_starters": [
            {"topic": "Agency spend", "detail": "You spend £102 per pupil on agency staff.", "source": "agency_supply_costs", "relevance_score": 0.9},
            {"topic": "Benchmarking", "detail": "Spending is above 96% of similar schools.", "relevance_score": "0.7"},
            {"topic": "Leadership", "detail": "Ms Holness leads a nursery of 116 pupils."}
        ],
        "summary": "Camden nursery with high agency spend.",
        "sales_priority": "high"
    }"#;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-16T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_parse_valid_response() {
        let result = parse_generation(VALID, 5, "anthropic:claude", now()).unwrap();
        assert_eq!(result.starters.len(), 3);
        assert_eq!(result.starters[0].topic, "Agency spend");
        assert_eq!(result.starters[0].relevance_score, Some(0.9));
        assert_eq!(result.starters[1].relevance_score, Some(0.7));
        assert!(result.starters[2].source.is_none());
        assert_eq!(result.sales_priority, SalesPriority::High);
        assert_eq!(result.model, "anthropic:claude");
        assert_eq!(result.generated_at, now());
    }

    #[test]
    fn test_parse_truncates_to_requested_count() {
        let result = parse_generation(VALID, 2, "m", now()).unwrap();
        assert_eq!(result.starters.len(), 2);
        assert_eq!(result.starters[1].topic, "Benchmarking");
    }

    #[test]
    fn test_parse_fenced_json() {
        let raw = format!("Here you go:\n```json\n{}\n```\nGood luck!", VALID);
        assert!(parse_generation(&raw, 5, "m", now()).is_ok());
    }

    #[test]
    fn test_brace_in_leading_prose_is_skipped() {
        let raw = format!("Based on the {{school_context}} provided, here you go:\n{}", VALID);
        let result = parse_generation(&raw, 5, "m", now()).unwrap();
        assert_eq!(result.starters.len(), 3);

        let quoted = format!("Note {{\"tip\": \"call early\"}} first.\n```json\n{}\n```", VALID);
        assert_eq!(
            parse_generation(&quoted, 5, "m", now()).unwrap().sales_priority,
            SalesPriority::High
        );
    }

    #[test]
    fn test_object_without_starters_rejected() {
        let err = parse_generation(r#"{"summary": "x", "sales_priority": "LOW"}"#, 5, "m", now())
            .unwrap_err();
        assert!(err.to_string().contains("conversation_starters"));
        let err = parse_generation("{not json at all}", 5, "m", now()).unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn test_no_json_keeps_raw_response() {
        let err = parse_generation("I cannot help with that.", 5, "m", now()).unwrap_err();
        assert_eq!(err.raw_response(), Some("I cannot help with that."));
        assert!(matches!(err, BriefError::GenerationFailed { .. }));
    }

    #[test]
    fn test_empty_starters_rejected() {
        let raw = r#"{"conversation_starters": [], "sales_priority": "LOW"}"#;
        let err = parse_generation(raw, 5, "m", now()).unwrap_err();
        assert!(err.to_string().contains("no conversation starters"));
    }

    #[test]
    fn test_blank_detail_rejected() {
        let raw = r#"{"conversation_starters": [{"topic": "T", "detail": "  "}], "sales_priority": "LOW"}"#;
        assert!(parse_generation(raw, 5, "m", now()).is_err());
    }

    #[test]
    fn test_out_of_range_score_rejected() {
        let raw = r#"{"conversation_starters": [{"topic": "T", "detail": "D", "relevance_score": 7}], "sales_priority": "LOW"}"#;
        assert!(parse_generation(raw, 5, "m", now()).is_err());
    }

    #[test]
    fn test_bad_priority_rejected() {
        let raw = r#"{"conversation_starters": [{"topic": "T", "detail": "D"}], "sales_priority": "URGENT"}"#;
        let err = parse_generation(raw, 5, "m", now()).unwrap_err();
        assert!(err.to_string().contains("URGENT"));
        let missing = r#"{"conversation_starters": [{"topic": "T", "detail": "D"}]}"#;
        assert!(parse_generation(missing, 5, "m", now()).is_err());
    }

    #[test]
    fn test_extract_json_ignores_braces_in_strings() {
        let text = r#"note {"a": "has } brace and \" quote", "b": {"c": 1}} tail }"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"a": "has } brace and \" quote", "b": {"c": 1}}"#)
        );
        assert!(extract_json_object("{ unclosed").is_none());
        assert!(extract_json_object("none").is_none());
    }

    #[test]
    fn test_result_serde_roundtrip_is_lossless() {
        let result = parse_generation(VALID, 5, "m", now()).unwrap();
        let json = serde_json::to_string(&result).unwrap();
        let back: GenerationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }
}
