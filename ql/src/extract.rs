//! Tolerant JSON extraction from LLM replies
//!
//! Model output arrives wrapped in code fences, prefixed with prose, and
//! bent in all the ways real completions bend: trailing commas, unquoted
//! keys, doubled quotes inside strings, several JSON blocks in one reply.
//! This module is the one place where being liberal in what we accept is a
//! hard requirement.
//!
//! The pipeline is a sequence of composable cleaners (strip fences → locate
//! balanced blocks → fix trailing commas → quote bare keys → collapse
//! doubled quotes) feeding a validating parse. When several candidate
//! blocks survive, the largest valid one wins.

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Why extraction failed; the variant names the pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("no JSON object or array found in reply")]
    NoJson,
    #[error("unbalanced JSON delimiters in reply")]
    Unbalanced,
    #[error("candidate block is not valid JSON after cleaning: {0}")]
    Invalid(String),
}

/// A fenced code block from a markdown-ish reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// Language tag, lowercased ("go", "json", "hcl", ""…)
    pub lang: String,
    pub body: String,
}

/// Extract the most plausible JSON value from a raw model reply
///
/// Single-object replies parse directly; multi-object replies fall back to
/// the largest candidate block that parses after cleaning.
pub fn extract_json(text: &str) -> Result<Value, ExtractError> {
    debug!(text_len = text.len(), "extract_json: called");

    // Fenced json blocks are the strongest signal; try their bodies first.
    let mut candidates: Vec<String> = fenced_blocks(text)
        .into_iter()
        .filter(|b| b.lang.is_empty() || b.lang == "json")
        .map(|b| b.body)
        .collect();

    let stripped = strip_fences(text);
    candidates.extend(balanced_blocks(&stripped).into_iter().map(|s| s.to_string()));

    if candidates.is_empty() {
        return Err(if stripped.contains(['{', '[']) {
            ExtractError::Unbalanced
        } else {
            ExtractError::NoJson
        });
    }

    let mut best: Option<(usize, Value)> = None;
    let mut last_parse_error = String::new();

    for candidate in &candidates {
        match parse_with_cleaning(candidate) {
            Ok(value) => {
                let size = candidate.len();
                if best.as_ref().is_none_or(|(n, _)| size > *n) {
                    best = Some((size, value));
                }
            }
            Err(e) => last_parse_error = e,
        }
    }

    match best {
        Some((_, value)) => Ok(value),
        None => Err(ExtractError::Invalid(last_parse_error)),
    }
}

/// Parse a candidate block, applying cleaners only when the raw parse fails
fn parse_with_cleaning(candidate: &str) -> Result<Value, String> {
    let trimmed = candidate.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let cleaned = fix_trailing_commas(trimmed);
    if let Ok(value) = serde_json::from_str(&cleaned) {
        debug!("parse_with_cleaning: trailing-comma fix succeeded");
        return Ok(value);
    }

    let cleaned = quote_bare_keys(&cleaned);
    if let Ok(value) = serde_json::from_str(&cleaned) {
        debug!("parse_with_cleaning: bare-key fix succeeded");
        return Ok(value);
    }

    let cleaned = collapse_doubled_quotes(&cleaned);
    serde_json::from_str(&cleaned).map_err(|e| e.to_string())
}

/// Remove markdown code fences, keeping their contents in place
pub fn strip_fences(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Collect fenced code blocks with their language tags
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut lang: Option<String> = None;
    let mut body = String::new();

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("```") {
            match lang.take() {
                Some(tag) => {
                    blocks.push(FencedBlock {
                        lang: tag,
                        body: std::mem::take(&mut body),
                    });
                }
                None => {
                    lang = Some(rest.trim().to_ascii_lowercase());
                }
            }
        } else if lang.is_some() {
            body.push_str(line);
            body.push('\n');
        }
    }

    blocks
}

/// Find every top-level balanced `{…}` or `[…]` block, string-aware
pub fn balanced_blocks(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut blocks = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' if depth > 0 => in_string = true,
            b'{' | b'[' => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            b'}' | b']' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        blocks.push(&text[start..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    blocks
}

/// Remove commas that directly precede a closing `}` or `]`
pub fn fix_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push('"');
            }
            ',' => {
                let next = text[i + 1..].chars().find(|c| !c.is_whitespace());
                if matches!(next, Some('}') | Some(']')) {
                    continue;
                }
                out.push(',');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Quote object keys matching `[A-Za-z_][A-Za-z0-9_]*`
///
/// Only applied after a raw parse failed; operating on strings that contain
/// `key:`-shaped text is an accepted risk of the tolerance.
pub fn quote_bare_keys(text: &str) -> String {
    let re = regex::Regex::new(r#"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).expect("static regex");
    re.replace_all(text, "$1\"$2\":").into_owned()
}

/// Collapse doubled quotes inside strings (`"say ""hi"""` → `"say \"hi\""`)
pub fn collapse_doubled_quotes(text: &str) -> String {
    text.replace("\"\"", "\\\"")
        // A doubled quote at a value boundary was a real delimiter pair;
        // the replace above breaks `{"a": ""}`, so restore empty strings.
        .replace(": \\\",", ": \"\",")
        .replace(": \\\"}", ": \"\"}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_object() {
        let value = extract_json(r#"{"files": {"main.go": "package main"}}"#).unwrap();
        assert_eq!(value["files"]["main.go"], "package main");
    }

    #[test]
    fn test_fenced_json() {
        let reply = "Here is the plan:\n```json\n{\"id\": \"t1\"}\n```\nLet me know!";
        let value = extract_json(reply).unwrap();
        assert_eq!(value["id"], "t1");
    }

    #[test]
    fn test_prose_wrapped_array() {
        let reply = "Sure thing. [{\"id\": 1}, {\"id\": 2}] Hope that helps.";
        let value = extract_json(reply).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_trailing_comma() {
        let value = extract_json(r#"{"a": 1, "b": [1, 2,],}"#).unwrap();
        assert_eq!(value, json!({"a": 1, "b": [1, 2]}));
    }

    #[test]
    fn test_unquoted_keys() {
        let value = extract_json("{files: {\"main.go\": \"x\"}, count: 1}").unwrap();
        assert_eq!(value["count"], 1);
    }

    #[test]
    fn test_multi_object_picks_largest_valid() {
        let reply = r#"{"small": 1} and then {"files": {"a.go": "pkg", "b.go": "pkg"}, "note": "bigger"}"#;
        let value = extract_json(reply).unwrap();
        assert!(value.get("files").is_some());
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let value = extract_json(r#"{"code": "func main() { fmt.Println(\"}\") }"}"#).unwrap();
        assert!(value["code"].as_str().unwrap().contains("Println"));
    }

    #[test]
    fn test_no_json() {
        assert_eq!(extract_json("nothing to see here"), Err(ExtractError::NoJson));
    }

    #[test]
    fn test_unbalanced() {
        assert_eq!(extract_json(r#"{"a": 1"#), Err(ExtractError::Unbalanced));
    }

    #[test]
    fn test_fenced_blocks_with_langs() {
        let reply = "```go\npackage main\n```\ntext\n```hcl\nresource \"x\" \"y\" {}\n```";
        let blocks = fenced_blocks(reply);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].lang, "go");
        assert!(blocks[0].body.contains("package main"));
        assert_eq!(blocks[1].lang, "hcl");
    }

    #[test]
    fn test_balanced_blocks_multiple() {
        let blocks = balanced_blocks(r#"a {"x": 1} b [2, 3] c"#);
        assert_eq!(blocks, vec![r#"{"x": 1}"#, "[2, 3]"]);
    }

    #[test]
    fn test_doubled_quotes() {
        let value = extract_json(r#"{"msg": "say ""hello"" loudly"}"#).unwrap();
        assert_eq!(value["msg"], "say \"hello\" loudly");
    }

    #[test]
    fn test_invalid_after_cleaning() {
        let err = extract_json("{this is : : not json}").unwrap_err();
        assert!(matches!(err, ExtractError::Invalid(_)));
    }
}
