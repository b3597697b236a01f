//! JSON repair utilities for handling malformed LLM output.
//!
//! The agents in this crate contract their models to reply with JSON, and
//! models routinely get it slightly wrong: Python booleans, trailing commas,
//! comments, markdown code fences around the object, prose before or after.
//! The lenient parser here recovers the intended value where possible.

use regex::Regex;
use serde_json::Value;

/// Repair common JSON issues from LLMs.
/// Handles: trailing commas, Python booleans/None, BOM, comments.
pub fn repair_malformed_json(json_str: &str) -> String {
    let mut result = json_str
        .trim_start_matches('\u{feff}')
        .trim_start_matches('\u{fffe}')
        .to_string();

    if let Ok(line_comment_re) = Regex::new(r"(?m)^\s*//.*$") {
        result = line_comment_re.replace_all(&result, "").to_string();
    }

    if let Ok(block_comment_re) = Regex::new(r"(?s)/\*.*?\*/") {
        result = block_comment_re.replace_all(&result, "").to_string();
    }

    // Python literals; word boundaries keep string contents mostly intact
    if let Ok(true_re) = Regex::new(r"\bTrue\b") {
        result = true_re.replace_all(&result, "true").to_string();
    }
    if let Ok(false_re) = Regex::new(r"\bFalse\b") {
        result = false_re.replace_all(&result, "false").to_string();
    }
    if let Ok(none_re) = Regex::new(r"\bNone\b") {
        result = none_re.replace_all(&result, "null").to_string();
    }

    if let Ok(trailing_comma_re) = Regex::new(r",(\s*[}\]])") {
        result = trailing_comma_re.replace_all(&result, "$1").to_string();
    }

    result
}

/// Parse JSON with lenient fallbacks.
/// Fallback chain:
/// 1. Direct serde_json parse (fast path)
/// 2. Markdown code-fence extraction
/// 3. repair_malformed_json preprocessing + serde_json
/// 4. json5 parser (unquoted keys, comments, trailing commas)
/// 5. Balanced brace extraction from surrounding prose + retry
pub fn parse_json_lenient(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();

    if let Ok(val) = serde_json::from_str::<Value>(trimmed) {
        return Some(unwrap_single_element(val));
    }

    let candidate = extract_fenced_json(trimmed).unwrap_or_else(|| trimmed.to_string());

    let fixed = repair_malformed_json(&candidate);
    if let Ok(val) = serde_json::from_str::<Value>(&fixed) {
        return Some(unwrap_single_element(val));
    }

    if let Ok(val) = json5::from_str::<Value>(&fixed) {
        return Some(unwrap_single_element(val));
    }

    if let Some(balanced) = extract_first_balanced_object(&candidate) {
        let fixed_balanced = repair_malformed_json(&balanced);
        if let Ok(val) = serde_json::from_str::<Value>(&fixed_balanced) {
            return Some(unwrap_single_element(val));
        }
        if let Ok(val) = json5::from_str::<Value>(&fixed_balanced) {
            return Some(unwrap_single_element(val));
        }
    }

    None
}

/// Single-element arrays are unwrapped: models sometimes emit `[{...}]`
/// where the contract asks for `{...}`.
fn unwrap_single_element(value: Value) -> Value {
    if let Value::Array(arr) = &value {
        if arr.len() == 1 && arr[0].is_object() {
            return arr[0].clone();
        }
    }
    value
}

/// Extract the body of a ```json ... ``` (or bare ``` ... ```) fence.
fn extract_fenced_json(content: &str) -> Option<String> {
    let re = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\}|\[.*?\])\s*```").ok()?;
    re.captures(content)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

/// Find the first balanced `{...}` block anywhere in the content.
pub fn extract_first_balanced_object(content: &str) -> Option<String> {
    let start = content.find('{')?;
    let s = &content[start..];

    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(s[..=i].to_string());
                }
            }
            _ => {}
        }
    }

    None
}
