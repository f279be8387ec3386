//! Shared JSON extraction for model completions.
//!
//! Models wrap JSON in code fences, preambles, and trailing prose. All
//! adapters and the enrichment pipeline funnel completions through
//! [`extract_json`], which strips the wrapping and parses the first JSON
//! value found. An empty completion is a parse error, not a success.

use serde_json::Value;

use crate::error::{BackendError, Result};

/// Strip a leading/trailing Markdown code fence (```json ... ```).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "javascript", ...) on the fence line.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Extract and parse the first JSON object or array in a completion.
pub fn extract_json(text: &str) -> Result<Value> {
    let stripped = strip_code_fences(text);
    if stripped.is_empty() {
        return Err(BackendError::Parse("empty completion".to_string()));
    }

    // Fast path: the whole completion is JSON.
    if let Ok(value) = serde_json::from_str::<Value>(stripped) {
        return Ok(value);
    }

    // Otherwise locate the first balanced JSON value.
    let start = stripped
        .find(['{', '['])
        .ok_or_else(|| BackendError::Parse("no JSON value in completion".to_string()))?;
    let candidate = &stripped[start..];
    let end = balanced_end(candidate)
        .ok_or_else(|| BackendError::Parse("unbalanced JSON in completion".to_string()))?;

    serde_json::from_str(&candidate[..=end])
        .map_err(|e| BackendError::Parse(format!("invalid JSON in completion: {e}")))
}

/// Index of the closing bracket matching the first character, honoring
/// strings and escapes.
fn balanced_end(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let (open, close) = match bytes.first()? {
        b'{' => (b'{', b'}'),
        b'[' => (b'[', b']'),
        _ => return None,
    };

    let mut depth = 0usize;
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
            b'"' => in_string = true,
            b if b == open => depth += 1,
            b if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
