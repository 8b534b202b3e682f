//! JSON object extraction for model responses.
//!
//! Models asked for "JSON only" still wrap the object in markdown fences or
//! surround it with prose. The extractor tries, in order:
//! 1. A ```json fenced block
//! 2. Any other fenced block containing an object
//! 3. The trimmed content itself, when it starts with '{'
//! 4. The largest balanced object anywhere in the content
//!
//! # Example
//!
//! ```
//! use bias_worker::utils::json_extraction::extract_json_object;
//!
//! let response = "Sure! {\"biasDirection\": \"CENTER\"} Hope that helps.";
//! let json = extract_json_object(response).unwrap();
//! assert_eq!(json, "{\"biasDirection\": \"CENTER\"}");
//! ```

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Maximum characters of the response quoted in an error.
const PREVIEW_CHARS: usize = 80;

/// Error type for JSON extraction failures.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
    },
    #[error("No JSON object found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
}

fn preview(s: &str) -> String {
    s.chars().take(PREVIEW_CHARS).collect()
}

fn json_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").expect("valid regex"))
}

fn any_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").expect("valid regex"))
}

fn is_valid_json(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

/// Extracts a single JSON object from a model response.
///
/// Returns `Truncated` when an object opens but never closes (typically a
/// response cut off by the token limit) and `NotFound` otherwise.
pub fn extract_json_object(content: &str) -> Result<String, JsonExtractionError> {
    let trimmed = content.trim();

    for fence in [json_fence(), any_fence()] {
        if let Some(block) = fence
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
        {
            if let Some(json) = first_balanced_object(block) {
                return Ok(json);
            }
        }
    }

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            let candidate = &trimmed[..=end];
            if is_valid_json(candidate) {
                return Ok(candidate.to_string());
            }
        }
    }

    if let Some(json) = largest_valid_object(trimmed) {
        return Ok(json);
    }

    if let Some(start) = trimmed.find('{') {
        let unclosed_braces = unclosed_braces(&trimmed[start..]);
        if unclosed_braces > 0 {
            return Err(JsonExtractionError::Truncated {
                partial_preview: preview(&trimmed[start..]),
                unclosed_braces,
            });
        }
    }

    Err(JsonExtractionError::NotFound {
        content_preview: preview(trimmed),
    })
}

/// Finds the index of the '}' closing the object that opens at the start of `s`.
///
/// Braces inside string literals, including escaped quotes, are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
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
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn first_balanced_object(block: &str) -> Option<String> {
    let start = block.find('{')?;
    let end = find_matching_brace(&block[start..])?;
    let candidate = &block[start..=start + end];
    is_valid_json(candidate).then(|| candidate.to_string())
}

/// Picks the largest valid object, preferring later ones on ties.
///
/// Reasoning models often echo small example objects before the answer.
fn largest_valid_object(content: &str) -> Option<String> {
    content
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(|(start, _)| {
            let substr = &content[start..];
            let end = find_matching_brace(substr)?;
            let candidate = &substr[..=end];
            is_valid_json(candidate).then_some((start, candidate))
        })
        .max_by(|(pos_a, a), (pos_b, b)| a.len().cmp(&b.len()).then(pos_a.cmp(pos_b)))
        .map(|(_, json)| json.to_string())
}

fn unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }

    depth.max(0) as usize
}
