//! JSON extraction from LLM responses.
//!
//! Model replies often wrap the JSON a caller asked for in prose or markdown
//! fences. Extraction tries, in order:
//! 1. A ```json fenced block
//! 2. Any fenced block containing an object
//! 3. The first balanced `{...}` object that parses
//! 4. The span from the first `{` to the last `}`
//!
//! # Example
//!
//! ```
//! use devflow::utils::json_extraction::extract_json_object;
//!
//! let response = "Review done.\n```json\n{\"is_valid\": true}\n```";
//! assert_eq!(extract_json_object(response).as_deref(), Some("{\"is_valid\": true}"));
//! ```

use regex::Regex;
use std::sync::OnceLock;

fn json_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```json\s*\n?([\s\S]*?)\n?```").ok())
        .as_ref()
}

fn any_fence() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```").ok())
        .as_ref()
}

/// Index of the `}` closing the object that starts at `s[0]`.
///
/// String literals and escape sequences are skipped.
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
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn parses(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

fn balanced_object_from(content: &str, start: usize) -> Option<&str> {
    let tail = &content[start..];
    let end = find_matching_brace(tail)?;
    Some(&tail[..=end])
}

fn object_in_block(block: &str) -> Option<String> {
    let start = block.find('{')?;
    let candidate = balanced_object_from(block, start)?;
    parses(candidate).then(|| candidate.to_string())
}

/// Extract the first valid JSON object from a model response.
pub fn extract_json_object(content: &str) -> Option<String> {
    let trimmed = content.trim();

    if let Some(caps) = json_fence().and_then(|re| re.captures(trimmed)) {
        if let Some(found) = caps.get(1).and_then(|m| object_in_block(m.as_str().trim())) {
            return Some(found);
        }
    }

    if let Some(re) = any_fence() {
        for caps in re.captures_iter(trimmed) {
            if let Some(found) = caps.get(1).and_then(|m| object_in_block(m.as_str())) {
                return Some(found);
            }
        }
    }

    for (start, _) in trimmed.match_indices('{') {
        if let Some(candidate) = balanced_object_from(trimmed, start) {
            if parses(candidate) {
                return Some(candidate.to_string());
            }
        }
    }

    let first = trimmed.find('{')?;
    let last = trimmed.rfind('}')?;
    if last > first {
        let candidate = &trimmed[first..=last];
        if parses(candidate) {
            return Some(candidate.to_string());
        }
    }

    None
}

/// The raw `{ ... }` span between the first `{` and the last `}`, parsed
/// or not. `None` when the response has no braces at all.
pub fn outer_brace_span(content: &str) -> Option<&str> {
    let first = content.find('{')?;
    let last = content.rfind('}')?;
    (last > first).then(|| &content[first..=last])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_matching_brace_nested() {
        let s = r#"{"a": {"b": "}"}, "c": 1} trailing"#;
        let end = find_matching_brace(s).unwrap();
        assert_eq!(&s[..=end], r#"{"a": {"b": "}"}, "c": 1}"#);
    }

    #[test]
    fn test_find_matching_brace_unclosed() {
        assert_eq!(find_matching_brace(r#"{"a": 1"#), None);
    }

    #[test]
    fn test_extract_from_json_fence() {
        let response = "Here you go:\n```json\n{\"is_valid\": false, \"feedback\": \"x\"}\n```\nThanks";
        let json = extract_json_object(response).unwrap();
        assert!(json.starts_with('{'));
        assert!(json.contains("is_valid"));
    }

    #[test]
    fn test_extract_from_prose() {
        let response = "I think {not json} but then {\"passed\": true} at the end";
        assert_eq!(
            extract_json_object(response).as_deref(),
            Some("{\"passed\": true}")
        );
    }

    #[test]
    fn test_extract_none_without_object() {
        assert_eq!(extract_json_object("no structured content here"), None);
        assert_eq!(extract_json_object("{ broken"), None);
    }

    #[test]
    fn test_outer_brace_span() {
        assert_eq!(outer_brace_span("x {a} y {b} z"), Some("{a} y {b}"));
        assert_eq!(outer_brace_span("nothing"), None);
    }
}
