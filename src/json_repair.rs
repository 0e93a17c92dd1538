//! JSON repair for streamed tool-call arguments.
//!
//! Providers deliver tool-call arguments as partial JSON fragments; a stream
//! cut short can leave the concatenated string with unbalanced braces or an
//! unterminated string literal. Repair closes the open structures before
//! parsing rather than failing the generation.

use serde_json::Value;

/// Detects if a JSON string is incomplete (unbalanced braces/quotes)
pub fn is_json_complete(json_str: &str) -> bool {
    let trimmed = json_str.trim();
    if trimmed.is_empty() {
        return false;
    }

    let mut brace_count = 0;
    let mut bracket_count = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in trimmed.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => brace_count += 1,
            '}' if !in_string => brace_count -= 1,
            '[' if !in_string => bracket_count += 1,
            ']' if !in_string => bracket_count -= 1,
            _ => {}
        }

        if brace_count < 0 || bracket_count < 0 {
            return false;
        }
    }

    !in_string && brace_count == 0 && bracket_count == 0
}

/// Attempts to repair incomplete JSON by closing unclosed structures
pub fn repair_json(json_str: &str) -> String {
    let trimmed = json_str.trim();
    if trimmed.is_empty() {
        return "{}".to_string();
    }

    let mut result = trimmed.to_string();
    let mut brace_count = 0;
    let mut bracket_count = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in trimmed.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => brace_count += 1,
            '}' if !in_string => brace_count -= 1,
            '[' if !in_string => bracket_count += 1,
            ']' if !in_string => bracket_count -= 1,
            _ => {}
        }
    }

    if in_string {
        result.push('"');
    }

    for _ in 0..bracket_count {
        result.push(']');
    }

    for _ in 0..brace_count {
        result.push('}');
    }

    result
}

/// Attempts to parse JSON, with fallback to repair and retry
pub fn parse_json_with_repair(json_str: &str) -> Result<Value, String> {
    if let Ok(value) = serde_json::from_str::<Value>(json_str) {
        return Ok(value);
    }

    // Balanced but still unparseable: closing structures cannot help.
    if is_json_complete(json_str) {
        return Err(format!(
            "JSON is structurally complete but invalid ({} chars)",
            json_str.len()
        ));
    }

    let repaired = repair_json(json_str);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => {
            tracing::debug!(
                "[JSON-REPAIR] Successfully repaired JSON: {} -> {} chars",
                json_str.len(),
                repaired.len()
            );
            Ok(value)
        }
        Err(e) => Err(format!(
            "Failed to parse JSON even after repair: {} (original: {} chars, repaired: {} chars)",
            e,
            json_str.len(),
            repaired.len()
        )),
    }
}

/// Decodes concatenated tool-call argument fragments into a JSON value. Falls
/// back to an empty object when the payload is unsalvageable; a bad argument
/// string must never abort the generation.
pub fn parse_tool_arguments(name: &str, raw: &str) -> Value {
    match parse_json_with_repair(raw) {
        Ok(value) => value,
        Err(reason) => {
            tracing::warn!(
                tool = name,
                %reason,
                "[JSON-REPAIR] tool arguments unparseable, substituting empty object"
            );
            serde_json::json!({})
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_json_complete_valid() {
        assert!(is_json_complete("{}"));
        assert!(is_json_complete(r#"{"key": "value"}"#));
        assert!(is_json_complete("[]"));
        assert!(is_json_complete(r#"[1, 2, 3]"#));
    }

    #[test]
    fn test_is_json_complete_incomplete() {
        assert!(!is_json_complete("{"));
        assert!(!is_json_complete(r#"{"key": "value""#));
        assert!(!is_json_complete("["));
        assert!(!is_json_complete(r#"[1, 2, 3"#));
    }

    #[test]
    fn test_is_json_complete_with_escape() {
        assert!(is_json_complete(r#"{"key": "val\"ue"}"#));
        assert!(!is_json_complete(r#"{"key": "val\"ue"#));
    }

    #[test]
    fn test_repair_json_unclosed_braces() {
        let repaired = repair_json(r#"{"key": "value""#);
        assert!(serde_json::from_str::<Value>(&repaired).is_ok());
    }

    #[test]
    fn test_repair_json_unclosed_string() {
        let repaired = repair_json(r#"{"key": "value"#);
        assert!(serde_json::from_str::<Value>(&repaired).is_ok());
    }

    #[test]
    fn test_parse_json_with_repair_empty() {
        let result = parse_json_with_repair("");
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_parse_json_with_repair_balanced_garbage_is_not_retried() {
        assert!(parse_json_with_repair(r#"{"a" "b"}"#).is_err());
    }

    #[test]
    fn test_parse_tool_arguments_truncated_stream() {
        let value = parse_tool_arguments("web_search", r#"{"query": "rust asy"#);
        assert_eq!(value["query"], "rust asy");
    }

    #[test]
    fn test_parse_tool_arguments_garbage_falls_back_to_empty_object() {
        let value = parse_tool_arguments("web_search", "}}not json{{");
        assert_eq!(value, serde_json::json!({}));
    }
}
