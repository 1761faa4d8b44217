//! Balanced-brace JSON extraction from LLM output.
//!
//! Models regularly wrap JSON in prose or markdown fences. Rather than trust
//! the whole response to `serde_json`, this scans for the first `{` and
//! matches braces with string-literal and escape awareness, then parses only
//! that slice.

use tracing::warn;

/// Extract the outermost balanced JSON object from `text`.
///
/// Returns an empty object when no balanced `{...}` exists or the candidate
/// fails to parse.
pub fn extract_json_object(text: &str) -> serde_json::Value {
    match find_balanced_object(text) {
        Some(candidate) => match serde_json::from_str(candidate) {
            Ok(value) => value,
            Err(e) => {
                warn!("JSON parse error in extracted object: {}", e);
                serde_json::Value::Object(Default::default())
            }
        },
        None => {
            warn!("No balanced JSON object found in response");
            serde_json::Value::Object(Default::default())
        }
    }
}

/// Locate the first balanced `{...}` slice, honoring string literals.
fn find_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
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
            b'{' => depth += 1,
            b'}' => {
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
    use serde_json::json;

    #[test]
    fn test_plain_object() {
        let value = extract_json_object(r#"{"a": 1, "b": [1, 2]}"#);
        assert_eq!(value, json!({"a": 1, "b": [1, 2]}));
    }

    #[test]
    fn test_object_surrounded_by_prose() {
        let text = r#"Here is the extracted data:

{"account": {"value": "1234", "confidence": 0.9}}

Let me know if you need anything else."#;
        let value = extract_json_object(text);
        assert_eq!(value["account"]["value"], "1234");
    }

    #[test]
    fn test_nested_objects() {
        let text = r#"noise {"outer": {"inner": {"deep": true}}} trailing"#;
        let value = extract_json_object(text);
        assert_eq!(value["outer"]["inner"]["deep"], true);
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let text = r#"{"desc": "literal } brace { here", "n": 2}"#;
        let value = extract_json_object(text);
        assert_eq!(value["desc"], "literal } brace { here");
        assert_eq!(value["n"], 2);
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let text = r#"{"desc": "he said \"}\" loudly", "ok": true}"#;
        let value = extract_json_object(text);
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_no_object_yields_empty_mapping() {
        let value = extract_json_object("no json here at all");
        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_unbalanced_yields_empty_mapping() {
        let value = extract_json_object(r#"{"never": "closed""#);
        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_invalid_json_in_balanced_braces() {
        let value = extract_json_object("{not valid json}");
        assert_eq!(value, json!({}));
    }

    #[test]
    fn test_first_object_wins() {
        let value = extract_json_object(r#"{"first": 1} {"second": 2}"#);
        assert_eq!(value, json!({"first": 1}));
    }

    #[test]
    fn test_markdown_fenced_json() {
        let text = "```json\n{\"fenced\": true}\n```";
        let value = extract_json_object(text);
        assert_eq!(value["fenced"], true);
    }
}
