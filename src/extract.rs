//! Extraction of JSON payloads from loosely structured model responses.
//!
//! Providers hand back anything from clean JSON to fenced markdown to prose
//! with an object buried in the middle. This module reduces all of that to a
//! closed set of shapes and returns the first candidate that parses. A miss
//! is a normal outcome — the caller treats `None` as a fallback trigger, not
//! an error.

use serde_json::{Map, Value};

/// A successfully extracted JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

impl Extracted {
    pub fn into_value(self) -> Value {
        match self {
            Extracted::Object(map) => Value::Object(map),
            Extracted::Array(items) => Value::Array(items),
        }
    }

    /// Fetch a field when this is an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Extracted::Object(map) => map.get(key),
            Extracted::Array(_) => None,
        }
    }
}

/// Return the first candidate that yields a JSON object or array.
///
/// Per candidate, in order: strip markdown fences and trim, attempt a direct
/// parse, then scan for the first balanced `{...}` / `[...]` span and retry.
pub fn extract_payload(candidates: &[&str]) -> Option<Extracted> {
    candidates.iter().find_map(|c| extract_one(c))
}

fn extract_one(raw: &str) -> Option<Extracted> {
    let stripped = strip_fences(raw.trim());

    if let Ok(v) = serde_json::from_str::<Value>(stripped) {
        if let Some(e) = tag(v) {
            return Some(e);
        }
    }

    let span = find_embedded_json(stripped)?;
    serde_json::from_str::<Value>(span).ok().and_then(tag)
}

/// Scalars and nulls are not payloads.
fn tag(v: Value) -> Option<Extracted> {
    match v {
        Value::Object(map) => Some(Extracted::Object(map)),
        Value::Array(items) => Some(Extracted::Array(items)),
        _ => None,
    }
}

/// Strip a leading ```json / ``` fence line and a trailing ``` fence.
fn strip_fences(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Drop the info string ("json", "JSON", or empty) up to the first newline.
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => return s,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Find the first balanced object or array span, respecting JSON strings and
/// escapes so braces inside string values are not counted.
fn find_embedded_json(s: &str) -> Option<&str> {
    let start = s.find(['{', '['])?;
    let tail = &s[start..];

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in tail.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&tail[..i + c.len_utf8()]);
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
    fn pure_object_passes_through() {
        let e = extract_payload(&[r#"{"scores": []}"#]).unwrap();
        assert_eq!(e.into_value(), json!({"scores": []}));
    }

    #[test]
    fn pure_array_passes_through() {
        let e = extract_payload(&[r#"[{"axis_key": "a"}]"#]).unwrap();
        assert!(matches!(e, Extracted::Array(ref v) if v.len() == 1));
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let raw = "```json\n{\"scores\": [{\"axis_key\": \"a\"}]}\n```";
        let e = extract_payload(&[raw]).unwrap();
        assert!(e.get("scores").is_some());
    }

    #[test]
    fn bare_fence_without_info_string() {
        let raw = "```\n{\"reply\": \"ok\"}\n```";
        let e = extract_payload(&[raw]).unwrap();
        assert_eq!(e.get("reply"), Some(&json!("ok")));
    }

    #[test]
    fn object_embedded_in_prose() {
        let raw = r#"Here is the revised radar: {"reply": "done", "radar": {"axes": []}} hope it helps"#;
        let e = extract_payload(&[raw]).unwrap();
        assert_eq!(e.get("reply"), Some(&json!("done")));
    }

    #[test]
    fn braces_inside_strings_do_not_break_scan() {
        let raw = r#"note: {"reply": "use {curly} braces", "n": 1} end"#;
        let e = extract_payload(&[raw]).unwrap();
        assert_eq!(e.get("reply"), Some(&json!("use {curly} braces")));
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let raw = r#"{"reply": "she said \"hi\""}"#;
        let e = extract_payload(&[raw]).unwrap();
        assert_eq!(e.get("reply"), Some(&json!(r#"she said "hi""#)));
    }

    #[test]
    fn scalars_and_garbage_yield_none() {
        assert!(extract_payload(&["42"]).is_none());
        assert!(extract_payload(&["\"just a string\""]).is_none());
        assert!(extract_payload(&["no json here at all"]).is_none());
        assert!(extract_payload(&["{truncated: "]).is_none());
        assert!(extract_payload(&[]).is_none());
    }

    #[test]
    fn first_parsing_candidate_wins() {
        let e = extract_payload(&["not json", r#"{"winner": 1}"#, r#"{"loser": 2}"#]).unwrap();
        assert_eq!(e.get("winner"), Some(&json!(1)));
    }

    #[test]
    fn embedded_array_in_prose() {
        let raw = r#"Scores follow: [{"axis_key": "a", "score_0_100": 70}] as requested"#;
        let e = extract_payload(&[raw]).unwrap();
        assert!(matches!(e, Extracted::Array(_)));
    }
}
