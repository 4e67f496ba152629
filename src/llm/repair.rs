//! Structural repair of LM output (text to text).
//!
//! Repair never invents content. It only removes wrapping (code fences,
//! surrounding prose), drops trailing commas, escapes quotes and raw newlines
//! that sit inside string values, and closes strings, arrays and objects that
//! were cut off mid-response. Whether the result is acceptable is decided
//! afterwards by parsing and shape validation.

/// Strip a surrounding markdown code fence, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Slice from the first `{` or `[` to its matching close, or to the end of
/// the text when the value was truncated.
pub fn extract_json_span(text: &str) -> &str {
    let Some(start) = text.find(['{', '[']) else {
        return text.trim();
    };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &text[start..start + offset + ch.len_utf8()];
                }
            }
            _ => {}
        }
    }
    text[start..].trim_end()
}

/// Best-effort structural repair of a JSON document.
pub fn repair(raw: &str) -> String {
    let span = extract_json_span(strip_code_fences(raw));
    let chars: Vec<char> = span.chars().collect();
    let mut out = String::with_capacity(span.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if in_string {
            match ch {
                '\\' => {
                    out.push(ch);
                    if let Some(next) = chars.get(i + 1) {
                        out.push(*next);
                        i += 1;
                    }
                }
                '"' => {
                    if closes_string(&chars, i + 1) {
                        in_string = false;
                        out.push('"');
                    } else {
                        out.push_str("\\\"");
                    }
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(ch),
            }
            i += 1;
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '{' => {
                stack.push('}');
                out.push(ch);
            }
            '[' => {
                stack.push(']');
                out.push(ch);
            }
            '}' | ']' => {
                trim_dangling(&mut out);
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
                out.push(ch);
            }
            ',' => {
                if !matches!(next_significant(&chars, i + 1), Some('}') | Some(']') | None) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
        i += 1;
    }

    if in_string {
        out.push('"');
    }
    trim_dangling(&mut out);
    while let Some(close) = stack.pop() {
        out.push(close);
    }
    out
}

/// A quote ends a string when the next significant character is structural.
fn closes_string(chars: &[char], from: usize) -> bool {
    matches!(
        next_significant(chars, from),
        None | Some(',') | Some('}') | Some(']') | Some(':')
    )
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars[from.min(chars.len())..]
        .iter()
        .copied()
        .find(|ch| !ch.is_whitespace())
}

/// Drop a trailing comma, and complete a key left without a value.
fn trim_dangling(out: &mut String) {
    loop {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        if out.ends_with(',') {
            out.pop();
            continue;
        }
        if out.ends_with(':') {
            out.push_str("null");
        }
        break;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn repaired(raw: &str) -> Value {
        serde_json::from_str(&repair(raw)).expect("repaired text parses")
    }

    #[test]
    fn trailing_comma_in_object() {
        assert_eq!(repaired("{\"score\": 3,}"), json!({"score": 3}));
    }

    #[test]
    fn trailing_comma_in_array() {
        assert_eq!(repaired("{\"a\": [1, 2, ]}"), json!({"a": [1, 2]}));
    }

    #[test]
    fn code_fence_and_prose_are_removed() {
        let raw = "Here is the result:\n```json\n{\"ok\": true}\n```\nThanks!";
        assert_eq!(repaired(raw), json!({"ok": true}));
        assert_eq!(repaired("Sure. {\"ok\": true} Hope this helps."), json!({"ok": true}));
    }

    #[test]
    fn unescaped_interior_quotes() {
        let raw = r#"{"rationale": "the plan says "grow" twice", "score": 2}"#;
        assert_eq!(
            repaired(raw),
            json!({"rationale": "the plan says \"grow\" twice", "score": 2})
        );
    }

    #[test]
    fn raw_newline_inside_string() {
        assert_eq!(repaired("{\"text\": \"line one\nline two\"}"), json!({"text": "line one\nline two"}));
    }

    #[test]
    fn truncated_string_and_braces_are_closed() {
        let raw = r#"{"items": [{"item": "a", "score": 4}, {"item": "b", "rationale": "cut of"#;
        assert_eq!(
            repaired(raw),
            json!({"items": [{"item": "a", "score": 4}, {"item": "b", "rationale": "cut of"}]})
        );
    }

    #[test]
    fn truncated_after_key() {
        assert_eq!(repaired("{\"summary\":"), json!({"summary": null}));
    }

    #[test]
    fn valid_json_is_unchanged() {
        let raw = r#"{"a": {"b": [1, "x, y", {"c": "}"}]}}"#;
        assert_eq!(repair(raw), raw);
    }

    #[test]
    fn plain_text_stays_unparseable() {
        let text = repair("not json at all");
        assert!(serde_json::from_str::<Value>(&text).is_err());
    }

    #[test]
    fn strip_code_fences_without_language() {
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
    }
}
