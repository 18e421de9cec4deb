//! Helpers for pulling structured data out of LLM replies

use serde::de::DeserializeOwned;

/// Locate the first JSON object or array in `text`.
///
/// Handles fenced code blocks and prose before or after the payload. Returns
/// the raw JSON slice, not yet parsed.
pub fn extract_json(text: &str) -> Option<&str> {
    // A fence only counts when it opens before any bare JSON
    let first_open = text.find(['{', '[']);
    let body = match text.find("```") {
        Some(fence) if first_open.is_none_or(|open| fence < open) => {
            strip_code_fence(text).unwrap_or(text)
        }
        _ => text,
    };

    let start = body.find(['{', '['])?;
    let open = body[start..].chars().next()?;
    let close = if open == '{' { '}' } else { ']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in body[start..].char_indices() {
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
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Extract and deserialize the first JSON payload in `text`
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    extract_json(text).and_then(|raw| serde_json::from_str(raw).ok())
}

fn strip_code_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    // Skip the language tag line
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Truncate to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
