//! JSON extraction + repair (§4.4).
//!
//! `completeWithJsonRetry` parses model output permissively: plain JSON, a
//! fenced ```json block, a bare fenced block, or the first bracketed
//! object/array found in free text, in that priority order.

use serde_json::Value;

/// Attempts each extraction strategy in spec order; returns the first one
/// that parses as valid JSON.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    if let Some(v) = extract_fenced(text, "json") {
        return Some(v);
    }

    if let Some(v) = extract_fenced(text, "") {
        return Some(v);
    }

    if let Some(v) = extract_bracketed(text, '{', '}') {
        return Some(v);
    }

    extract_bracketed(text, '[', ']')
}

fn extract_fenced(text: &str, lang: &str) -> Option<Value> {
    let marker = format!("```{lang}");
    let start = text.find(&marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    serde_json::from_str(rest[..end].trim()).ok()
}

fn extract_bracketed(text: &str, open: char, close: char) -> Option<Value> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct RepairStats {
    pub attempts: u64,
    pub successes: u64,
}
