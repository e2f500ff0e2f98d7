//! Chunker (§4.7)
//!
//! Sentence-aware text splitting with overlap, sized for embedding inputs.
//! Targets ~256 tokens (~1024 chars), max ~512 tokens (~2048 chars), 2
//! sentences of overlap between consecutive chunks.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

const TARGET_CHARS: usize = 1024;
const MAX_CHARS: usize = 2048;
const OVERLAP_SENTENCES: usize = 2;
const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub parent_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
    pub token_estimate: usize,
    pub meta: Map<String, Value>,
}

pub struct ChunkOptions {
    pub parent_id: String,
    pub meta: Map<String, Value>,
}

pub fn chunk(text: &str, opts: ChunkOptions) -> Vec<Chunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let sentences = split_sentences(text);
    let bodies: Vec<String> = if sentences.len() <= 1 {
        split_by_chars(text)
    } else {
        group_sentences(&sentences)
    };

    let bodies = merge_short_tail(bodies);

    let total_chunks = bodies.len();
    bodies
        .into_iter()
        .enumerate()
        .map(|(i, body)| Chunk {
            chunk_id: format!("{}-chunk-{i}", opts.parent_id),
            parent_id: opts.parent_id.clone(),
            chunk_index: i,
            total_chunks,
            token_estimate: body.len() / CHARS_PER_TOKEN.max(1),
            text: body,
            meta: opts.meta.clone(),
        })
        .collect()
}

fn split_sentences(text: &str) -> Vec<String> {
    let re = Regex::new(r"(?s)(.*?[.!?])(\s+|$)").unwrap();
    let mut sentences: Vec<String> = re
        .captures_iter(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    // Regex leaves a possible trailing fragment with no terminal punctuation.
    let consumed: usize = sentences.iter().map(|s| s.len()).sum();
    if consumed < text.trim().len() {
        let remainder = text
            .trim()
            .chars()
            .skip(sentences.iter().map(|s| s.chars().count()).sum())
            .collect::<String>();
        let remainder = remainder.trim();
        if !remainder.is_empty() {
            sentences.push(remainder.to_string());
        }
    }
    sentences
}

fn group_sentences(sentences: &[String]) -> Vec<String> {
    let mut bodies = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut current_len = 0usize;
    let mut i = 0;

    while i < sentences.len() {
        let s = &sentences[i];
        if current_len + s.len() + 1 > MAX_CHARS && !current.is_empty() {
            bodies.push(current.join(" "));
            let overlap_start = current.len().saturating_sub(OVERLAP_SENTENCES);
            current = current[overlap_start..].to_vec();
            current_len = current.iter().map(|s| s.len() + 1).sum();
        }
        current.push(s.clone());
        current_len += s.len() + 1;
        if current_len >= TARGET_CHARS {
            bodies.push(current.join(" "));
            let overlap_start = current.len().saturating_sub(OVERLAP_SENTENCES);
            current = current[overlap_start..].to_vec();
            current_len = current.iter().map(|s| s.len() + 1).sum();
        }
        i += 1;
    }
    if !current.is_empty() {
        bodies.push(current.join(" "));
    }
    bodies
}

/// Nearest byte index <= `index` that lands on a UTF-8 character boundary,
/// so a fixed-width window never slices through a multi-byte character
/// (CJK/accented text with no ASCII sentence punctuation hits this path).
fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut idx = index;
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Character-based fallback for text with <= 1 sentence: split at the
/// nearest space before `TARGET_CHARS`.
fn split_by_chars(text: &str) -> Vec<String> {
    let text = text.trim();
    let mut bodies = Vec::new();
    let mut rest = text;
    while rest.len() > TARGET_CHARS {
        let boundary = floor_char_boundary(rest, TARGET_CHARS);
        let window = &rest[..boundary];
        let split_at = window.rfind(' ').unwrap_or(boundary);
        let split_at = floor_char_boundary(rest, split_at.max(1));
        let (head, tail) = rest.split_at(split_at);
        bodies.push(head.trim().to_string());
        rest = tail.trim_start();
    }
    if !rest.is_empty() {
        bodies.push(rest.to_string());
    }
    bodies
}

/// If the trailing remainder is < 30% of target and merging keeps the last
/// chunk <= max, merge it into the previous chunk; else keep separately.
fn merge_short_tail(mut bodies: Vec<String>) -> Vec<String> {
    if bodies.len() < 2 {
        return bodies;
    }
    let last_len = bodies.last().unwrap().len();
    if (last_len as f64) < 0.3 * TARGET_CHARS as f64 {
        let prev_len = bodies[bodies.len() - 2].len();
        if prev_len + 1 + last_len <= MAX_CHARS {
            let last = bodies.pop().unwrap();
            let prev = bodies.last_mut().unwrap();
            prev.push(' ');
            prev.push_str(&last);
        }
    }
    bodies
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ChunkOptions {
        ChunkOptions {
            parent_id: "doc-1".to_string(),
            meta: Map::new(),
        }
    }

    #[test]
    fn empty_text_produces_no_chunks() {
        assert!(chunk("", opts()).is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunks = chunk("This is one sentence. And a second one.", opts());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].total_chunks, 1);
    }

    #[test]
    fn long_text_without_punctuation_splits_on_char_boundary() {
        let text = "word ".repeat(600);
        let chunks = chunk(&text, opts());
        assert!(chunks.len() >= 2);
        let max_expected = (text.len() as f64 / TARGET_CHARS as f64).ceil() as usize + 1;
        assert!(chunks.len() <= max_expected);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join(" ");
        let non_ws_original: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let non_ws_joined: String = joined.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(non_ws_original, non_ws_joined);
    }

    #[test]
    fn chunks_carry_meta_and_ids() {
        let mut meta = Map::new();
        meta.insert("sellerId".to_string(), Value::String("S1".to_string()));
        let chunks = chunk("One sentence here.", ChunkOptions { parent_id: "doc-2".to_string(), meta });
        assert_eq!(chunks[0].parent_id, "doc-2");
        assert_eq!(chunks[0].meta["sellerId"], "S1");
    }

    #[test]
    fn long_text_without_ascii_punctuation_never_panics_on_a_char_boundary() {
        // No '.', '!', or '?' anywhere, so this falls into split_by_chars;
        // every multi-byte character must survive a mid-window slice intact.
        let text = "セラーが新しいアカウントを登録しました。その後すぐに複数の取引を試みました。".repeat(40);
        let chunks = chunk(&text, opts());
        assert!(chunks.len() >= 2);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>().join("");
        let non_ws_original: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let non_ws_joined: String = joined.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(non_ws_original, non_ws_joined);
    }

    #[test]
    fn many_sentences_create_overlap_between_chunks() {
        let sentence = "The seller registered a new account today. ";
        let text = sentence.repeat(80);
        let chunks = chunk(&text, opts());
        assert!(chunks.len() > 1);
    }
}
