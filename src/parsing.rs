//! Noise stripping for raw generator output.
//!
//! Models wrap their answer in all kinds of formatting: `<think>` blocks,
//! markdown fences, a trailing prose description, and the completion
//! sentinel. These helpers peel that away so the validator only ever sees
//! the candidate record itself.

use serde::de::IgnoredAny;

/// Token the generator emits to mark its final answer for an attempt.
pub const SENTINEL: &str = "DONE";

/// A raw candidate with its formatting noise removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedCandidate {
    /// The JSON object text if one was found, otherwise the remaining text.
    pub body: String,
    /// Whether the completion sentinel appeared outside the record.
    pub sentinel_seen: bool,
    /// Extracted `<think>` content, if any.
    pub thinking: Option<String>,
}

/// Extract `<think>...</think>` blocks from a response (DeepSeek R1 style).
///
/// Returns `(thinking_content, cleaned_text)` where `cleaned_text` has the
/// thinking block removed and is trimmed.
pub fn extract_thinking(text: &str) -> (Option<String>, String) {
    let think_start = "<think>";
    let think_end = "</think>";

    if let Some(start_idx) = text.find(think_start) {
        if let Some(end_idx) = text.find(think_end) {
            if end_idx > start_idx {
                let thinking = text[start_idx + think_start.len()..end_idx]
                    .trim()
                    .to_string();
                let mut cleaned = String::new();
                cleaned.push_str(&text[..start_idx]);
                cleaned.push_str(&text[end_idx + think_end.len()..]);
                let thinking = if thinking.is_empty() {
                    None
                } else {
                    Some(thinking)
                };
                return (thinking, cleaned.trim().to_string());
            }
        }
    }

    (None, text.trim().to_string())
}

/// Remove markdown code fence markers, keeping their content.
///
/// Recognizes `` ```json ``, `` ```JSON `` and bare `` ``` ``.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
}

/// Locate the record object in `text`.
///
/// Top-level `{` spans are tried in turn and the first one that parses as
/// JSON wins, so stray braces in surrounding prose are skipped. If no span
/// parses, the first balanced one is returned so the caller sees the real
/// syntax error. Braces inside JSON string literals are ignored. Returns the
/// byte range of the object.
pub fn find_json_object(text: &str) -> Option<(usize, usize)> {
    let mut first_balanced = None;
    let mut resume = 0;

    for (start, _) in text.match_indices('{') {
        // Objects nested in a span that already failed are not candidates.
        if start < resume {
            continue;
        }
        let Some(end) = balanced_end(&text[start..]).map(|len| start + len) else {
            continue;
        };
        if serde_json::from_str::<IgnoredAny>(&text[start..end]).is_ok() {
            return Some((start, end));
        }
        first_balanced.get_or_insert((start, end));
        resume = end;
    }

    first_balanced
}

/// Length of the balanced object opening at the start of `text`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
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
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset + 1);
                }
            }
            _ => {}
        }
    }

    None
}

/// Whether `sentinel` occurs in `text` as a standalone word.
pub fn contains_sentinel(text: &str, sentinel: &str) -> bool {
    text.match_indices(sentinel).any(|(idx, _)| {
        let before = text[..idx].chars().next_back();
        let after = text[idx + sentinel.len()..].chars().next();
        let boundary = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric());
        boundary(before) && boundary(after)
    })
}

/// Strip thinking blocks, fences, the sentinel and surrounding prose.
///
/// The sentinel is only looked for outside the record, so an event called
/// "DONE deal" does not count as a completion marker.
pub fn clean_candidate(raw: &str, sentinel: &str) -> CleanedCandidate {
    let (thinking, text) = extract_thinking(raw);
    let text = strip_code_fences(&text);

    match find_json_object(&text) {
        Some((start, end)) if !text[..start].trim_end().ends_with('[') => {
            let outside = format!("{} {}", &text[..start], &text[end..]);
            CleanedCandidate {
                body: text[start..end].to_string(),
                sentinel_seen: contains_sentinel(&outside, sentinel),
                thinking,
            }
        }
        Some((start, _)) => {
            // The record is an array element: hand back the whole array so
            // validation rejects it.
            let open = text[..start].trim_end().len() - 1;
            CleanedCandidate {
                body: text[open..].replace(sentinel, "").trim().to_string(),
                sentinel_seen: contains_sentinel(&text, sentinel),
                thinking,
            }
        }
        None => {
            let sentinel_seen = contains_sentinel(&text, sentinel);
            CleanedCandidate {
                body: text.replace(sentinel, "").trim().to_string(),
                sentinel_seen,
                thinking,
            }
        }
    }
}
