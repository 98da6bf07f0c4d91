//! Snippet extraction for search hits.
//!
//! All positions here are character offsets, not byte offsets.

/// Character offset of the first case-insensitive occurrence of `needle`.
pub fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    find_match(haystack, needle).map(|(pos, _)| pos)
}

/// Start offset and length in haystack characters of the first
/// case-insensitive match. The length can differ from the needle's
/// character count when lowercasing expands a character.
fn find_match(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    let needle: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return Some((0, 0));
    }

    let hay: Vec<char> = haystack.chars().collect();
    (0..hay.len()).find_map(|start| matches_at(&hay[start..], &needle).map(|len| (start, len)))
}

/// Number of haystack characters consumed when `hay` starts with `needle`.
fn matches_at(hay: &[char], needle: &[char]) -> Option<usize> {
    let mut remaining = needle.iter();
    for (consumed, c) in hay.iter().enumerate() {
        for lower in c.to_lowercase() {
            match remaining.next() {
                Some(n) if *n == lower => {}
                Some(_) => return None,
                None => return Some(consumed + 1),
            }
        }
        if remaining.as_slice().is_empty() {
            return Some(consumed + 1);
        }
    }
    None
}

/// Cut `context_chars` characters on each side of the first match of
/// `keyword`, marking truncated ends with `...`.
///
/// When the keyword cannot be located the first `2 * context_chars`
/// characters are returned instead.
pub fn extract_snippet(content: &str, keyword: &str, context_chars: usize) -> String {
    if content.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = content.chars().collect();

    let Some((pos, span)) = find_match(content, keyword) else {
        let window = context_chars.saturating_mul(2);
        return if chars.len() > window {
            let mut head: String = chars[..window].iter().collect();
            head.push_str("...");
            head
        } else {
            content.to_string()
        };
    };

    let start = pos.saturating_sub(context_chars);
    let end = pos
        .saturating_add(span)
        .saturating_add(context_chars)
        .min(chars.len());

    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.extend(&chars[start..end]);
    if end < chars.len() {
        snippet.push_str("...");
    }
    snippet
}
