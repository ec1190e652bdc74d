//! Evidence span location.
//!
//! Binds a claimed quote back to byte offsets in chunk text. Exact match
//! first; the fuzzy path tolerates whitespace drift (line re-wraps) and then
//! minor token drift (stem-prefix tolerance), because model-returned quotes
//! are rarely byte-perfect.

use regex::Regex;

/// Half-open byte range into a haystack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Minimum token-similarity score for the sliding-window tier.
const FUZZY_THRESHOLD: f64 = 0.75;

/// Literal substring search. Returns the first occurrence.
pub fn find_exact_span(haystack: &str, needle: &str) -> Option<Span> {
    if needle.is_empty() {
        return None;
    }
    haystack.find(needle).map(|idx| Span {
        start: idx,
        end: idx + needle.len(),
    })
}

/// Case-insensitive literal search. Offsets are byte offsets into `haystack`
/// itself, never into a case-folded copy (folding can change byte lengths).
pub fn find_exact_span_ignore_case(haystack: &str, needle: &str) -> Option<Span> {
    if needle.is_empty() {
        return None;
    }
    let pattern = Regex::new(&format!("(?i){}", regex::escape(needle))).ok()?;
    pattern.find(haystack).map(|m| Span {
        start: m.start(),
        end: m.end(),
    })
}

/// Three-tier fuzzy search: exact, whitespace-flexible regex, then
/// sliding-window token similarity. Returns `None` when no tier clears its
/// bar.
pub fn find_fuzzy_span(haystack: &str, needle: &str) -> Option<Span> {
    if let Some(span) = find_exact_span(haystack, needle) {
        return Some(span);
    }

    let collapsed: Vec<&str> = needle.split_whitespace().collect();
    if collapsed.is_empty() {
        return None;
    }

    // Tier 2: the needle's tokens joined by \s+ absorbs line-wrap changes
    let pattern = collapsed
        .iter()
        .map(|part| regex::escape(part))
        .collect::<Vec<_>>()
        .join(r"\s+");
    if let Ok(re) = Regex::new(&pattern) {
        if let Some(m) = re.find(haystack) {
            return Some(Span {
                start: m.start(),
                end: m.end(),
            });
        }
    }

    // Tier 3: token-similarity window
    let needle_tokens: Vec<String> = collapsed.iter().map(|t| normalize_token(t)).collect();
    let token_count = needle_tokens.len();

    let haystack_tokens: Vec<(String, usize, usize)> = tokenize_with_offsets(haystack);
    if haystack_tokens.len() < token_count {
        return None;
    }

    let mut best_score = 0.0f64;
    let mut best_span: Option<Span> = None;

    for i in 0..=(haystack_tokens.len() - token_count) {
        let mut matches = 0usize;
        for j in 0..token_count {
            let hay = &haystack_tokens[i + j].0;
            let nee = &needle_tokens[j];
            if hay.is_empty() || nee.is_empty() {
                continue;
            }
            if hay == nee || hay.starts_with(nee.as_str()) || nee.starts_with(hay.as_str()) {
                matches += 1;
            }
        }
        let score = matches as f64 / token_count as f64;
        if score > best_score {
            best_score = score;
            best_span = Some(Span {
                start: haystack_tokens[i].1,
                end: haystack_tokens[i + token_count - 1].2,
            });
        }
    }

    if best_score >= FUZZY_THRESHOLD {
        best_span
    } else {
        None
    }
}

/// Render a quote span with surrounding context: up to `context` bytes each
/// side (clamped to char boundaries), the quote itself bracket-marked, and
/// ellipses where text was cut.
pub fn build_excerpt(text: &str, start: usize, end: usize, context: usize) -> String {
    let start = floor_char_boundary(text, start.min(text.len()));
    let end = floor_char_boundary(text, end.min(text.len())).max(start);

    let prefix_start = floor_char_boundary(text, start.saturating_sub(context));
    let suffix_end = ceil_char_boundary(text, (end + context).min(text.len()));

    let mut out = String::new();
    if prefix_start > 0 {
        out.push('…');
    }
    out.push_str(&text[prefix_start..start]);
    out.push('[');
    out.push_str(&text[start..end]);
    out.push(']');
    out.push_str(&text[end..suffix_end]);
    if suffix_end < text.len() {
        out.push('…');
    }
    out
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Lowercase, alphanumeric-plus-apostrophe comparison form.
fn normalize_token(token: &str) -> String {
    token
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '\'')
        .collect()
}

fn tokenize_with_offsets(text: &str) -> Vec<(String, usize, usize)> {
    let mut tokens = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        tokens.push((normalize_token(&text[start..i]), start, i));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_span_finds_first_occurrence() {
        let span = find_exact_span("Mira stepped into the workshop.", "stepped into").unwrap();
        assert_eq!(span, Span { start: 5, end: 17 });
    }

    #[test]
    fn exact_span_misses_cleanly() {
        assert!(find_exact_span("nothing here", "absent").is_none());
        assert!(find_exact_span("nothing here", "").is_none());
    }

    #[test]
    fn ignore_case_span_indexes_the_original_text() {
        let text = "She said HELLO twice.";
        let span = find_exact_span_ignore_case(text, "hello").unwrap();
        assert_eq!(&text[span.start..span.end], "HELLO");
    }

    #[test]
    fn ignore_case_span_survives_length_changing_lowercase() {
        // "İ" lowercases to a longer byte sequence, so offsets computed
        // against a lowercased copy would not slice this text cleanly.
        let text = "İstanbul slept. The fog rolled in and the fog stayed.";
        let span = find_exact_span_ignore_case(text, "the fog").unwrap();
        assert_eq!(&text[span.start..span.end], "The fog");
    }

    #[test]
    fn fuzzy_span_prefers_exact_match() {
        let span = find_fuzzy_span("The needle twitched north.", "needle twitched").unwrap();
        assert_eq!(&"The needle twitched north."[span.start..span.end], "needle twitched");
    }

    #[test]
    fn fuzzy_span_tolerates_inserted_blank_lines() {
        let haystack = "She opened\n\nthe heavy door slowly.";
        let span = find_fuzzy_span(haystack, "opened the heavy door").unwrap();
        let found = &haystack[span.start..span.end];
        assert!(found.contains("heavy door"));
    }

    #[test]
    fn fuzzy_span_token_similarity_allows_stem_prefixes() {
        let haystack = "The needle twitched north.";
        let span = find_fuzzy_span(haystack, "needle twitch north").unwrap();
        let found = &haystack[span.start..span.end];
        assert!(found.contains("needle twitched north"));
    }

    #[test]
    fn fuzzy_span_rejects_unrelated_text() {
        assert!(find_fuzzy_span("A completely different sentence.", "needle twitch north").is_none());
    }

    #[test]
    fn excerpt_brackets_the_quote_with_context() {
        let text = "Mira stepped into the workshop and lit the lamp.";
        let excerpt = build_excerpt(text, 5, 17, 60);
        assert_eq!(excerpt, "Mira [stepped into] the workshop and lit the lamp.");
    }

    #[test]
    fn excerpt_marks_cut_text_with_ellipses() {
        let text = "x".repeat(200);
        let excerpt = build_excerpt(&text, 100, 110, 10);
        assert!(excerpt.starts_with('…'));
        assert!(excerpt.ends_with('…'));
    }

    #[test]
    fn excerpt_clamps_to_char_boundaries() {
        let text = "éééééééééé";
        // offsets that land mid-char must not panic
        let _ = build_excerpt(text, 3, 7, 2);
    }

    #[test]
    fn fuzzy_span_handles_empty_needle() {
        assert!(find_fuzzy_span("Some text.", "").is_none());
        assert!(find_fuzzy_span("Some text.", "   ").is_none());
    }
}
