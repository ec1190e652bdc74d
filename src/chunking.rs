//! Deterministic paragraph-boundary chunker.
//!
//! Splits document text into a total, non-overlapping partition: every byte
//! of the input belongs to exactly one chunk, and slicing the original text
//! with a chunk's offsets reproduces the chunk text exactly. Evidence spans
//! and claim provenance depend on this, so the boundary policy must never
//! change between runs on the same input.
//!
//! Boundary policy: paragraphs end after a blank-line run (`\n\n` plus any
//! further newlines, which stay attached to the preceding paragraph).
//! Paragraphs are packed greedily into chunks of at most [`MAX_CHUNK_CHARS`]
//! bytes; a single oversized paragraph is hard-split at the nearest newline
//! or space boundary.

use sha2::{Digest, Sha256};

/// Maximum chunk size in bytes. Roughly 300-400 words of prose.
pub const MAX_CHUNK_CHARS: usize = 1600;

/// One slice of the partition, before it is assigned a database identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSlice {
    pub ordinal: i64,
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub text_hash: String,
}

/// Partition `text` into chunks. Empty input produces zero chunks.
pub fn build_chunks(text: &str) -> Vec<ChunkSlice> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<ChunkSlice> = Vec::new();
    let mut chunk_start = 0usize;

    for (seg_start, seg_end) in paragraph_segments(text) {
        let seg_len = seg_end - seg_start;

        if seg_len > MAX_CHUNK_CHARS {
            if chunk_start < seg_start {
                push_chunk(&mut chunks, text, chunk_start, seg_start);
            }
            let mut piece_start = seg_start;
            while piece_start < seg_end {
                let piece_end = split_point(text, piece_start, seg_end);
                push_chunk(&mut chunks, text, piece_start, piece_end);
                piece_start = piece_end;
            }
            chunk_start = seg_end;
            continue;
        }

        if seg_end - chunk_start > MAX_CHUNK_CHARS && chunk_start < seg_start {
            push_chunk(&mut chunks, text, chunk_start, seg_start);
            chunk_start = seg_start;
        }
    }

    if chunk_start < text.len() {
        push_chunk(&mut chunks, text, chunk_start, text.len());
    }

    chunks
}

fn push_chunk(chunks: &mut Vec<ChunkSlice>, text: &str, start: usize, end: usize) {
    let slice = &text[start..end];
    let mut hasher = Sha256::new();
    hasher.update(slice.as_bytes());
    chunks.push(ChunkSlice {
        ordinal: chunks.len() as i64,
        text: slice.to_string(),
        start,
        end,
        text_hash: format!("{:x}", hasher.finalize()),
    });
}

/// Paragraph byte ranges covering the whole text. A paragraph ends after a
/// blank-line run; the run belongs to the paragraph before it.
fn paragraph_segments(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i + 1 < bytes.len() {
        if bytes[i] == b'\n' && bytes[i + 1] == b'\n' {
            let mut end = i + 2;
            while end < bytes.len() && bytes[end] == b'\n' {
                end += 1;
            }
            segments.push((start, end));
            start = end;
            i = end;
        } else {
            i += 1;
        }
    }

    if start < bytes.len() {
        segments.push((start, bytes.len()));
    }

    segments
}

/// Pick a cut point at most `MAX_CHUNK_CHARS` bytes after `start`, preferring
/// the last newline or space inside the window, and always landing on a char
/// boundary.
fn split_point(text: &str, start: usize, seg_end: usize) -> usize {
    let hard_limit = seg_end.min(start + MAX_CHUNK_CHARS);
    if hard_limit == seg_end {
        return seg_end;
    }

    let window = &text.as_bytes()[start..hard_limit];
    let soft = window
        .iter()
        .rposition(|&b| b == b'\n' || b == b' ')
        .map(|pos| start + pos + 1);

    let mut cut = match soft {
        // Guard against zero-length pieces when the only break is at start
        Some(p) if p > start => p,
        _ => hard_limit,
    };
    while cut > start && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    if cut == start {
        // Pathological all-multibyte window: step forward to a boundary
        cut = hard_limit;
        while cut < seg_end && !text.is_char_boundary(cut) {
            cut += 1;
        }
    }
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_partition(text: &str, chunks: &[ChunkSlice]) {
        let mut cursor = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i as i64, "ordinals contiguous from 0");
            assert_eq!(chunk.start, cursor, "no gaps or overlaps");
            assert_eq!(&text[chunk.start..chunk.end], chunk.text, "slice-exact");
            cursor = chunk.end;
        }
        assert_eq!(cursor, text.len(), "partition is total");
    }

    #[test]
    fn empty_text_produces_zero_chunks() {
        assert!(build_chunks("").is_empty());
    }

    #[test]
    fn small_text_single_chunk() {
        let chunks = build_chunks("Hello, world!");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_partition("Hello, world!", &chunks);
    }

    #[test]
    fn deterministic_for_same_input() {
        let text = "# Heading\n\nFirst paragraph line one.\nSecond line.\n\nSecond paragraph here.";
        let first = build_chunks(text);
        let second = build_chunks(text);
        assert_eq!(first, second);
    }

    #[test]
    fn chunks_match_slice_boundaries() {
        let text = "# Heading\n\nFirst paragraph line one.\nSecond line.\n\nSecond paragraph here.";
        assert_partition(text, &build_chunks(text));
    }

    #[test]
    fn long_document_splits_on_paragraphs() {
        let text = (0..80)
            .map(|i| format!("Paragraph number {} with a little padding text.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = build_chunks(&text);
        assert!(chunks.len() > 1);
        assert_partition(&text, &chunks);
        for chunk in &chunks {
            assert!(chunk.text.len() <= MAX_CHUNK_CHARS);
        }
    }

    #[test]
    fn oversized_paragraph_is_hard_split_exactly() {
        let text = "word ".repeat(800);
        let chunks = build_chunks(&text);
        assert!(chunks.len() > 1);
        assert_partition(&text, &chunks);
    }

    #[test]
    fn multibyte_text_stays_on_char_boundaries() {
        let text = "héllo wörld — “quotes” and ellipsis… ".repeat(60);
        let chunks = build_chunks(&text);
        assert_partition(&text, &chunks);
    }

    #[test]
    fn trailing_blank_lines_stay_attached() {
        let text = "First.\n\n\nSecond.";
        let chunks = build_chunks(text);
        assert_partition(text, &chunks);
        assert_eq!(chunks.len(), 1, "small paragraphs pack into one chunk");
    }

    #[test]
    fn hash_changes_with_content() {
        let a = build_chunks("The compass pointed north.");
        let b = build_chunks("The compass pointed south.");
        assert_ne!(a[0].text_hash, b[0].text_hash);
    }
}
