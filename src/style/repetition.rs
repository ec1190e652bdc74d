//! Repeated-phrase detection.
//!
//! Counts word n-grams (n = 1..3) project-wide and per scene, flags the ones
//! that recur past the configured thresholds, and anchors each finding to an
//! example span in a contributing chunk.

use std::collections::HashMap;

use serde::Serialize;

/// Grams made only of these words never get flagged; "of the" is not a tic.
const COMMON_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "had", "has", "he", "her",
    "his", "i", "in", "is", "it", "its", "of", "on", "or", "she", "that", "the", "their",
    "they", "to", "was", "were", "with", "you",
];

pub const MAX_RETAINED: usize = 50;
pub const MAX_ISSUES: usize = 10;

/// One retained n-gram with its counts and an anchor for evidence lookup.
#[derive(Debug, Clone, Serialize)]
pub struct NgramFinding {
    pub gram: String,
    pub total: usize,
    pub max_scene_count: usize,
    /// Chunk where an example occurrence can be located by substring search.
    pub example_chunk_id: String,
}

/// A chunk's tokens plus the scene it belongs to, if any.
pub struct ChunkTokens {
    pub chunk_id: String,
    pub scene_id: Option<String>,
    pub tokens: Vec<String>,
}

pub fn tokenize_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.to_lowercase()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '\'')
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn all_common(tokens: &[&str]) -> bool {
    tokens.iter().all(|t| COMMON_WORDS.contains(t))
}

/// Count n-grams across all chunks and keep those crossing either threshold.
/// Results are sorted by descending total and capped.
pub fn find_repetitions(
    chunks: &[ChunkTokens],
    project_threshold: usize,
    scene_threshold: usize,
) -> Vec<NgramFinding> {
    struct Counts {
        total: usize,
        per_scene: HashMap<String, usize>,
        example_chunk_id: String,
    }
    let mut grams: HashMap<String, Counts> = HashMap::new();

    for chunk in chunks {
        for n in 1..=3usize {
            if chunk.tokens.len() < n {
                continue;
            }
            for window in chunk.tokens.windows(n) {
                let parts: Vec<&str> = window.iter().map(|s| s.as_str()).collect();
                if all_common(&parts) {
                    continue;
                }
                let gram = parts.join(" ");
                let entry = grams.entry(gram).or_insert_with(|| Counts {
                    total: 0,
                    per_scene: HashMap::new(),
                    example_chunk_id: chunk.chunk_id.clone(),
                });
                entry.total += 1;
                if let Some(scene_id) = &chunk.scene_id {
                    *entry.per_scene.entry(scene_id.clone()).or_insert(0) += 1;
                }
            }
        }
    }

    let mut findings: Vec<NgramFinding> = grams
        .into_iter()
        .filter_map(|(gram, counts)| {
            let max_scene = counts.per_scene.values().copied().max().unwrap_or(0);
            if counts.total >= project_threshold || max_scene >= scene_threshold {
                Some(NgramFinding {
                    gram,
                    total: counts.total,
                    max_scene_count: max_scene,
                    example_chunk_id: counts.example_chunk_id,
                })
            } else {
                None
            }
        })
        .collect();

    findings.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.gram.cmp(&b.gram)));
    findings.truncate(MAX_RETAINED);
    findings
}
