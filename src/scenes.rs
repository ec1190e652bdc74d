//! Scene boundary detection and scene building.
//!
//! A scene is a contiguous run of chunks delimited by structural markers:
//! Markdown headings, "Chapter" lines, or `***`/`---` separator lines.
//! Detection rules are small strategy objects so the pattern set can grow
//! without touching the pipeline.

use regex::Regex;

use crate::models::ChunkRow;

/// What a boundary rule found on one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Boundary {
    /// Heading or chapter line; carries the scene title when non-empty.
    Titled(Option<String>),
    /// Bare separator (`***`, `---`).
    Untitled,
}

/// One line-level detection strategy.
pub trait BoundaryRule: Send + Sync {
    fn detect(&self, line: &str) -> Option<Boundary>;
}

struct HeadingRule(Regex);
struct ChapterRule(Regex);
struct MarkerRule(Regex);

impl BoundaryRule for HeadingRule {
    fn detect(&self, line: &str) -> Option<Boundary> {
        self.0
            .captures(line)
            .map(|caps| Boundary::Titled(normalize_title(&caps[1])))
    }
}

impl BoundaryRule for ChapterRule {
    fn detect(&self, line: &str) -> Option<Boundary> {
        self.0.captures(line).map(|caps| {
            let rest = normalize_title(caps.get(1).map(|m| m.as_str()).unwrap_or(""));
            // "Chapter" with nothing after it titles the scene with the line
            Boundary::Titled(rest.or_else(|| normalize_title(line)))
        })
    }
}

impl BoundaryRule for MarkerRule {
    fn detect(&self, line: &str) -> Option<Boundary> {
        if self.0.is_match(line) {
            Some(Boundary::Untitled)
        } else {
            None
        }
    }
}

fn normalize_title(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Compiled rule set. Rules are tried in order; the first match on a line
/// wins.
pub struct SceneDetector {
    rules: Vec<Box<dyn BoundaryRule>>,
}

impl Default for SceneDetector {
    fn default() -> Self {
        let rules: Vec<Box<dyn BoundaryRule>> = vec![
            Box::new(HeadingRule(
                Regex::new(r"^\s*#{1,6}\s+(.+)$").expect("heading pattern"),
            )),
            Box::new(ChapterRule(
                Regex::new(r"(?i)^\s*chapter\b\s*(.*)$").expect("chapter pattern"),
            )),
            Box::new(MarkerRule(
                Regex::new(r"^\s*(\*\s*\*\s*\*|---+)\s*$").expect("marker pattern"),
            )),
        ];
        Self { rules }
    }
}

/// Boundary at a chunk ordinal, with an optional title.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneBoundary {
    pub ordinal: i64,
    pub title: Option<String>,
}

/// Scene span ready for insertion, before it gets a database identity.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSpan {
    pub ordinal: i64,
    pub start_chunk_id: String,
    pub end_chunk_id: String,
    pub start_char: i64,
    pub end_char: i64,
    pub title: Option<String>,
}

impl SceneDetector {
    /// Scan each chunk's lines for boundaries. At most one boundary per
    /// chunk: a titled boundary ends the scan for that chunk, while a bare
    /// marker registers only if nothing registered yet (later titled lines
    /// in the same chunk may still replace it).
    pub fn detect_boundaries(&self, chunks: &[ChunkRow]) -> Vec<SceneBoundary> {
        let mut boundaries: Vec<SceneBoundary> = Vec::new();

        for chunk in chunks {
            let mut found: Option<Option<String>> = None;
            'lines: for line in chunk.text.split('\n') {
                for rule in &self.rules {
                    match rule.detect(line) {
                        Some(Boundary::Titled(title)) => {
                            found = Some(title);
                            break 'lines;
                        }
                        Some(Boundary::Untitled) => {
                            if found.is_none() {
                                found = Some(None);
                            }
                            break;
                        }
                        None => {}
                    }
                }
            }
            if let Some(title) = found {
                boundaries.push(SceneBoundary {
                    ordinal: chunk.ordinal,
                    title,
                });
            }
        }

        boundaries
    }

    /// Convert boundaries into contiguous scene spans. Ordinal 0 is an
    /// implicit scene start; each later boundary begins a new scene ending
    /// at the chunk before the next boundary.
    pub fn build_scenes(&self, chunks: &[ChunkRow]) -> Vec<SceneSpan> {
        if chunks.is_empty() {
            return Vec::new();
        }

        let boundaries = self.detect_boundaries(chunks);
        let title_at = |ordinal: i64| -> Option<String> {
            boundaries
                .iter()
                .find(|b| b.ordinal == ordinal)
                .and_then(|b| b.title.clone())
        };
        let later_ordinals: Vec<i64> = boundaries
            .iter()
            .map(|b| b.ordinal)
            .filter(|&o| o > 0)
            .collect();

        let mut scenes: Vec<SceneSpan> = Vec::new();
        let mut start_ordinal: i64 = 0;
        let mut current_title = title_at(0);

        for boundary in later_ordinals {
            if boundary <= start_ordinal {
                continue;
            }
            let start_chunk = &chunks[start_ordinal as usize];
            let end_chunk = &chunks[(boundary - 1) as usize];
            scenes.push(SceneSpan {
                ordinal: scenes.len() as i64,
                start_chunk_id: start_chunk.id.clone(),
                end_chunk_id: end_chunk.id.clone(),
                start_char: start_chunk.start_char,
                end_char: end_chunk.end_char,
                title: current_title.take(),
            });
            start_ordinal = boundary;
            current_title = title_at(boundary);
        }

        let final_start = &chunks[start_ordinal as usize];
        let final_end = &chunks[chunks.len() - 1];
        scenes.push(SceneSpan {
            ordinal: scenes.len() as i64,
            start_chunk_id: final_start.id.clone(),
            end_chunk_id: final_end.id.clone(),
            start_char: final_start.start_char,
            end_char: final_end.end_char,
            title: current_title,
        });

        scenes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, ordinal: i64, text: &str, start: i64, end: i64) -> ChunkRow {
        ChunkRow {
            id: id.to_string(),
            document_id: "doc".to_string(),
            ordinal,
            text: text.to_string(),
            text_hash: "hash".to_string(),
            start_char: start,
            end_char: end,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn marker_starts_a_new_scene() {
        let chunks = vec![
            chunk("c1", 0, "Intro text", 0, 10),
            chunk("c2", 1, "***\nNext scene text", 11, 30),
        ];
        let scenes = SceneDetector::default().build_scenes(&chunks);
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].start_chunk_id, "c1");
        assert_eq!(scenes[0].end_chunk_id, "c1");
        assert_eq!(scenes[1].start_chunk_id, "c2");
        assert_eq!(scenes[1].end_chunk_id, "c2");
    }

    #[test]
    fn heading_text_becomes_scene_title() {
        let chunks = vec![chunk("c1", 0, "# Prologue\nThe opening.", 0, 22)];
        let scenes = SceneDetector::default().build_scenes(&chunks);
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].title.as_deref(), Some("Prologue"));
    }

    #[test]
    fn chapter_line_titles_with_remainder() {
        let chunks = vec![
            chunk("c1", 0, "Chapter One\nIt began at dusk.", 0, 28),
            chunk("c2", 1, "chapter\nUntitled chapter body.", 29, 60),
        ];
        let boundaries = SceneDetector::default().detect_boundaries(&chunks);
        assert_eq!(boundaries.len(), 2);
        assert_eq!(boundaries[0].title.as_deref(), Some("One"));
        // Bare "chapter" falls back to the full line
        assert_eq!(boundaries[1].title.as_deref(), Some("chapter"));
    }

    #[test]
    fn only_first_marker_per_chunk_registers() {
        let chunks = vec![
            chunk("c1", 0, "Start.", 0, 6),
            chunk("c2", 1, "***\nmiddle\n***\nmore", 7, 26),
        ];
        let boundaries = SceneDetector::default().detect_boundaries(&chunks);
        assert_eq!(boundaries.len(), 1);
        assert_eq!(boundaries[0].ordinal, 1);
        assert_eq!(boundaries[0].title, None);
    }

    #[test]
    fn hyphen_run_is_a_marker() {
        let chunks = vec![
            chunk("c1", 0, "One.", 0, 4),
            chunk("c2", 1, "----\nTwo.", 5, 14),
        ];
        let scenes = SceneDetector::default().build_scenes(&chunks);
        assert_eq!(scenes.len(), 2);
    }

    #[test]
    fn boundary_at_ordinal_zero_only_yields_single_titled_scene() {
        let chunks = vec![chunk("c1", 0, "## Dawn\nFirst light.", 0, 19)];
        let scenes = SceneDetector::default().build_scenes(&chunks);
        assert_eq!(scenes.len(), 1);
        assert_eq!(scenes[0].title.as_deref(), Some("Dawn"));
    }

    #[test]
    fn empty_chunk_list_produces_zero_scenes() {
        assert!(SceneDetector::default().build_scenes(&[]).is_empty());
    }

    #[test]
    fn untitled_middle_scene_keeps_following_title_separate() {
        let chunks = vec![
            chunk("c1", 0, "# First\nalpha", 0, 12),
            chunk("c2", 1, "continuation", 13, 25),
            chunk("c3", 2, "***\nbeta", 26, 33),
        ];
        let scenes = SceneDetector::default().build_scenes(&chunks);
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].title.as_deref(), Some("First"));
        assert_eq!(scenes[0].end_chunk_id, "c2");
        assert_eq!(scenes[1].title, None);
    }
}
