//! Full-text search over chunk text.
//!
//! Natural-language questions make terrible FTS queries (all stopwords,
//! stray quote characters), so the raw input is sanitized into quoted terms
//! and every search runs a ladder of query attempts. A failing attempt is
//! logged and skipped; the caller only ever sees a result list.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "did", "do", "does", "for", "from",
    "had", "has", "have", "he", "her", "his", "how", "i", "in", "is", "it", "its", "of", "on",
    "or", "she", "that", "the", "their", "them", "then", "there", "they", "this", "to", "was",
    "we", "were", "what", "when", "where", "which", "who", "why", "will", "with", "you",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    And,
    Or,
}

/// Drop a possessive or contraction tail so "Lina's" matches the indexed
/// word "Lina" ("don't" becomes "don", which is how FTS tokenizes it too).
pub(crate) fn strip_possessive(token: &str) -> &str {
    let bytes = token.as_bytes();
    if bytes.len() >= 2
        && bytes[bytes.len() - 2] == b'\''
        && matches!(bytes[bytes.len() - 1], b's' | b't' | b'S' | b'T')
    {
        &token[..token.len() - 2]
    } else {
        token
    }
}

/// Build an FTS query from free text: split on whitespace, strip punctuation,
/// possessive tails, and stopwords, quote each surviving token. If filtering
/// removes every token the original tokens are quoted instead, so the query
/// is never empty for non-empty input.
pub fn sanitize_query(query: &str, join: JoinMode) -> String {
    let raw_tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| {
            let cleaned: String = t
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '\'')
                .collect();
            strip_possessive(&cleaned).to_string()
        })
        .filter(|t| !t.is_empty())
        .collect();

    let filtered: Vec<&String> = raw_tokens
        .iter()
        .filter(|t| !STOPWORDS.contains(&t.to_lowercase().as_str()))
        .collect();

    let chosen: Vec<&String> = if filtered.is_empty() {
        raw_tokens.iter().collect()
    } else {
        filtered
    };

    let joiner = match join {
        JoinMode::And => " AND ",
        JoinMode::Or => " OR ",
    };
    chosen
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(joiner)
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: String,
    pub ordinal: i64,
    pub text: String,
    pub snippet: String,
    pub score: f64,
}

/// Ordered, de-duplicated query attempts. Raw queries containing quote
/// characters go sanitized-first since the raw form is likely malformed FTS
/// syntax; otherwise raw-first preserves user-written operators. An OR
/// fallback always closes the ladder.
fn build_attempts(raw: &str) -> Vec<String> {
    let sanitized = sanitize_query(raw, JoinMode::And);
    let has_quotes = raw.contains('"') || raw.contains('\u{201c}') || raw.contains('\u{201d}');

    let mut attempts: Vec<String> = Vec::new();
    let mut push = |q: String| {
        if !q.trim().is_empty() && !attempts.contains(&q) {
            attempts.push(q);
        }
    };
    if has_quotes {
        push(sanitized.clone());
        push(raw.to_string());
    } else {
        push(raw.to_string());
        push(sanitized.clone());
    }
    push(sanitize_query(raw, JoinMode::Or));
    attempts
}

/// Search chunk text, best match first. Exhausting every attempt without a
/// hit returns an empty list, never an error for query syntax.
pub async fn search_chunks(
    pool: &SqlitePool,
    query: &str,
    limit: i64,
    project_id: Option<&str>,
) -> Result<Vec<SearchHit>> {
    for attempt in build_attempts(query) {
        match run_attempt(pool, &attempt, limit, project_id).await {
            Ok(hits) if !hits.is_empty() => return Ok(hits),
            Ok(_) => {}
            Err(err) => {
                warn!(attempt = %attempt, error = %err, "search attempt failed, trying next tier");
            }
        }
    }
    Ok(Vec::new())
}

async fn run_attempt(
    pool: &SqlitePool,
    query: &str,
    limit: i64,
    project_id: Option<&str>,
) -> Result<Vec<SearchHit>> {
    let hits = match project_id {
        Some(project_id) => {
            sqlx::query_as::<_, SearchHit>(
                r#"
                SELECT c.id AS chunk_id, c.document_id, c.ordinal, c.text,
                       snippet(chunk_fts, 1, '[', ']', '...', 12) AS snippet,
                       bm25(chunk_fts) AS score
                FROM chunk_fts
                JOIN chunk c ON c.id = chunk_fts.chunk_id
                JOIN document d ON d.id = c.document_id
                WHERE chunk_fts MATCH ? AND d.project_id = ?
                ORDER BY score
                LIMIT ?
                "#,
            )
            .bind(query)
            .bind(project_id)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, SearchHit>(
                r#"
                SELECT c.id AS chunk_id, c.document_id, c.ordinal, c.text,
                       snippet(chunk_fts, 1, '[', ']', '...', 12) AS snippet,
                       bm25(chunk_fts) AS score
                FROM chunk_fts
                JOIN chunk c ON c.id = chunk_fts.chunk_id
                WHERE chunk_fts MATCH ?
                ORDER BY score
                LIMIT ?
                "#,
            )
            .bind(query)
            .bind(limit)
            .fetch_all(pool)
            .await?
        }
    };
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_stopwords_and_punctuation() {
        let q = sanitize_query("What color are Lina's eyes?", JoinMode::And);
        assert_eq!(q, "\"color\" AND \"Lina\" AND \"eyes\"");
    }

    #[test]
    fn possessive_and_contraction_tails_are_stripped() {
        assert_eq!(
            sanitize_query("Lina's lantern", JoinMode::And),
            "\"Lina\" AND \"lantern\""
        );
        assert_eq!(
            sanitize_query("don't panic", JoinMode::And),
            "\"don\" AND \"panic\""
        );
    }

    #[test]
    fn all_stopword_query_falls_back_to_original_tokens() {
        let q = sanitize_query("is it the", JoinMode::And);
        assert_eq!(q, "\"is\" AND \"it\" AND \"the\"");
    }

    #[test]
    fn or_mode_joins_with_or() {
        let q = sanitize_query("green eyes", JoinMode::Or);
        assert_eq!(q, "\"green\" OR \"eyes\"");
    }

    #[test]
    fn empty_query_sanitizes_to_empty() {
        assert_eq!(sanitize_query("  ", JoinMode::And), "");
    }

    #[test]
    fn quoted_raw_query_tries_sanitized_first() {
        let attempts = build_attempts("\"unbalanced");
        assert!(attempts[0].starts_with('"'));
        assert!(attempts.contains(&"\"unbalanced".to_string()));
    }

    #[test]
    fn attempts_are_deduplicated_and_end_with_or_fallback() {
        let attempts = build_attempts("green eyes");
        assert_eq!(attempts.last().unwrap(), "\"green\" OR \"eyes\"");
        let unique: std::collections::HashSet<&String> = attempts.iter().collect();
        assert_eq!(unique.len(), attempts.len());
    }
}
