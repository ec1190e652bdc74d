//! Grounded question answering.
//!
//! The deterministic core is lexical: pull key terms out of the question,
//! search the chunk index, and return snippets or a fixed not-found reason.
//! When an LLM provider is configured the snippet result may be upgraded to
//! a cited answer, but only if every citation's quote re-verifies against
//! actual chunk text.

use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::warn;

use crate::llm::{prompts, LlmProvider};
use crate::search::{self, strip_possessive, SearchHit};
use crate::spans::find_fuzzy_span;

pub const NOT_FOUND_REASON: &str = "Answer not found in the indexed manuscript text.";

const ASK_STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "could", "did", "do", "does", "for", "from", "had", "has",
    "have", "in", "is", "it", "of", "on", "or", "s", "that", "the", "their", "there", "they",
    "to", "was", "were", "with",
];

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub chunk_id: String,
    pub quote: String,
    pub quote_start: i64,
    pub quote_end: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AskResult {
    Snippets { snippets: Vec<SearchHit> },
    Answer {
        answer: String,
        confidence: f64,
        citations: Vec<Citation>,
    },
    NotFound { reason: String },
}

fn prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:tell me about|what|where|who|whom|when|why|how|which|is|are|was|were|does|do|did|can|could|will|would)\b\s*",
        )
        .expect("prefix pattern is valid")
    })
}

/// Strip a leading question-word run ("what color are", "tell me about")
/// and the trailing question mark before key-term extraction.
fn strip_question_prefix(question: &str) -> String {
    let re = prefix_pattern();
    let mut current = question.trim().trim_end_matches('?').to_string();
    loop {
        let stripped = re.replace(&current, "").to_string();
        if stripped == current {
            return current;
        }
        current = stripped;
    }
}

/// Key terms: prefix-stripped question tokens, possessive tails dropped,
/// minus a second stopword pass.
pub fn key_terms(question: &str) -> Vec<String> {
    strip_question_prefix(question)
        .split_whitespace()
        .map(|t| {
            let cleaned: String = t
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '\'')
                .collect();
            strip_possessive(&cleaned).to_string()
        })
        .filter(|t| !t.is_empty() && !ASK_STOPWORDS.contains(&t.to_lowercase().as_str()))
        .collect()
}

/// Deterministic lexical path: key terms first, full question as fallback.
pub async fn ask_question(
    pool: &SqlitePool,
    project_id: &str,
    question: &str,
    limit: i64,
) -> Result<AskResult> {
    let terms = key_terms(question);
    let mut hits = if terms.is_empty() {
        Vec::new()
    } else {
        search::search_chunks(pool, &terms.join(" "), limit, Some(project_id)).await?
    };
    if hits.is_empty() {
        hits = search::search_chunks(pool, question, limit, Some(project_id)).await?;
    }

    if hits.is_empty() {
        Ok(AskResult::NotFound {
            reason: NOT_FOUND_REASON.to_string(),
        })
    } else {
        Ok(AskResult::Snippets { snippets: hits })
    }
}

#[derive(Debug, Deserialize)]
struct GroundedAnswer {
    answer: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    citations: Vec<GroundedCitation>,
}

#[derive(Debug, Deserialize)]
struct GroundedCitation {
    chunk_id: String,
    quote: String,
}

/// Ask with an optional LLM upgrade. Provider absence or failure, schema
/// mismatch, or any unverifiable citation all fall back to the snippet
/// result; the lexical path is never degraded by the provider.
pub async fn ask_question_grounded(
    pool: &SqlitePool,
    project_id: &str,
    question: &str,
    limit: i64,
    provider: &dyn LlmProvider,
) -> Result<AskResult> {
    let lexical = ask_question(pool, project_id, question, limit).await?;
    let AskResult::Snippets { snippets } = &lexical else {
        return Ok(lexical);
    };

    let request = prompts::grounded_answer_request(question, snippets);
    let output = match provider.complete_json(request).await {
        Ok(output) => output,
        Err(err) => {
            warn!(error = %err, "grounded answer unavailable, returning snippets");
            return Ok(lexical);
        }
    };
    let parsed: GroundedAnswer = match serde_json::from_value(output.json) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(error = %err, "grounded answer did not match schema");
            return Ok(lexical);
        }
    };
    if parsed.answer.trim().is_empty() || parsed.citations.is_empty() {
        return Ok(lexical);
    }

    // Every citation must re-verify against current chunk text.
    let mut citations = Vec::with_capacity(parsed.citations.len());
    for citation in &parsed.citations {
        let Some(hit) = snippets.iter().find(|h| h.chunk_id == citation.chunk_id) else {
            warn!(chunk_id = %citation.chunk_id, "citation references an unretrieved chunk");
            return Ok(lexical);
        };
        let Some(span) = find_fuzzy_span(&hit.text, &citation.quote) else {
            warn!(chunk_id = %citation.chunk_id, "citation quote failed verification");
            return Ok(lexical);
        };
        citations.push(Citation {
            chunk_id: citation.chunk_id.clone(),
            quote: hit.text[span.start..span.end].to_string(),
            quote_start: span.start as i64,
            quote_end: span.end as i64,
        });
    }

    Ok(AskResult::Answer {
        answer: parsed.answer,
        confidence: parsed.confidence.clamp(0.0, 1.0),
        citations,
    })
}
