//! Prompt pack for the three structured-completion tasks.
//!
//! Every prompt carries the same rule blocks: respond with strict JSON,
//! quote the manuscript verbatim, never invent facts, never write prose for
//! the author.

use serde_json::json;

use crate::models::ChunkRow;
use crate::search::SearchHit;

use super::JsonRequest;

pub const STRICT_JSON_RULE: &str =
    "Respond with a single JSON document matching the provided schema. No prose, no markdown fences, no commentary.";

pub const EVIDENCE_RULE: &str =
    "Every claim must include a short verbatim quote copied exactly from the provided text, including punctuation. Quotes that do not appear in the text will be discarded.";

pub const NO_INVENTION_RULE: &str =
    "Only state facts the text explicitly supports. If the text does not answer, say so. Never guess, never fill gaps from genre convention.";

pub const NO_GHOSTWRITING_RULE: &str =
    "You are an editorial assistant, not a co-author. Never produce new manuscript prose, rewrites, or suggested wording.";

fn system_prompt(task: &str) -> String {
    format!(
        "{task}\n\n{STRICT_JSON_RULE}\n{EVIDENCE_RULE}\n{NO_INVENTION_RULE}\n{NO_GHOSTWRITING_RULE}"
    )
}

/// Entity/claim extraction over a batch of chunks.
pub fn extraction_request(chunks: &[ChunkRow]) -> JsonRequest {
    let mut user = String::from(
        "Extract story entities and atomic factual claims from the manuscript excerpts below. \
         Each excerpt is labelled with its chunk id; cite the chunk id your quote comes from.\n",
    );
    for chunk in chunks {
        user.push_str(&format!("\n[chunk {}]\n{}\n", chunk.id, chunk.text));
    }

    JsonRequest {
        schema_name: "canon_extraction".to_string(),
        system_prompt: system_prompt(
            "You extract canon facts (characters, locations, rules, artifacts) from fiction manuscripts.",
        ),
        user_prompt: user,
        json_schema: json!({
            "type": "object",
            "required": ["entities", "claims"],
            "properties": {
                "entities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["name", "entity_type"],
                        "properties": {
                            "name": { "type": "string" },
                            "entity_type": { "type": "string" },
                            "aliases": { "type": "array", "items": { "type": "string" } }
                        }
                    }
                },
                "claims": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["entity", "field", "value", "quote", "chunk_id"],
                        "properties": {
                            "entity": { "type": "string" },
                            "field": { "type": "string" },
                            "value": {},
                            "confidence": { "type": "number" },
                            "quote": { "type": "string" },
                            "chunk_id": { "type": "string" }
                        }
                    }
                }
            }
        }),
        temperature: 0.0,
        max_tokens: 2048,
    }
}

/// POV/setting classification for one scene.
pub fn scene_metadata_request(scene_text: &str) -> JsonRequest {
    JsonRequest {
        schema_name: "scene_metadata".to_string(),
        system_prompt: system_prompt(
            "You classify narrative point of view and setting for one scene of a fiction manuscript.",
        ),
        user_prompt: format!(
            "Classify the scene below. pov_mode is one of first, third_limited, omniscient, \
             epistolary, unknown. Include a verbatim quote supporting the POV call.\n\n{scene_text}"
        ),
        json_schema: json!({
            "type": "object",
            "required": ["pov_mode"],
            "properties": {
                "pov_mode": { "type": "string" },
                "pov_character": { "type": "string" },
                "pov_confidence": { "type": "number" },
                "setting": { "type": "string" },
                "setting_confidence": { "type": "number" },
                "time_context": { "type": "string" },
                "quote": { "type": "string" }
            }
        }),
        temperature: 0.0,
        max_tokens: 512,
    }
}

/// Grounded Q&A over retrieved snippets.
pub fn grounded_answer_request(question: &str, hits: &[SearchHit]) -> JsonRequest {
    let mut user = format!(
        "Answer the question using only the manuscript excerpts below. Cite every supporting \
         quote with its chunk id. If the excerpts do not answer the question, return an empty \
         answer.\n\nQuestion: {question}\n"
    );
    for hit in hits {
        user.push_str(&format!("\n[chunk {}]\n{}\n", hit.chunk_id, hit.text));
    }

    JsonRequest {
        schema_name: "grounded_answer".to_string(),
        system_prompt: system_prompt(
            "You answer questions about a fiction manuscript strictly from provided excerpts.",
        ),
        user_prompt: user,
        json_schema: json!({
            "type": "object",
            "required": ["answer", "citations"],
            "properties": {
                "answer": { "type": "string" },
                "confidence": { "type": "number" },
                "citations": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["chunk_id", "quote"],
                        "properties": {
                            "chunk_id": { "type": "string" },
                            "quote": { "type": "string" }
                        }
                    }
                }
            }
        }),
        temperature: 0.0,
        max_tokens: 1024,
    }
}
