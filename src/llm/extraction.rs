//! Applying extraction output to the claim graph.
//!
//! Model output is never trusted as-is: every quote is re-located in actual
//! chunk text with the fuzzy span locator before any claim or evidence row
//! is written. Claims whose quotes cannot be verified are dropped with a
//! warning, not persisted.

use anyhow::Result;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::warn;

use crate::models::{ChunkRow, ClaimStatus, ClaimValue, PovMode};
use crate::spans::find_fuzzy_span;
use crate::store::{self, NewClaim, SceneMetadataUpdate};

use super::{prompts, LlmProvider};

#[derive(Debug, Deserialize)]
pub struct ExtractionOutput {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub claims: Vec<ExtractedClaim>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractedClaim {
    pub entity: String,
    pub field: String,
    pub value: serde_json::Value,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub quote: String,
    pub chunk_id: String,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionApplied {
    pub entities: usize,
    pub claims: usize,
    pub dropped_quotes: usize,
}

/// Run extraction over a batch of chunks and persist the verified output.
/// Provider failure returns Ok(None); the caller records the stage as
/// skipped rather than failing the ingest.
pub async fn extract_and_apply(
    pool: &SqlitePool,
    project_id: &str,
    chunks: &[ChunkRow],
    provider: &dyn LlmProvider,
) -> Result<Option<ExtractionApplied>> {
    if chunks.is_empty() {
        return Ok(Some(ExtractionApplied::default()));
    }

    let output = match provider.complete_json(prompts::extraction_request(chunks)).await {
        Ok(output) => output,
        Err(err) => {
            warn!(error = %err, "extraction unavailable this cycle");
            return Ok(None);
        }
    };
    let parsed: ExtractionOutput = match serde_json::from_value(output.json) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(error = %err, "extraction output did not match schema");
            return Ok(None);
        }
    };

    Ok(Some(apply_extraction(pool, project_id, chunks, parsed).await?))
}

/// Persist parsed output. Separated from the provider call so tests can
/// exercise verification without a network.
pub async fn apply_extraction(
    pool: &SqlitePool,
    project_id: &str,
    chunks: &[ChunkRow],
    output: ExtractionOutput,
) -> Result<ExtractionApplied> {
    let mut applied = ExtractionApplied::default();

    for entity in &output.entities {
        if entity.name.trim().is_empty() {
            continue;
        }
        let row =
            store::get_or_create_entity(pool, project_id, &entity.entity_type, &entity.name)
                .await?;
        for alias in &entity.aliases {
            store::add_entity_alias(pool, &row.id, alias).await?;
        }
        applied.entities += 1;
    }

    for claim in &output.claims {
        let Some(chunk) = chunks.iter().find(|c| c.id == claim.chunk_id) else {
            warn!(chunk_id = %claim.chunk_id, "claim cites an unknown chunk, dropped");
            applied.dropped_quotes += 1;
            continue;
        };
        let Some(span) = find_fuzzy_span(&chunk.text, &claim.quote) else {
            warn!(
                chunk_id = %claim.chunk_id,
                field = %claim.field,
                "claim quote failed verification, dropped"
            );
            applied.dropped_quotes += 1;
            continue;
        };

        let entity =
            store::get_or_create_entity(pool, project_id, "character", &claim.entity).await?;
        let row = store::insert_claim(
            pool,
            NewClaim {
                entity_id: &entity.id,
                field: &claim.field,
                value: &ClaimValue::from_json(claim.value.clone()),
                status: ClaimStatus::Inferred,
                confidence: claim.confidence.clamp(0.0, 1.0),
                supersedes_claim_id: None,
            },
        )
        .await?;
        store::insert_claim_evidence(pool, &row.id, &chunk.id, span.start as i64, span.end as i64)
            .await?;
        applied.claims += 1;
    }

    Ok(applied)
}

#[derive(Debug, Deserialize)]
struct SceneClassification {
    pov_mode: String,
    #[serde(default)]
    pov_character: Option<String>,
    #[serde(default)]
    pov_confidence: f64,
    #[serde(default)]
    setting: Option<String>,
    #[serde(default)]
    setting_confidence: f64,
    #[serde(default)]
    time_context: Option<String>,
    #[serde(default)]
    quote: Option<String>,
}

/// Classify one scene's POV and setting. Metadata stays `unknown` when the
/// provider is unavailable or the output fails validation.
pub async fn classify_scene(
    pool: &SqlitePool,
    project_id: &str,
    scene_id: &str,
    scene_chunks: &[ChunkRow],
    provider: &dyn LlmProvider,
) -> Result<bool> {
    let text: String = scene_chunks.iter().map(|c| c.text.as_str()).collect();
    if text.trim().is_empty() {
        return Ok(false);
    }

    let output = match provider.complete_json(prompts::scene_metadata_request(&text)).await {
        Ok(output) => output,
        Err(err) => {
            warn!(scene_id, error = %err, "scene classification unavailable");
            return Ok(false);
        }
    };
    let parsed: SceneClassification = match serde_json::from_value(output.json) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(scene_id, error = %err, "scene classification did not match schema");
            return Ok(false);
        }
    };

    let pov_entity_id = match &parsed.pov_character {
        Some(name) if !name.trim().is_empty() => Some(
            store::get_or_create_entity(pool, project_id, "character", name)
                .await?
                .id,
        ),
        _ => None,
    };
    let setting_entity_id = match &parsed.setting {
        Some(name) if !name.trim().is_empty() => Some(
            store::get_or_create_entity(pool, project_id, "location", name)
                .await?
                .id,
        ),
        _ => None,
    };

    store::update_scene_metadata(
        pool,
        scene_id,
        SceneMetadataUpdate {
            pov_mode: PovMode::parse(&parsed.pov_mode),
            pov_entity_id: pov_entity_id.as_deref(),
            pov_confidence: parsed.pov_confidence.clamp(0.0, 1.0),
            setting_entity_id: setting_entity_id.as_deref(),
            setting_text: parsed.setting.as_deref(),
            setting_confidence: parsed.setting_confidence.clamp(0.0, 1.0),
            time_context_text: parsed.time_context.as_deref(),
        },
    )
    .await?;

    // Supporting quote becomes scene evidence only if it verifies.
    if let Some(quote) = parsed.quote.as_deref().filter(|q| !q.trim().is_empty()) {
        for chunk in scene_chunks {
            if let Some(span) = find_fuzzy_span(&chunk.text, quote) {
                store::insert_scene_evidence(
                    pool,
                    scene_id,
                    &chunk.id,
                    span.start as i64,
                    span.end as i64,
                )
                .await?;
                break;
            }
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (SqlitePool, String, Vec<ChunkRow>) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let project = store::get_or_create_project(&pool, "/tmp/p", "p").await.unwrap();
        let doc = store::get_or_create_document(&pool, &project.id, "draft.md", "md")
            .await
            .unwrap();
        let slices = crate::chunking::build_chunks("Lina had bright green eyes and a quick temper.");
        store::replace_chunks(&pool, &doc.id, &slices).await.unwrap();
        let chunks = store::list_chunks_for_document(&pool, &doc.id).await.unwrap();
        (pool, project.id, chunks)
    }

    #[tokio::test]
    async fn verified_claims_are_persisted_with_evidence() {
        let (pool, project_id, chunks) = setup().await;
        let output = ExtractionOutput {
            entities: vec![ExtractedEntity {
                name: "Lina".to_string(),
                entity_type: "character".to_string(),
                aliases: vec!["Li".to_string()],
            }],
            claims: vec![ExtractedClaim {
                entity: "Lina".to_string(),
                field: "eye_color".to_string(),
                value: serde_json::json!("green"),
                confidence: 0.9,
                quote: "bright green eyes".to_string(),
                chunk_id: chunks[0].id.clone(),
            }],
        };

        let applied = apply_extraction(&pool, &project_id, &chunks, output).await.unwrap();
        assert_eq!(applied.claims, 1);
        assert_eq!(applied.dropped_quotes, 0);

        let entity = store::find_entity_by_name(&pool, &project_id, "Li")
            .await
            .unwrap()
            .expect("alias lookup");
        let claims = store::list_claims_for_entity(&pool, &entity.id).await.unwrap();
        assert_eq!(claims.len(), 1);
        let evidence = store::list_claim_evidence(&pool, &claims[0].id).await.unwrap();
        assert_eq!(evidence.len(), 1);
        let quoted = &chunks[0].text
            [evidence[0].quote_start as usize..evidence[0].quote_end as usize];
        assert_eq!(quoted, "bright green eyes");
    }

    #[tokio::test]
    async fn unverifiable_quote_is_dropped_entirely() {
        let (pool, project_id, chunks) = setup().await;
        let output = ExtractionOutput {
            entities: vec![],
            claims: vec![ExtractedClaim {
                entity: "Lina".to_string(),
                field: "eye_color".to_string(),
                value: serde_json::json!("violet"),
                confidence: 0.9,
                quote: "her violet gaze sparkled".to_string(),
                chunk_id: chunks[0].id.clone(),
            }],
        };

        let applied = apply_extraction(&pool, &project_id, &chunks, output).await.unwrap();
        assert_eq!(applied.claims, 0);
        assert_eq!(applied.dropped_quotes, 1);
    }

    #[tokio::test]
    async fn quote_with_whitespace_drift_still_verifies() {
        let (pool, project_id, chunks) = setup().await;
        let output = ExtractionOutput {
            entities: vec![],
            claims: vec![ExtractedClaim {
                entity: "Lina".to_string(),
                field: "eye_color".to_string(),
                value: serde_json::json!("green"),
                confidence: 0.9,
                quote: "bright  green\neyes".to_string(),
                chunk_id: chunks[0].id.clone(),
            }],
        };

        let applied = apply_extraction(&pool, &project_id, &chunks, output).await.unwrap();
        assert_eq!(applied.claims, 1);
    }
}
