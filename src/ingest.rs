//! Per-document ingestion pipeline.
//!
//! One run: read the file, diff-replace chunks, rebuild scenes, re-run the
//! analyzers, then optionally invoke extraction. Each stage records its
//! outcome in processing_state under the run's snapshot id, so a failed run
//! is visible per stage. Extraction failure never fails the run.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ProjectConfig;
use crate::continuity;
use crate::llm::extraction::{self, ExtractionApplied};
use crate::llm::LlmProvider;
use crate::scenes::SceneDetector;
use crate::store::{self, ChunkDiff};
use crate::style::{self, tone::LexiconTone, StyleSummary};

pub const STAGE_CHUNK: &str = "chunk";
pub const STAGE_SCENES: &str = "scenes";
pub const STAGE_ANALYZE: &str = "analyze";
pub const STAGE_EXTRACT: &str = "extract";

#[derive(Debug, Clone, serde::Serialize)]
pub struct IngestOutcome {
    pub document_id: String,
    pub snapshot_id: String,
    pub version: i64,
    pub chunks_kept: usize,
    pub chunks_added: usize,
    pub chunks_removed: usize,
    pub scene_count: usize,
    pub continuity_issues: usize,
    pub style: StyleSummary,
    pub extraction_claims: Option<usize>,
}

/// Ingest one document identified by its path relative to the project root.
pub async fn ingest_document(
    pool: &SqlitePool,
    cfg: &ProjectConfig,
    project_id: &str,
    root: &Path,
    rel_path: &str,
    provider: &dyn LlmProvider,
) -> Result<IngestOutcome> {
    let document = store::get_or_create_document(pool, project_id, rel_path, "md").await?;
    let snapshot_id = Uuid::new_v4().to_string();

    let diff = match chunk_stage(pool, root, rel_path, &document.id, &snapshot_id).await {
        Ok(diff) => diff,
        Err(err) => {
            return fail_stage(pool, project_id, &document.id, STAGE_CHUNK, &snapshot_id, err)
                .await;
        }
    };

    let scene_count = match scene_stage(pool, project_id, &document.id, &snapshot_id).await {
        Ok(count) => count,
        Err(err) => {
            return fail_stage(pool, project_id, &document.id, STAGE_SCENES, &snapshot_id, err)
                .await;
        }
    };

    let (continuity_issues, style_summary) =
        match analyze_stage(pool, cfg, project_id, &document.id, &snapshot_id).await {
            Ok(result) => result,
            Err(err) => {
                return fail_stage(
                    pool,
                    project_id,
                    &document.id,
                    STAGE_ANALYZE,
                    &snapshot_id,
                    err,
                )
                .await;
            }
        };

    let extraction = match extract_stage(
        pool,
        cfg,
        project_id,
        &document.id,
        &snapshot_id,
        provider,
    )
    .await
    {
        Ok(extraction) => extraction,
        Err(err) => {
            return fail_stage(
                pool,
                project_id,
                &document.id,
                STAGE_EXTRACT,
                &snapshot_id,
                err,
            )
            .await;
        }
    };

    // New claims from extraction must be visible in continuity results
    // without waiting for the next ingest.
    let continuity_issues = match &extraction {
        Some(applied) if applied.claims > 0 => {
            continuity::run_continuity(pool, project_id).await?
        }
        _ => continuity_issues,
    };

    let version = store::bump_document_version(pool, &document.id).await?;
    store::touch_project(pool, project_id).await?;
    store::log_event(
        pool,
        project_id,
        "info",
        "ingest_complete",
        &json!({
            "document_id": document.id,
            "path": rel_path,
            "snapshot_id": snapshot_id,
            "version": version,
            "kept": diff.kept,
            "added": diff.added,
            "removed": diff.removed,
        }),
    )
    .await?;
    info!(document_id = %document.id, path = rel_path, version, "ingest complete");

    Ok(IngestOutcome {
        document_id: document.id,
        snapshot_id,
        version,
        chunks_kept: diff.kept,
        chunks_added: diff.added,
        chunks_removed: diff.removed,
        scene_count,
        continuity_issues,
        style: style_summary,
        extraction_claims: extraction.map(|a| a.claims),
    })
}

async fn chunk_stage(
    pool: &SqlitePool,
    root: &Path,
    rel_path: &str,
    document_id: &str,
    snapshot_id: &str,
) -> Result<ChunkDiff> {
    store::upsert_processing_state(pool, document_id, STAGE_CHUNK, snapshot_id, "running", None)
        .await?;
    let full_path = root.join(rel_path);
    let text = std::fs::read_to_string(&full_path)
        .with_context(|| format!("Failed to read {}", full_path.display()))?;
    let slices = crate::chunking::build_chunks(&text);
    let diff = store::replace_chunks(pool, document_id, &slices).await?;
    store::upsert_processing_state(pool, document_id, STAGE_CHUNK, snapshot_id, "ok", None)
        .await?;
    Ok(diff)
}

async fn scene_stage(
    pool: &SqlitePool,
    project_id: &str,
    document_id: &str,
    snapshot_id: &str,
) -> Result<usize> {
    store::upsert_processing_state(pool, document_id, STAGE_SCENES, snapshot_id, "running", None)
        .await?;
    let chunks = store::list_chunks_for_document(pool, document_id).await?;
    let spans = SceneDetector::default().build_scenes(&chunks);
    let ids = store::replace_scenes_for_document(pool, project_id, document_id, &spans).await?;
    store::upsert_processing_state(pool, document_id, STAGE_SCENES, snapshot_id, "ok", None)
        .await?;
    Ok(ids.len())
}

async fn analyze_stage(
    pool: &SqlitePool,
    cfg: &ProjectConfig,
    project_id: &str,
    document_id: &str,
    snapshot_id: &str,
) -> Result<(usize, StyleSummary)> {
    store::upsert_processing_state(pool, document_id, STAGE_ANALYZE, snapshot_id, "running", None)
        .await?;
    // Stale-chunk deletion may have orphaned inferred claims; drop them
    // before the conflict scan so they cannot produce ghost issues.
    store::delete_orphaned_inferred_claims(pool, project_id).await?;
    let continuity_issues = continuity::run_continuity(pool, project_id).await?;
    let style_summary = style::run_style(pool, project_id, &cfg.style, &LexiconTone).await?;
    store::upsert_processing_state(pool, document_id, STAGE_ANALYZE, snapshot_id, "ok", None)
        .await?;
    Ok((continuity_issues, style_summary))
}

async fn extract_stage(
    pool: &SqlitePool,
    cfg: &ProjectConfig,
    project_id: &str,
    document_id: &str,
    snapshot_id: &str,
    provider: &dyn LlmProvider,
) -> Result<Option<ExtractionApplied>> {
    if !cfg.llm.is_enabled() {
        store::upsert_processing_state(
            pool,
            document_id,
            STAGE_EXTRACT,
            snapshot_id,
            "ok",
            Some("extraction disabled"),
        )
        .await?;
        return Ok(None);
    }

    store::upsert_processing_state(pool, document_id, STAGE_EXTRACT, snapshot_id, "running", None)
        .await?;
    let chunks = store::list_chunks_for_document(pool, document_id).await?;
    let applied = extraction::extract_and_apply(pool, project_id, &chunks, provider).await?;

    match &applied {
        Some(applied) => {
            // Scenes still unclassified get a POV/setting pass too.
            for scene in store::list_scenes_for_document(pool, document_id).await? {
                if scene.pov_mode == "unknown" {
                    let scene_chunks: Vec<_> = chunks
                        .iter()
                        .filter(|c| {
                            c.start_char >= scene.start_char && c.end_char <= scene.end_char
                        })
                        .cloned()
                        .collect();
                    extraction::classify_scene(pool, project_id, &scene.id, &scene_chunks, provider)
                        .await?;
                }
            }
            store::upsert_processing_state(
                pool,
                document_id,
                STAGE_EXTRACT,
                snapshot_id,
                "ok",
                None,
            )
            .await?;
            info!(document_id, claims = applied.claims, "extraction applied");
        }
        None => {
            store::upsert_processing_state(
                pool,
                document_id,
                STAGE_EXTRACT,
                snapshot_id,
                "error",
                Some("llm provider unavailable"),
            )
            .await?;
            warn!(document_id, "extraction skipped, provider unavailable");
        }
    }
    Ok(applied)
}

async fn fail_stage(
    pool: &SqlitePool,
    project_id: &str,
    document_id: &str,
    stage: &str,
    snapshot_id: &str,
    err: anyhow::Error,
) -> Result<IngestOutcome> {
    let message = format!("{err:#}");
    store::upsert_processing_state(
        pool,
        document_id,
        stage,
        snapshot_id,
        "error",
        Some(&message),
    )
    .await?;
    store::log_event(
        pool,
        project_id,
        "error",
        "ingest_failed",
        &json!({ "document_id": document_id, "stage": stage, "error": message }),
    )
    .await?;
    warn!(document_id, stage, error = %message, "ingest failed");
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{JsonOutput, JsonRequest};

    struct CannedExtraction;

    #[async_trait::async_trait]
    impl LlmProvider for CannedExtraction {
        async fn complete_json(&self, _request: JsonRequest) -> Result<JsonOutput> {
            Ok(JsonOutput {
                json: serde_json::json!({
                    "entities": [{ "name": "Lina", "entity_type": "character" }],
                    "claims": []
                }),
                raw_text: String::new(),
            })
        }
    }

    #[tokio::test]
    async fn extract_stage_storage_failure_records_error_state() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("draft.md"), "Lina crossed the bridge at dawn.").unwrap();

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let project = store::get_or_create_project(&pool, tmp.path().to_str().unwrap(), "p")
            .await
            .unwrap();

        // Earlier stages never read this table; only extraction's entity
        // lookup joins it, so dropping it fails exactly the extract stage.
        sqlx::query("DROP TABLE entity_alias").execute(&pool).await.unwrap();

        let mut cfg = ProjectConfig::default();
        cfg.llm.provider = "cloud".to_string();

        let result = ingest_document(
            &pool,
            &cfg,
            &project.id,
            tmp.path(),
            "draft.md",
            &CannedExtraction,
        )
        .await;
        assert!(result.is_err());

        let doc = store::get_or_create_document(&pool, &project.id, "draft.md", "md")
            .await
            .unwrap();
        let states = store::list_processing_states(&pool, &doc.id).await.unwrap();
        let extract = states
            .iter()
            .find(|s| s.stage == STAGE_EXTRACT)
            .expect("extract stage state");
        assert_eq!(extract.status, "error");
        assert!(extract.error.is_some());

        for stage in [STAGE_CHUNK, STAGE_SCENES, STAGE_ANALYZE] {
            let state = states.iter().find(|s| s.stage == stage).unwrap();
            assert_eq!(state.status, "ok");
        }
    }
}
