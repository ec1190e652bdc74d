use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{now_ms, EvidenceRow, PovMode, SceneRow};
use crate::scenes::SceneSpan;

const SCENE_SELECT: &str = r#"
    SELECT s.id, s.project_id, s.document_id, s.ordinal, s.start_chunk_id, s.end_chunk_id,
           s.start_char, s.end_char, s.title,
           COALESCE(m.pov_mode, 'unknown') AS pov_mode,
           m.pov_entity_id, m.setting_entity_id, m.setting_text
    FROM scene s
    LEFT JOIN scene_metadata m ON m.scene_id = s.id
"#;

pub async fn list_scenes_for_document(
    pool: &SqlitePool,
    document_id: &str,
) -> Result<Vec<SceneRow>> {
    let rows = sqlx::query_as::<_, SceneRow>(&format!(
        "{SCENE_SELECT} WHERE s.document_id = ? ORDER BY s.ordinal"
    ))
    .bind(document_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_scenes_for_project(pool: &SqlitePool, project_id: &str) -> Result<Vec<SceneRow>> {
    let rows = sqlx::query_as::<_, SceneRow>(&format!(
        "{SCENE_SELECT} WHERE s.project_id = ? ORDER BY s.document_id, s.ordinal"
    ))
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_scene_by_id(pool: &SqlitePool, scene_id: &str) -> Result<Option<SceneRow>> {
    let row = sqlx::query_as::<_, SceneRow>(&format!("{SCENE_SELECT} WHERE s.id = ?"))
        .bind(scene_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Replace a document's scene set atomically. Old scenes (and their metadata
/// and evidence, via cascade) are deleted; fresh rows get a default-unknown
/// metadata row so later classification is a plain update.
pub async fn replace_scenes_for_document(
    pool: &SqlitePool,
    project_id: &str,
    document_id: &str,
    spans: &[SceneSpan],
) -> Result<Vec<String>> {
    let mut tx = pool.begin().await?;
    let now = now_ms();

    sqlx::query("DELETE FROM scene WHERE document_id = ?")
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

    let mut ids = Vec::with_capacity(spans.len());
    for span in spans {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO scene (id, project_id, document_id, ordinal, start_chunk_id, end_chunk_id, start_char, end_char, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(project_id)
        .bind(document_id)
        .bind(span.ordinal)
        .bind(&span.start_chunk_id)
        .bind(&span.end_chunk_id)
        .bind(span.start_char)
        .bind(span.end_char)
        .bind(&span.title)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO scene_metadata (scene_id, pov_mode, created_at, updated_at) VALUES (?, 'unknown', ?, ?)",
        )
        .bind(&id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        ids.push(id);
    }

    tx.commit().await?;
    Ok(ids)
}

pub struct SceneMetadataUpdate<'a> {
    pub pov_mode: PovMode,
    pub pov_entity_id: Option<&'a str>,
    pub pov_confidence: f64,
    pub setting_entity_id: Option<&'a str>,
    pub setting_text: Option<&'a str>,
    pub setting_confidence: f64,
    pub time_context_text: Option<&'a str>,
}

pub async fn update_scene_metadata(
    pool: &SqlitePool,
    scene_id: &str,
    update: SceneMetadataUpdate<'_>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE scene_metadata
        SET pov_mode = ?, pov_entity_id = ?, pov_confidence = ?,
            setting_entity_id = ?, setting_text = ?, setting_confidence = ?,
            time_context_text = ?, updated_at = ?
        WHERE scene_id = ?
        "#,
    )
    .bind(update.pov_mode.as_str())
    .bind(update.pov_entity_id)
    .bind(update.pov_confidence)
    .bind(update.setting_entity_id)
    .bind(update.setting_text)
    .bind(update.setting_confidence)
    .bind(update.time_context_text)
    .bind(now_ms())
    .bind(scene_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn insert_scene_evidence(
    pool: &SqlitePool,
    scene_id: &str,
    chunk_id: &str,
    quote_start: i64,
    quote_end: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO scene_evidence (id, scene_id, chunk_id, quote_start, quote_end, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(scene_id)
    .bind(chunk_id)
    .bind(quote_start)
    .bind(quote_end)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_scene_evidence(pool: &SqlitePool, scene_id: &str) -> Result<Vec<EvidenceRow>> {
    let rows = sqlx::query_as::<_, EvidenceRow>(
        "SELECT id, chunk_id, quote_start, quote_end FROM scene_evidence WHERE scene_id = ? ORDER BY created_at",
    )
    .bind(scene_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
