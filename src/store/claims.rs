use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{now_ms, ClaimRow, ClaimStatus, ClaimValue, EvidenceRow};

const CLAIM_COLS: &str =
    "id, entity_id, field, value_json, status, confidence, supersedes_claim_id, created_at, updated_at";

pub struct NewClaim<'a> {
    pub entity_id: &'a str,
    pub field: &'a str,
    pub value: &'a ClaimValue,
    pub status: ClaimStatus,
    pub confidence: f64,
    pub supersedes_claim_id: Option<&'a str>,
}

pub async fn insert_claim(pool: &SqlitePool, claim: NewClaim<'_>) -> Result<ClaimRow> {
    let now = now_ms();
    let row = ClaimRow {
        id: Uuid::new_v4().to_string(),
        entity_id: claim.entity_id.to_string(),
        field: claim.field.to_string(),
        value_json: claim.value.to_stored(),
        status: claim.status.as_str().to_string(),
        confidence: claim.confidence,
        supersedes_claim_id: claim.supersedes_claim_id.map(|s| s.to_string()),
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO claim (id, entity_id, field, value_json, status, confidence, supersedes_claim_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(&row.entity_id)
    .bind(&row.field)
    .bind(&row.value_json)
    .bind(&row.status)
    .bind(row.confidence)
    .bind(&row.supersedes_claim_id)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(pool)
    .await?;
    Ok(row)
}

pub async fn get_claim_by_id(pool: &SqlitePool, claim_id: &str) -> Result<Option<ClaimRow>> {
    let row = sqlx::query_as::<_, ClaimRow>(&format!(
        "SELECT {CLAIM_COLS} FROM claim WHERE id = ?"
    ))
    .bind(claim_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// All claims for one entity, newest first.
pub async fn list_claims_for_entity(pool: &SqlitePool, entity_id: &str) -> Result<Vec<ClaimRow>> {
    let rows = sqlx::query_as::<_, ClaimRow>(&format!(
        "SELECT {CLAIM_COLS} FROM claim WHERE entity_id = ? ORDER BY created_at DESC"
    ))
    .bind(entity_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Claims for one (entity, field), newest first.
pub async fn list_claims_by_field(
    pool: &SqlitePool,
    entity_id: &str,
    field: &str,
) -> Result<Vec<ClaimRow>> {
    let rows = sqlx::query_as::<_, ClaimRow>(&format!(
        "SELECT {CLAIM_COLS} FROM claim WHERE entity_id = ? AND field = ? ORDER BY created_at DESC"
    ))
    .bind(entity_id)
    .bind(field)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// All claims across a project, for the continuity sweep.
pub async fn list_claims_for_project(pool: &SqlitePool, project_id: &str) -> Result<Vec<ClaimRow>> {
    let rows = sqlx::query_as::<_, ClaimRow>(
        r#"
        SELECT c.id, c.entity_id, c.field, c.value_json, c.status, c.confidence,
               c.supersedes_claim_id, c.created_at, c.updated_at
        FROM claim c
        JOIN entity e ON e.id = c.entity_id
        WHERE e.project_id = ?
        ORDER BY c.entity_id, c.field, c.created_at DESC
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn set_claim_status(
    pool: &SqlitePool,
    claim_id: &str,
    status: ClaimStatus,
) -> Result<()> {
    sqlx::query("UPDATE claim SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now_ms())
        .bind(claim_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_claim_evidence(
    pool: &SqlitePool,
    claim_id: &str,
    chunk_id: &str,
    quote_start: i64,
    quote_end: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO claim_evidence (id, claim_id, chunk_id, quote_start, quote_end, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(claim_id)
    .bind(chunk_id)
    .bind(quote_start)
    .bind(quote_end)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_claim_evidence(pool: &SqlitePool, claim_id: &str) -> Result<Vec<EvidenceRow>> {
    let rows = sqlx::query_as::<_, EvidenceRow>(
        "SELECT id, chunk_id, quote_start, quote_end FROM claim_evidence WHERE claim_id = ? ORDER BY created_at",
    )
    .bind(claim_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Delete inferred claims for a document's chunks that no longer have any
/// surviving evidence. Used after re-ingest removes stale chunks.
pub async fn delete_orphaned_inferred_claims(pool: &SqlitePool, project_id: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM claim WHERE id IN (
            SELECT c.id FROM claim c
            JOIN entity e ON e.id = c.entity_id
            WHERE e.project_id = ?
              AND c.status = 'inferred'
              AND NOT EXISTS (SELECT 1 FROM claim_evidence ev WHERE ev.claim_id = c.id)
        )
        "#,
    )
    .bind(project_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
