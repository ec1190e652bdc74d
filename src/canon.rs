//! Canon operations: claim confirmation with supersession, and the
//! story-bible read path.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{now_ms, ClaimRow, ClaimStatus, ClaimValue, EntityRow};
use crate::spans::build_excerpt;
use crate::store;

/// Context window, in bytes each side, for bible excerpts.
const EXCERPT_CONTEXT: usize = 60;

/// Mark all other inferred claims for (entity, field) as superseded by
/// `superseding_id`. Confirmed and already-superseded rows are untouched.
pub async fn supersede_claims(
    pool: &SqlitePool,
    entity_id: &str,
    field: &str,
    superseding_id: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE claim
        SET status = 'superseded', supersedes_claim_id = ?, updated_at = ?
        WHERE entity_id = ? AND field = ? AND status = 'inferred' AND id != ?
        "#,
    )
    .bind(superseding_id)
    .bind(now_ms())
    .bind(entity_id)
    .bind(field)
    .bind(superseding_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Accept a value as canon for (entity, field).
///
/// Inserts a confirmed claim at confidence 1.0, copies the source claim's
/// evidence onto it when a source is given, then supersedes the remaining
/// inferred claims for the field. Runs as one transaction so a crash cannot
/// leave the new claim without its supersession (or the reverse).
pub async fn confirm_claim(
    pool: &SqlitePool,
    entity_id: &str,
    field: &str,
    value: &ClaimValue,
    source_claim_id: Option<&str>,
) -> Result<ClaimRow> {
    if field.trim().is_empty() {
        bail!("claim field must not be empty");
    }

    let mut tx = pool.begin().await?;
    let now = now_ms();
    let claim = ClaimRow {
        id: Uuid::new_v4().to_string(),
        entity_id: entity_id.to_string(),
        field: field.to_string(),
        value_json: value.to_stored(),
        status: ClaimStatus::Confirmed.as_str().to_string(),
        confidence: 1.0,
        supersedes_claim_id: source_claim_id.map(|s| s.to_string()),
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO claim (id, entity_id, field, value_json, status, confidence, supersedes_claim_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&claim.id)
    .bind(&claim.entity_id)
    .bind(&claim.field)
    .bind(&claim.value_json)
    .bind(&claim.status)
    .bind(claim.confidence)
    .bind(&claim.supersedes_claim_id)
    .bind(claim.created_at)
    .bind(claim.updated_at)
    .execute(&mut *tx)
    .await?;

    if let Some(source_id) = source_claim_id {
        sqlx::query(
            r#"
            INSERT INTO claim_evidence (id, claim_id, chunk_id, quote_start, quote_end, created_at)
            SELECT lower(hex(randomblob(16))), ?, chunk_id, quote_start, quote_end, ?
            FROM claim_evidence WHERE claim_id = ?
            "#,
        )
        .bind(&claim.id)
        .bind(now)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        r#"
        UPDATE claim
        SET status = 'superseded', supersedes_claim_id = ?, updated_at = ?
        WHERE entity_id = ? AND field = ? AND status = 'inferred' AND id != ?
        "#,
    )
    .bind(&claim.id)
    .bind(now)
    .bind(entity_id)
    .bind(field)
    .bind(&claim.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(claim)
}

/// One evidence quote resolved against current chunk text.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedEvidence {
    pub chunk_id: String,
    pub quote_start: i64,
    pub quote_end: i64,
    pub excerpt: String,
}

/// A claim with its resolved evidence, ready for the bible view.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimDetail {
    pub id: String,
    pub field: String,
    pub value: ClaimValue,
    pub status: String,
    pub confidence: f64,
    pub evidence: Vec<ResolvedEvidence>,
}

/// Claims for one entity grouped by field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldClaims {
    pub field: String,
    pub claims: Vec<ClaimDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityDetail {
    pub entity: EntityRow,
    pub aliases: Vec<String>,
    pub fields: Vec<FieldClaims>,
}

/// Bible read path for one entity. Evidence excerpts are re-sliced from the
/// current chunk text; claims without any evidence are dropped unless they
/// are confirmed (user-asserted facts need no quote).
pub async fn get_entity_detail(pool: &SqlitePool, entity_id: &str) -> Result<Option<EntityDetail>> {
    let Some(entity) = store::get_entity_by_id(pool, entity_id).await? else {
        return Ok(None);
    };
    let aliases = store::list_entity_aliases(pool, entity_id).await?;
    let claims = store::list_claims_for_entity(pool, entity_id).await?;

    let mut fields: Vec<FieldClaims> = Vec::new();
    for claim in claims {
        let evidence = resolve_claim_evidence(pool, &claim.id).await?;
        if evidence.is_empty() && claim.status() != ClaimStatus::Confirmed {
            continue;
        }
        let detail = ClaimDetail {
            id: claim.id.clone(),
            field: claim.field.clone(),
            value: claim.value(),
            status: claim.status.clone(),
            confidence: claim.confidence,
            evidence,
        };
        match fields.iter_mut().find(|f| f.field == claim.field) {
            Some(group) => group.claims.push(detail),
            None => fields.push(FieldClaims {
                field: claim.field.clone(),
                claims: vec![detail],
            }),
        }
    }

    Ok(Some(EntityDetail {
        entity,
        aliases,
        fields,
    }))
}

async fn resolve_claim_evidence(pool: &SqlitePool, claim_id: &str) -> Result<Vec<ResolvedEvidence>> {
    let rows = store::list_claim_evidence(pool, claim_id).await?;
    let mut resolved = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(chunk) = store::get_chunk_by_id(pool, &row.chunk_id).await? else {
            continue;
        };
        let excerpt = build_excerpt(
            &chunk.text,
            row.quote_start.max(0) as usize,
            row.quote_end.max(0) as usize,
            EXCERPT_CONTEXT,
        );
        resolved.push(ResolvedEvidence {
            chunk_id: row.chunk_id,
            quote_start: row.quote_start,
            quote_end: row.quote_end,
            excerpt,
        });
    }
    Ok(resolved)
}
