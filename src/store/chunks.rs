use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::chunking::ChunkSlice;
use crate::models::{now_ms, ChunkRow};

/// Outcome of a diff-aware chunk replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkDiff {
    pub kept: usize,
    pub added: usize,
    pub removed: usize,
}

pub async fn list_chunks_for_document(
    pool: &SqlitePool,
    document_id: &str,
) -> Result<Vec<ChunkRow>> {
    let rows = sqlx::query_as::<_, ChunkRow>(
        "SELECT id, document_id, ordinal, text, text_hash, start_char, end_char, created_at, updated_at FROM chunk WHERE document_id = ? ORDER BY ordinal",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_chunks_for_project(pool: &SqlitePool, project_id: &str) -> Result<Vec<ChunkRow>> {
    let rows = sqlx::query_as::<_, ChunkRow>(
        r#"
        SELECT c.id, c.document_id, c.ordinal, c.text, c.text_hash, c.start_char, c.end_char, c.created_at, c.updated_at
        FROM chunk c
        JOIN document d ON d.id = c.document_id
        WHERE d.project_id = ?
        ORDER BY d.path, c.ordinal
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_chunk_by_id(pool: &SqlitePool, chunk_id: &str) -> Result<Option<ChunkRow>> {
    let row = sqlx::query_as::<_, ChunkRow>(
        "SELECT id, document_id, ordinal, text, text_hash, start_char, end_char, created_at, updated_at FROM chunk WHERE id = ?",
    )
    .bind(chunk_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Replace a document's chunk set in one transaction.
///
/// A chunk keeps its identity (and therefore its evidence links) when the
/// new slice at the same ordinal has the same content hash; shifted offsets
/// are updated in place. Everything else is deleted — foreign-key cascades
/// remove claim/issue/scene evidence rows — and reinserted fresh, including
/// the FTS index entries.
pub async fn replace_chunks(
    pool: &SqlitePool,
    document_id: &str,
    slices: &[ChunkSlice],
) -> Result<ChunkDiff> {
    let old = list_chunks_for_document(pool, document_id).await?;
    let old_by_ordinal: HashMap<i64, &ChunkRow> = old.iter().map(|c| (c.ordinal, c)).collect();

    let mut tx = pool.begin().await?;
    let mut diff = ChunkDiff::default();
    let now = now_ms();

    for slice in slices {
        match old_by_ordinal.get(&slice.ordinal) {
            Some(existing) if existing.text_hash == slice.text_hash => {
                diff.kept += 1;
                if existing.start_char != slice.start as i64
                    || existing.end_char != slice.end as i64
                {
                    sqlx::query(
                        "UPDATE chunk SET start_char = ?, end_char = ?, updated_at = ? WHERE id = ?",
                    )
                    .bind(slice.start as i64)
                    .bind(slice.end as i64)
                    .bind(now)
                    .bind(&existing.id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
            Some(existing) => {
                sqlx::query("DELETE FROM chunk_fts WHERE chunk_id = ?")
                    .bind(&existing.id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM chunk WHERE id = ?")
                    .bind(&existing.id)
                    .execute(&mut *tx)
                    .await?;
                diff.removed += 1;
                insert_chunk_tx(&mut tx, document_id, slice, now).await?;
                diff.added += 1;
            }
            None => {
                insert_chunk_tx(&mut tx, document_id, slice, now).await?;
                diff.added += 1;
            }
        }
    }

    // Old chunks past the new partition's end
    for chunk in &old {
        if chunk.ordinal >= slices.len() as i64 {
            sqlx::query("DELETE FROM chunk_fts WHERE chunk_id = ?")
                .bind(&chunk.id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chunk WHERE id = ?")
                .bind(&chunk.id)
                .execute(&mut *tx)
                .await?;
            diff.removed += 1;
        }
    }

    tx.commit().await?;
    Ok(diff)
}

async fn insert_chunk_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    document_id: &str,
    slice: &ChunkSlice,
    now: i64,
) -> Result<()> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO chunk (id, document_id, ordinal, text, text_hash, start_char, end_char, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(document_id)
    .bind(slice.ordinal)
    .bind(&slice.text)
    .bind(&slice.text_hash)
    .bind(slice.start as i64)
    .bind(slice.end as i64)
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    sqlx::query("INSERT INTO chunk_fts (chunk_id, text) VALUES (?, ?)")
        .bind(&id)
        .bind(&slice.text)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Delete specific chunks (and their FTS entries). Evidence rows go with
/// them via the cascade rules.
pub async fn delete_chunks_by_ids(pool: &SqlitePool, chunk_ids: &[String]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for id in chunk_ids {
        sqlx::query("DELETE FROM chunk_fts WHERE chunk_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunk WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}
