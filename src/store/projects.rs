use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{now_ms, DocumentRow, ProjectRow};

pub async fn get_project_by_root(pool: &SqlitePool, root_path: &str) -> Result<Option<ProjectRow>> {
    let row = sqlx::query_as::<_, ProjectRow>(
        "SELECT id, root_path, name, created_at, updated_at FROM project WHERE root_path = ?",
    )
    .bind(root_path)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_or_create_project(
    pool: &SqlitePool,
    root_path: &str,
    name: &str,
) -> Result<ProjectRow> {
    if let Some(existing) = get_project_by_root(pool, root_path).await? {
        return Ok(existing);
    }

    let now = now_ms();
    let project = ProjectRow {
        id: Uuid::new_v4().to_string(),
        root_path: root_path.to_string(),
        name: name.to_string(),
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO project (id, root_path, name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&project.id)
    .bind(&project.root_path)
    .bind(&project.name)
    .bind(project.created_at)
    .bind(project.updated_at)
    .execute(pool)
    .await?;

    Ok(project)
}

pub async fn touch_project(pool: &SqlitePool, project_id: &str) -> Result<()> {
    sqlx::query("UPDATE project SET updated_at = ? WHERE id = ?")
        .bind(now_ms())
        .bind(project_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_document_by_id(pool: &SqlitePool, document_id: &str) -> Result<Option<DocumentRow>> {
    let row = sqlx::query_as::<_, DocumentRow>(
        "SELECT id, project_id, path, kind, version, created_at, updated_at FROM document WHERE id = ?",
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_document_by_path(
    pool: &SqlitePool,
    project_id: &str,
    path: &str,
) -> Result<Option<DocumentRow>> {
    let row = sqlx::query_as::<_, DocumentRow>(
        "SELECT id, project_id, path, kind, version, created_at, updated_at FROM document WHERE project_id = ? AND path = ?",
    )
    .bind(project_id)
    .bind(path)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get_or_create_document(
    pool: &SqlitePool,
    project_id: &str,
    path: &str,
    kind: &str,
) -> Result<DocumentRow> {
    if let Some(existing) = get_document_by_path(pool, project_id, path).await? {
        return Ok(existing);
    }

    let now = now_ms();
    let doc = DocumentRow {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        path: path.to_string(),
        kind: kind.to_string(),
        version: 0,
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO document (id, project_id, path, kind, version, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&doc.id)
    .bind(&doc.project_id)
    .bind(&doc.path)
    .bind(&doc.kind)
    .bind(doc.version)
    .bind(doc.created_at)
    .bind(doc.updated_at)
    .execute(pool)
    .await?;

    Ok(doc)
}

pub async fn list_documents(pool: &SqlitePool, project_id: &str) -> Result<Vec<DocumentRow>> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        "SELECT id, project_id, path, kind, version, created_at, updated_at FROM document WHERE project_id = ? ORDER BY path",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Bump the document snapshot version after a successful ingest. Returns the
/// new version.
pub async fn bump_document_version(pool: &SqlitePool, document_id: &str) -> Result<i64> {
    sqlx::query("UPDATE document SET version = version + 1, updated_at = ? WHERE id = ?")
        .bind(now_ms())
        .bind(document_id)
        .execute(pool)
        .await?;
    let version: i64 = sqlx::query_scalar("SELECT version FROM document WHERE id = ?")
        .bind(document_id)
        .fetch_one(pool)
        .await?;
    Ok(version)
}
