use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{now_ms, EntityRow};

pub async fn get_entity_by_id(pool: &SqlitePool, entity_id: &str) -> Result<Option<EntityRow>> {
    let row = sqlx::query_as::<_, EntityRow>(
        "SELECT id, project_id, type, display_name, created_at, updated_at FROM entity WHERE id = ?",
    )
    .bind(entity_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_entities(pool: &SqlitePool, project_id: &str) -> Result<Vec<EntityRow>> {
    let rows = sqlx::query_as::<_, EntityRow>(
        "SELECT id, project_id, type, display_name, created_at, updated_at FROM entity WHERE project_id = ? ORDER BY display_name",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Case-insensitive lookup over display names and aliases.
pub async fn find_entity_by_name(
    pool: &SqlitePool,
    project_id: &str,
    name: &str,
) -> Result<Option<EntityRow>> {
    let row = sqlx::query_as::<_, EntityRow>(
        r#"
        SELECT e.id, e.project_id, e.type, e.display_name, e.created_at, e.updated_at
        FROM entity e
        LEFT JOIN entity_alias a ON a.entity_id = e.id
        WHERE e.project_id = ?
          AND (LOWER(e.display_name) = LOWER(?) OR LOWER(a.alias) = LOWER(?))
        LIMIT 1
        "#,
    )
    .bind(project_id)
    .bind(name)
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Resolve by name or alias, creating the entity when nothing matches. The
/// stored display name keeps the caller's casing.
pub async fn get_or_create_entity(
    pool: &SqlitePool,
    project_id: &str,
    entity_type: &str,
    display_name: &str,
) -> Result<EntityRow> {
    if let Some(existing) = find_entity_by_name(pool, project_id, display_name).await? {
        return Ok(existing);
    }

    let now = now_ms();
    let entity = EntityRow {
        id: Uuid::new_v4().to_string(),
        project_id: project_id.to_string(),
        entity_type: entity_type.to_string(),
        display_name: display_name.trim().to_string(),
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO entity (id, project_id, type, display_name, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&entity.id)
    .bind(&entity.project_id)
    .bind(&entity.entity_type)
    .bind(&entity.display_name)
    .bind(entity.created_at)
    .bind(entity.updated_at)
    .execute(pool)
    .await?;

    Ok(entity)
}

/// Record an alias for an entity; duplicates are ignored.
pub async fn add_entity_alias(pool: &SqlitePool, entity_id: &str, alias: &str) -> Result<()> {
    let alias = alias.trim();
    if alias.is_empty() {
        return Ok(());
    }
    sqlx::query("INSERT OR IGNORE INTO entity_alias (id, entity_id, alias) VALUES (?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(entity_id)
        .bind(alias)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn list_entity_aliases(pool: &SqlitePool, entity_id: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT alias FROM entity_alias WHERE entity_id = ? ORDER BY alias")
            .bind(entity_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(a,)| a).collect())
}
