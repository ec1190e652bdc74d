use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{now_ms, ProcessingStateRow, StyleMetricRow};

/// Upsert the record for one (document, stage). Each stage writes `running`
/// on entry and `ok` or `error` on exit, tagged with the snapshot id.
pub async fn upsert_processing_state(
    pool: &SqlitePool,
    document_id: &str,
    stage: &str,
    snapshot_id: &str,
    status: &str,
    error: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO processing_state (document_id, stage, snapshot_id, status, error, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(document_id, stage) DO UPDATE SET
            snapshot_id = excluded.snapshot_id,
            status = excluded.status,
            error = excluded.error,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(document_id)
    .bind(stage)
    .bind(snapshot_id)
    .bind(status)
    .bind(error)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_processing_states(
    pool: &SqlitePool,
    document_id: &str,
) -> Result<Vec<ProcessingStateRow>> {
    let rows = sqlx::query_as::<_, ProcessingStateRow>(
        "SELECT document_id, stage, snapshot_id, status, error, updated_at FROM processing_state WHERE document_id = ? ORDER BY stage",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Replace the metric stored for one (scope_type, scope_id, metric_name).
pub async fn upsert_style_metric(
    pool: &SqlitePool,
    project_id: &str,
    scope_type: &str,
    scope_id: &str,
    metric_name: &str,
    metric_json: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO style_metric (id, project_id, scope_type, scope_id, metric_name, metric_json, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(scope_type, scope_id, metric_name) DO UPDATE SET
            metric_json = excluded.metric_json,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(project_id)
    .bind(scope_type)
    .bind(scope_id)
    .bind(metric_name)
    .bind(metric_json)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_style_metric(
    pool: &SqlitePool,
    scope_type: &str,
    scope_id: &str,
    metric_name: &str,
) -> Result<Option<StyleMetricRow>> {
    let row = sqlx::query_as::<_, StyleMetricRow>(
        "SELECT id, project_id, scope_type, scope_id, metric_name, metric_json, updated_at FROM style_metric WHERE scope_type = ? AND scope_id = ? AND metric_name = ?",
    )
    .bind(scope_type)
    .bind(scope_id)
    .bind(metric_name)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_style_metrics(
    pool: &SqlitePool,
    project_id: &str,
    metric_name: &str,
) -> Result<Vec<StyleMetricRow>> {
    let rows = sqlx::query_as::<_, StyleMetricRow>(
        "SELECT id, project_id, scope_type, scope_id, metric_name, metric_json, updated_at FROM style_metric WHERE project_id = ? AND metric_name = ? ORDER BY scope_type, scope_id",
    )
    .bind(project_id)
    .bind(metric_name)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Append a structured event to the project log.
pub async fn log_event(
    pool: &SqlitePool,
    project_id: &str,
    level: &str,
    event_type: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO event_log (id, project_id, ts, level, event_type, payload_json) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(project_id)
    .bind(now_ms())
    .bind(level)
    .bind(event_type)
    .bind(payload.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct EventRow {
    pub id: String,
    pub project_id: String,
    pub ts: i64,
    pub level: String,
    pub event_type: String,
    pub payload_json: String,
}

pub async fn recent_events(
    pool: &SqlitePool,
    project_id: &str,
    limit: i64,
) -> Result<Vec<EventRow>> {
    let rows = sqlx::query_as::<_, EventRow>(
        "SELECT id, project_id, ts, level, event_type, payload_json FROM event_log WHERE project_id = ? ORDER BY ts DESC LIMIT ?",
    )
    .bind(project_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
