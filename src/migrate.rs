use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables if they do not exist. Safe to run on every open.
///
/// Cascade rules: deleting a chunk removes its claim/issue/scene evidence
/// rows; deleting a document removes its chunks, scenes, and processing
/// state; deleting an entity removes its claims and aliases.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project (
            id TEXT PRIMARY KEY,
            root_path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES project(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            kind TEXT NOT NULL DEFAULT 'md',
            version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(project_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL REFERENCES document(id) ON DELETE CASCADE,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            text_hash TEXT NOT NULL,
            start_char INTEGER NOT NULL,
            end_char INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(document_id, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES project(id) ON DELETE CASCADE,
            type TEXT NOT NULL,
            display_name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(project_id, display_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_alias (
            id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
            alias TEXT NOT NULL,
            UNIQUE(entity_id, alias)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS claim (
            id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
            field TEXT NOT NULL,
            value_json TEXT NOT NULL,
            status TEXT NOT NULL,
            confidence REAL NOT NULL,
            supersedes_claim_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS claim_evidence (
            id TEXT PRIMARY KEY,
            claim_id TEXT NOT NULL REFERENCES claim(id) ON DELETE CASCADE,
            chunk_id TEXT NOT NULL REFERENCES chunk(id) ON DELETE CASCADE,
            quote_start INTEGER NOT NULL,
            quote_end INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scene (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES project(id) ON DELETE CASCADE,
            document_id TEXT NOT NULL REFERENCES document(id) ON DELETE CASCADE,
            ordinal INTEGER NOT NULL,
            start_chunk_id TEXT NOT NULL,
            end_chunk_id TEXT NOT NULL,
            start_char INTEGER NOT NULL,
            end_char INTEGER NOT NULL,
            title TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scene_metadata (
            scene_id TEXT PRIMARY KEY REFERENCES scene(id) ON DELETE CASCADE,
            pov_mode TEXT NOT NULL DEFAULT 'unknown',
            pov_entity_id TEXT,
            pov_confidence REAL NOT NULL DEFAULT 0,
            setting_entity_id TEXT,
            setting_text TEXT,
            setting_confidence REAL NOT NULL DEFAULT 0,
            time_context_text TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scene_evidence (
            id TEXT PRIMARY KEY,
            scene_id TEXT NOT NULL REFERENCES scene(id) ON DELETE CASCADE,
            chunk_id TEXT NOT NULL REFERENCES chunk(id) ON DELETE CASCADE,
            quote_start INTEGER NOT NULL,
            quote_end INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS issue (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES project(id) ON DELETE CASCADE,
            type TEXT NOT NULL,
            severity TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS issue_evidence (
            id TEXT PRIMARY KEY,
            issue_id TEXT NOT NULL REFERENCES issue(id) ON DELETE CASCADE,
            chunk_id TEXT NOT NULL REFERENCES chunk(id) ON DELETE CASCADE,
            quote_start INTEGER NOT NULL,
            quote_end INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS style_metric (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES project(id) ON DELETE CASCADE,
            scope_type TEXT NOT NULL,
            scope_id TEXT NOT NULL,
            metric_name TEXT NOT NULL,
            metric_json TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(scope_type, scope_id, metric_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_state (
            document_id TEXT NOT NULL REFERENCES document(id) ON DELETE CASCADE,
            stage TEXT NOT NULL,
            snapshot_id TEXT NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY(document_id, stage)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_log (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            ts INTEGER NOT NULL,
            level TEXT NOT NULL,
            event_type TEXT NOT NULL,
            payload_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunk_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunk_fts USING fts5(
                chunk_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunk_document ON chunk(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_claim_entity_field ON claim(entity_id, field)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_issue_project_status ON issue(project_id, status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_scene_project ON scene(project_id)")
        .execute(pool)
        .await?;

    Ok(())
}
