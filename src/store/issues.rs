use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::{now_ms, EvidenceRow, IssueRow, IssueStatus, Severity};

const ISSUE_COLS: &str =
    "id, project_id, type, severity, title, description, status, created_at, updated_at";

/// Status filter for issue listings. `Open` is the command-surface default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueFilter {
    Open,
    All,
    Only(IssueStatus),
}

pub struct NewIssue<'a> {
    pub project_id: &'a str,
    pub issue_type: &'a str,
    pub severity: Severity,
    pub title: &'a str,
    pub description: &'a str,
}

pub async fn insert_issue(pool: &SqlitePool, issue: NewIssue<'_>) -> Result<IssueRow> {
    let now = now_ms();
    let row = IssueRow {
        id: Uuid::new_v4().to_string(),
        project_id: issue.project_id.to_string(),
        issue_type: issue.issue_type.to_string(),
        severity: issue.severity.as_str().to_string(),
        title: issue.title.to_string(),
        description: issue.description.to_string(),
        status: IssueStatus::Open.as_str().to_string(),
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO issue (id, project_id, type, severity, title, description, status, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.id)
    .bind(&row.project_id)
    .bind(&row.issue_type)
    .bind(&row.severity)
    .bind(&row.title)
    .bind(&row.description)
    .bind(&row.status)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(pool)
    .await?;
    Ok(row)
}

pub async fn get_issue_by_id(pool: &SqlitePool, issue_id: &str) -> Result<Option<IssueRow>> {
    let row = sqlx::query_as::<_, IssueRow>(&format!(
        "SELECT {ISSUE_COLS} FROM issue WHERE id = ?"
    ))
    .bind(issue_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_issues(
    pool: &SqlitePool,
    project_id: &str,
    filter: IssueFilter,
) -> Result<Vec<IssueRow>> {
    let status = match filter {
        IssueFilter::All => None,
        IssueFilter::Open => Some(IssueStatus::Open),
        IssueFilter::Only(status) => Some(status),
    };
    let rows = match status {
        None => {
            sqlx::query_as::<_, IssueRow>(&format!(
                "SELECT {ISSUE_COLS} FROM issue WHERE project_id = ? ORDER BY created_at DESC"
            ))
            .bind(project_id)
            .fetch_all(pool)
            .await?
        }
        Some(status) => {
            sqlx::query_as::<_, IssueRow>(&format!(
                "SELECT {ISSUE_COLS} FROM issue WHERE project_id = ? AND status = ? ORDER BY created_at DESC"
            ))
            .bind(project_id)
            .bind(status.as_str())
            .fetch_all(pool)
            .await?
        }
    };
    Ok(rows)
}

pub async fn set_issue_status(
    pool: &SqlitePool,
    issue_id: &str,
    status: IssueStatus,
) -> Result<bool> {
    let result = sqlx::query("UPDATE issue SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now_ms())
        .bind(issue_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete open issues of one type before an analyzer re-run. Dismissed and
/// resolved issues stay so triage decisions survive re-analysis.
pub async fn clear_open_issues_by_type(
    pool: &SqlitePool,
    project_id: &str,
    issue_type: &str,
) -> Result<u64> {
    let result =
        sqlx::query("DELETE FROM issue WHERE project_id = ? AND type = ? AND status = 'open'")
            .bind(project_id)
            .bind(issue_type)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

pub async fn insert_issue_evidence(
    pool: &SqlitePool,
    issue_id: &str,
    chunk_id: &str,
    quote_start: i64,
    quote_end: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO issue_evidence (id, issue_id, chunk_id, quote_start, quote_end, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(issue_id)
    .bind(chunk_id)
    .bind(quote_start)
    .bind(quote_end)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_issue_evidence(pool: &SqlitePool, issue_id: &str) -> Result<Vec<EvidenceRow>> {
    let rows = sqlx::query_as::<_, EvidenceRow>(
        "SELECT id, chunk_id, quote_start, quote_end FROM issue_evidence WHERE issue_id = ? ORDER BY created_at",
    )
    .bind(issue_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_open_issues(pool: &SqlitePool, project_id: &str) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM issue WHERE project_id = ? AND status = 'open'")
            .bind(project_id)
            .fetch_one(pool)
            .await?;
    Ok(count)
}
