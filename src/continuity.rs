//! Continuity analyzer.
//!
//! Looks for fields where the manuscript asserts two or more distinct values
//! for the same entity. Severity rises to high when a draft value contradicts
//! a confirmed one. The run is idempotent: prior open continuity issues are
//! cleared first, dismissed and resolved ones are left alone.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::models::{ClaimRow, ClaimStatus, Severity};
use crate::store::{self, IssueFilter, NewIssue};

pub const ISSUE_TYPE: &str = "continuity";

/// Re-scan the whole claim graph for one project. Returns the number of
/// issues emitted.
pub async fn run_continuity(pool: &SqlitePool, project_id: &str) -> Result<usize> {
    let cleared = store::clear_open_issues_by_type(pool, project_id, ISSUE_TYPE).await?;
    let claims = store::list_claims_for_project(pool, project_id).await?;

    // Claims arrive ordered by (entity, field); walk the groups in place.
    let mut emitted = 0usize;
    let mut idx = 0;
    while idx < claims.len() {
        let group_start = idx;
        let entity_id = claims[idx].entity_id.clone();
        let field = claims[idx].field.clone();
        while idx < claims.len()
            && claims[idx].entity_id == entity_id
            && claims[idx].field == field
        {
            idx += 1;
        }
        if check_field(pool, project_id, &entity_id, &field, &claims[group_start..idx]).await? {
            emitted += 1;
        }
    }

    info!(project_id, cleared, emitted, "continuity analysis complete");
    Ok(emitted)
}

/// Examine one (entity, field) group; emit at most one issue.
async fn check_field(
    pool: &SqlitePool,
    project_id: &str,
    entity_id: &str,
    field: &str,
    group: &[ClaimRow],
) -> Result<bool> {
    // Only active claims backed by evidence participate.
    let mut evidenced: Vec<&ClaimRow> = Vec::new();
    for claim in group {
        let status = claim.status();
        if status != ClaimStatus::Inferred && status != ClaimStatus::Confirmed {
            continue;
        }
        if !store::list_claim_evidence(pool, &claim.id).await?.is_empty() {
            evidenced.push(claim);
        }
    }

    // Deduplicate by normalized value, keeping the first claim per value.
    let mut distinct: Vec<(String, &ClaimRow)> = Vec::new();
    for claim in &evidenced {
        let key = claim.value().normalized();
        if !distinct.iter().any(|(k, _)| *k == key) {
            distinct.push((key, claim));
        }
    }
    if distinct.len() < 2 {
        return Ok(false);
    }

    let has_confirmed_conflict = distinct
        .iter()
        .any(|(_, c)| c.status() == ClaimStatus::Confirmed)
        && distinct
            .iter()
            .any(|(_, c)| c.status() == ClaimStatus::Inferred);
    let severity = if has_confirmed_conflict {
        Severity::High
    } else {
        Severity::Medium
    };

    let entity_name = store::get_entity_by_id(pool, entity_id)
        .await?
        .map(|e| e.display_name)
        .unwrap_or_else(|| entity_id.to_string());
    let values: Vec<String> = distinct.iter().map(|(k, _)| k.clone()).collect();

    let issue = store::insert_issue(
        pool,
        NewIssue {
            project_id,
            issue_type: ISSUE_TYPE,
            severity,
            title: &format!("Conflicting values for {entity_name} {field}"),
            description: &format!(
                "The manuscript gives {} distinct values for this field: {}",
                values.len(),
                values.join(" vs ")
            ),
        },
    )
    .await?;

    // First evidence row of up to two representative claims.
    for (_, claim) in distinct.iter().take(2) {
        if let Some(ev) = store::list_claim_evidence(pool, &claim.id).await?.first() {
            store::insert_issue_evidence(pool, &issue.id, &ev.chunk_id, ev.quote_start, ev.quote_end)
                .await?;
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClaimValue;
    use crate::store::NewClaim;

    async fn setup() -> (sqlx::SqlitePool, String, String, String) {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let project = store::get_or_create_project(&pool, "/tmp/p", "p").await.unwrap();
        let doc = store::get_or_create_document(&pool, &project.id, "draft.md", "md")
            .await
            .unwrap();
        let slices = crate::chunking::build_chunks("Her eyes were green. Her eyes were hazel.");
        store::replace_chunks(&pool, &doc.id, &slices).await.unwrap();
        let chunk = store::list_chunks_for_document(&pool, &doc.id)
            .await
            .unwrap()
            .remove(0);
        (pool, project.id, doc.id, chunk.id)
    }

    async fn evidenced_claim(
        pool: &sqlx::SqlitePool,
        entity_id: &str,
        chunk_id: &str,
        value: &str,
        status: ClaimStatus,
    ) {
        let claim = store::insert_claim(
            pool,
            NewClaim {
                entity_id,
                field: "eye_color",
                value: &ClaimValue::Text(value.to_string()),
                status,
                confidence: 0.8,
                supersedes_claim_id: None,
            },
        )
        .await
        .unwrap();
        store::insert_claim_evidence(pool, &claim.id, chunk_id, 0, 10)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn conflicting_values_emit_one_issue() {
        let (pool, project_id, _, chunk_id) = setup().await;
        let entity = store::get_or_create_entity(&pool, &project_id, "character", "Lina")
            .await
            .unwrap();
        evidenced_claim(&pool, &entity.id, &chunk_id, "green", ClaimStatus::Inferred).await;
        evidenced_claim(&pool, &entity.id, &chunk_id, "hazel", ClaimStatus::Inferred).await;

        let emitted = run_continuity(&pool, &project_id).await.unwrap();
        assert_eq!(emitted, 1);
        let issues = store::list_issues(&pool, &project_id, IssueFilter::Open)
            .await
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, "medium");
        let evidence = store::list_issue_evidence(&pool, &issues[0].id).await.unwrap();
        assert_eq!(evidence.len(), 2);
    }

    #[tokio::test]
    async fn confirmed_vs_inferred_conflict_is_high_severity() {
        let (pool, project_id, _, chunk_id) = setup().await;
        let entity = store::get_or_create_entity(&pool, &project_id, "character", "Lina")
            .await
            .unwrap();
        evidenced_claim(&pool, &entity.id, &chunk_id, "green", ClaimStatus::Confirmed).await;
        evidenced_claim(&pool, &entity.id, &chunk_id, "hazel", ClaimStatus::Inferred).await;

        run_continuity(&pool, &project_id).await.unwrap();
        let issues = store::list_issues(&pool, &project_id, IssueFilter::Open)
            .await
            .unwrap();
        assert_eq!(issues[0].severity, "high");
    }

    #[tokio::test]
    async fn case_differences_do_not_conflict() {
        let (pool, project_id, _, chunk_id) = setup().await;
        let entity = store::get_or_create_entity(&pool, &project_id, "character", "Lina")
            .await
            .unwrap();
        evidenced_claim(&pool, &entity.id, &chunk_id, "Green", ClaimStatus::Inferred).await;
        evidenced_claim(&pool, &entity.id, &chunk_id, "green", ClaimStatus::Inferred).await;

        assert_eq!(run_continuity(&pool, &project_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rerun_clears_open_but_keeps_dismissed() {
        let (pool, project_id, _, chunk_id) = setup().await;
        let entity = store::get_or_create_entity(&pool, &project_id, "character", "Lina")
            .await
            .unwrap();
        evidenced_claim(&pool, &entity.id, &chunk_id, "green", ClaimStatus::Inferred).await;
        evidenced_claim(&pool, &entity.id, &chunk_id, "hazel", ClaimStatus::Inferred).await;

        run_continuity(&pool, &project_id).await.unwrap();
        let first = store::list_issues(&pool, &project_id, IssueFilter::Open)
            .await
            .unwrap()
            .remove(0);
        store::set_issue_status(&pool, &first.id, crate::models::IssueStatus::Dismissed)
            .await
            .unwrap();

        run_continuity(&pool, &project_id).await.unwrap();
        let all = store::list_issues(&pool, &project_id, IssueFilter::All).await.unwrap();
        // Dismissed original survives, fresh open issue replaces nothing stale
        assert_eq!(all.len(), 2);
        assert!(all.iter().any(|i| i.status == "dismissed"));
        assert_eq!(
            all.iter().filter(|i| i.status == "open").count(),
            1
        );
    }

    #[tokio::test]
    async fn claims_without_evidence_are_ignored() {
        let (pool, project_id, _, chunk_id) = setup().await;
        let entity = store::get_or_create_entity(&pool, &project_id, "character", "Lina")
            .await
            .unwrap();
        evidenced_claim(&pool, &entity.id, &chunk_id, "green", ClaimStatus::Inferred).await;
        store::insert_claim(
            &pool,
            NewClaim {
                entity_id: &entity.id,
                field: "eye_color",
                value: &ClaimValue::Text("hazel".to_string()),
                status: ClaimStatus::Inferred,
                confidence: 0.5,
                supersedes_claim_id: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(run_continuity(&pool, &project_id).await.unwrap(), 0);
    }
}
