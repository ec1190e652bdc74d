//! Story-bible export.
//!
//! Renders the current canon (entities with supported claims), scene list,
//! and open issues as JSON or Markdown. The same read path as the bible
//! view backs it, so evidence-less inferred claims never leak into exports.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::canon::{self, EntityDetail};
use crate::models::{IssueRow, SceneRow};
use crate::store::{self, IssueFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<ExportFormat> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "markdown" | "md" => Some(ExportFormat::Markdown),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct Bible {
    project_name: String,
    entities: Vec<EntityDetail>,
    scenes: Vec<SceneRow>,
    open_issues: Vec<IssueRow>,
}

async fn collect_bible(pool: &SqlitePool, project_id: &str) -> Result<Bible> {
    let project_name: String = sqlx::query_scalar("SELECT name FROM project WHERE id = ?")
        .bind(project_id)
        .fetch_one(pool)
        .await?;

    let mut entities = Vec::new();
    for entity in store::list_entities(pool, project_id).await? {
        if let Some(detail) = canon::get_entity_detail(pool, &entity.id).await? {
            if !detail.fields.is_empty() {
                entities.push(detail);
            }
        }
    }
    let scenes = store::list_scenes_for_project(pool, project_id).await?;
    let open_issues = store::list_issues(pool, project_id, IssueFilter::Open).await?;

    Ok(Bible {
        project_name,
        entities,
        scenes,
        open_issues,
    })
}

fn render_markdown(bible: &Bible) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Story Bible: {}\n", bible.project_name));

    out.push_str("\n## Entities\n");
    if bible.entities.is_empty() {
        out.push_str("\nNo entities with supported claims yet.\n");
    }
    for detail in &bible.entities {
        out.push_str(&format!(
            "\n### {} ({})\n",
            detail.entity.display_name, detail.entity.entity_type
        ));
        if !detail.aliases.is_empty() {
            out.push_str(&format!("Also known as: {}\n", detail.aliases.join(", ")));
        }
        for field in &detail.fields {
            out.push_str(&format!("\n- **{}**\n", field.field));
            for claim in &field.claims {
                out.push_str(&format!(
                    "  - {} ({}, confidence {:.2})\n",
                    claim.value.normalized(),
                    claim.status,
                    claim.confidence
                ));
                for evidence in &claim.evidence {
                    out.push_str(&format!("    > {}\n", evidence.excerpt));
                }
            }
        }
    }

    out.push_str("\n## Scenes\n");
    for scene in &bible.scenes {
        let title = scene.title.as_deref().unwrap_or("(untitled)");
        out.push_str(&format!(
            "\n- Scene {}: {} [pov: {}]\n",
            scene.ordinal + 1,
            title,
            scene.pov_mode
        ));
    }

    out.push_str("\n## Open Issues\n");
    if bible.open_issues.is_empty() {
        out.push_str("\nNone.\n");
    }
    for issue in &bible.open_issues {
        out.push_str(&format!(
            "\n- [{}/{}] {}\n  {}\n",
            issue.issue_type, issue.severity, issue.title, issue.description
        ));
    }

    out
}

/// Render the bible and optionally write it to a file. Returns the rendered
/// document either way.
pub async fn export_bible(
    pool: &SqlitePool,
    project_id: &str,
    format: ExportFormat,
    out: Option<&Path>,
) -> Result<String> {
    let bible = collect_bible(pool, project_id).await?;
    let rendered = match format {
        ExportFormat::Json => serde_json::to_string_pretty(&bible)?,
        ExportFormat::Markdown => render_markdown(&bible),
    };
    if let Some(path) = out {
        std::fs::write(path, &rendered)
            .with_context(|| format!("Failed to write export to {}", path.display()))?;
    }
    Ok(rendered)
}
