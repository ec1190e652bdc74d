//! Worker session: the command surface consumed by the CLI (or any other
//! front end).
//!
//! One session owns the open project's pool, config, LLM provider, and the
//! ingest queue. Commands validate input synchronously, run against storage,
//! and return serializable data or a coded error. Ingest requests go through
//! the queue with a timeout; timing out abandons the wait, never the job.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::info;

use crate::ask::{self, AskResult};
use crate::canon::{self, EntityDetail};
use crate::config::{load_project_config, ProjectConfig};
use crate::export::{self, ExportFormat};
use crate::ingest::{self, IngestOutcome};
use crate::jobs::JobQueue;
use crate::llm::{provider_from_config, LlmProvider};
use crate::models::{
    ClaimValue, DocumentRow, EntityRow, EvidenceRow, IssueRow, IssueStatus, ProcessingStateRow,
    ProjectRow, SceneRow,
};
use crate::search::SearchHit;
use crate::store::{self, IssueFilter};
use crate::style::{self, StyleReport};

/// How long a caller waits on an enqueued ingest before giving up. The job
/// itself keeps running.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0:#}")]
    Storage(#[from] anyhow::Error),
    #[error("ingest failed: {0}")]
    Job(String),
    #[error("request timed out after {}s; the job continues in the background", .0.as_secs())]
    Timeout(Duration),
}

impl CommandError {
    /// Stable code for the UI boundary.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::InvalidInput(_) => "invalid_input",
            CommandError::NotFound(_) => "not_found",
            CommandError::Storage(_) => "storage",
            CommandError::Job(_) => "job_failed",
            CommandError::Timeout(_) => "timeout",
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

struct IngestJob {
    rel_path: String,
}

pub struct WorkerSession {
    pool: SqlitePool,
    config: ProjectConfig,
    project: ProjectRow,
    root: PathBuf,
    provider: Arc<dyn LlmProvider>,
    queue: JobQueue<IngestJob, IngestOutcome>,
}

impl WorkerSession {
    /// Open (or initialize) the project rooted at `root`.
    pub async fn open(root: &Path) -> CommandResult<Self> {
        if !root.is_dir() {
            return Err(CommandError::InvalidInput(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        let root = root
            .canonicalize()
            .map_err(|e| CommandError::InvalidInput(format!("unusable project root: {e}")))?;

        let config = load_project_config(&root)?;
        let pool = crate::db::connect(&root).await?;
        crate::migrate::run_migrations(&pool).await?;

        let name = config
            .project_name
            .clone()
            .or_else(|| {
                root.file_name()
                    .map(|n| n.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "untitled".to_string());
        let project =
            store::get_or_create_project(&pool, &root.to_string_lossy(), &name).await?;

        let provider: Arc<dyn LlmProvider> = Arc::from(provider_from_config(&config.llm)?);

        let queue = {
            let pool = pool.clone();
            let config = config.clone();
            let project_id = project.id.clone();
            let root = root.clone();
            let provider = Arc::clone(&provider);
            JobQueue::new(Arc::new(move |_key: String, job: IngestJob| {
                let pool = pool.clone();
                let config = config.clone();
                let project_id = project_id.clone();
                let root = root.clone();
                let provider = Arc::clone(&provider);
                Box::pin(async move {
                    ingest::ingest_document(
                        &pool,
                        &config,
                        &project_id,
                        &root,
                        &job.rel_path,
                        provider.as_ref(),
                    )
                    .await
                    .map_err(|e| format!("{e:#}"))
                })
            }))
        };

        info!(project = %project.name, root = %root.display(), "project opened");
        Ok(Self {
            pool,
            config,
            project,
            root,
            provider,
            queue,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn project(&self) -> &ProjectRow {
        &self.project
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Validate and normalize a manuscript path to be project-relative.
    fn normalize_rel_path(&self, path: &str) -> CommandResult<String> {
        if path.trim().is_empty() {
            return Err(CommandError::InvalidInput(
                "document path must not be empty".to_string(),
            ));
        }
        let candidate = Path::new(path);
        let rel = if candidate.is_absolute() {
            candidate
                .strip_prefix(&self.root)
                .map_err(|_| {
                    CommandError::InvalidInput(format!(
                        "{path} is outside the project root"
                    ))
                })?
                .to_path_buf()
        } else {
            candidate.to_path_buf()
        };
        if rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(CommandError::InvalidInput(format!(
                "{path} is outside the project root"
            )));
        }
        Ok(rel.to_string_lossy().replace('\\', "/"))
    }

    /// Queue an ingest for a document and wait for the outcome.
    pub async fn add_document(&self, path: &str) -> CommandResult<IngestOutcome> {
        let rel_path = self.normalize_rel_path(path)?;
        if !self.root.join(&rel_path).is_file() {
            return Err(CommandError::NotFound(format!(
                "no file at {rel_path} under the project root"
            )));
        }

        let key = format!("{}:{}", self.project.id, rel_path);
        let rx = self
            .queue
            .enqueue(&key, IngestJob { rel_path })
            .await;
        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Err(_) => Err(CommandError::Timeout(REQUEST_TIMEOUT)),
            Ok(Err(_)) => Err(CommandError::Job("ingest worker stopped".to_string())),
            Ok(Ok(Err(message))) => Err(CommandError::Job(message)),
            Ok(Ok(Ok(outcome))) => Ok(outcome),
        }
    }

    /// Queue an ingest without waiting. Used by the file watcher.
    pub async fn enqueue_ingest(&self, path: &str) -> CommandResult<()> {
        let rel_path = self.normalize_rel_path(path)?;
        let key = format!("{}:{}", self.project.id, rel_path);
        let _ = self.queue.enqueue(&key, IngestJob { rel_path }).await;
        Ok(())
    }

    /// Scan the project root for manuscript files and queue an ingest for
    /// each. Used when a watch starts, so pre-existing files are indexed.
    pub async fn enqueue_existing_documents(&self) -> CommandResult<usize> {
        let mut queued = 0usize;
        for entry in walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".canonkeeper")
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let is_manuscript = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| {
                    matches!(ext.to_lowercase().as_str(), "md" | "txt" | "markdown")
                });
            if !is_manuscript {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                self.enqueue_ingest(&rel.to_string_lossy()).await?;
                queued += 1;
            }
        }
        Ok(queued)
    }

    pub async fn status(&self) -> CommandResult<ProjectStatus> {
        let documents = store::list_documents(&self.pool, &self.project.id).await?;
        let mut processing = Vec::new();
        for doc in &documents {
            processing.extend(store::list_processing_states(&self.pool, &doc.id).await?);
        }

        let chunk_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunk c JOIN document d ON d.id = c.document_id WHERE d.project_id = ?",
        )
        .bind(&self.project.id)
        .fetch_one(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;
        let scene_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM scene WHERE project_id = ?")
                .bind(&self.project.id)
                .fetch_one(&self.pool)
                .await
                .map_err(anyhow::Error::from)?;
        let entity_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM entity WHERE project_id = ?")
                .bind(&self.project.id)
                .fetch_one(&self.pool)
                .await
                .map_err(anyhow::Error::from)?;
        let open_issues = store::count_open_issues(&self.pool, &self.project.id).await?;

        Ok(ProjectStatus {
            project: self.project.clone(),
            document_count: documents.len(),
            chunk_count,
            scene_count,
            entity_count,
            open_issues,
            pending_jobs: self.queue.pending().await,
            documents,
            processing,
        })
    }

    pub async fn search(&self, query: &str, limit: i64) -> CommandResult<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(CommandError::InvalidInput(
                "search query must not be empty".to_string(),
            ));
        }
        let limit = if limit <= 0 { 10 } else { limit };
        Ok(crate::search::search_chunks(&self.pool, query, limit, Some(&self.project.id)).await?)
    }

    pub async fn ask(&self, question: &str) -> CommandResult<AskResult> {
        if question.trim().is_empty() {
            return Err(CommandError::InvalidInput(
                "question must not be empty".to_string(),
            ));
        }
        Ok(ask::ask_question_grounded(
            &self.pool,
            &self.project.id,
            question,
            8,
            self.provider.as_ref(),
        )
        .await?)
    }

    pub async fn list_scenes(&self) -> CommandResult<Vec<SceneRow>> {
        Ok(store::list_scenes_for_project(&self.pool, &self.project.id).await?)
    }

    pub async fn get_scene(&self, scene_id: &str) -> CommandResult<SceneDetail> {
        let scene = store::get_scene_by_id(&self.pool, scene_id)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("no scene {scene_id}")))?;
        let evidence = store::list_scene_evidence(&self.pool, scene_id).await?;
        Ok(SceneDetail { scene, evidence })
    }

    pub async fn list_issues(&self, filter: IssueFilter) -> CommandResult<Vec<IssueWithEvidence>> {
        let issues = store::list_issues(&self.pool, &self.project.id, filter).await?;
        let mut out = Vec::with_capacity(issues.len());
        for issue in issues {
            let evidence = store::list_issue_evidence(&self.pool, &issue.id).await?;
            out.push(IssueWithEvidence { issue, evidence });
        }
        Ok(out)
    }

    pub async fn dismiss_issue(&self, issue_id: &str) -> CommandResult<()> {
        self.transition_issue(issue_id, IssueStatus::Dismissed).await
    }

    pub async fn resolve_issue(&self, issue_id: &str) -> CommandResult<()> {
        self.transition_issue(issue_id, IssueStatus::Resolved).await
    }

    /// Reverse a dismiss/resolve, reopening the issue.
    pub async fn undo_issue(&self, issue_id: &str) -> CommandResult<()> {
        self.transition_issue(issue_id, IssueStatus::Open).await
    }

    async fn transition_issue(&self, issue_id: &str, status: IssueStatus) -> CommandResult<()> {
        if !store::set_issue_status(&self.pool, issue_id, status).await? {
            return Err(CommandError::NotFound(format!("no issue {issue_id}")));
        }
        Ok(())
    }

    pub async fn list_entities(&self) -> CommandResult<Vec<EntityRow>> {
        Ok(store::list_entities(&self.pool, &self.project.id).await?)
    }

    pub async fn get_entity(&self, entity_id: &str) -> CommandResult<EntityDetail> {
        canon::get_entity_detail(&self.pool, entity_id)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("no entity {entity_id}")))
    }

    /// Accept a value as canon. `value` is parsed as JSON when possible and
    /// falls back to a plain string.
    pub async fn confirm_claim(
        &self,
        entity_id: &str,
        field: &str,
        value: &str,
        source_claim_id: Option<&str>,
    ) -> CommandResult<String> {
        if field.trim().is_empty() {
            return Err(CommandError::InvalidInput(
                "claim field must not be empty".to_string(),
            ));
        }
        if store::get_entity_by_id(&self.pool, entity_id).await?.is_none() {
            return Err(CommandError::NotFound(format!("no entity {entity_id}")));
        }
        if let Some(source) = source_claim_id {
            let claim = store::get_claim_by_id(&self.pool, source)
                .await?
                .ok_or_else(|| CommandError::NotFound(format!("no claim {source}")))?;
            if claim.entity_id != entity_id || claim.field != field {
                return Err(CommandError::InvalidInput(
                    "source claim does not belong to this entity field".to_string(),
                ));
            }
        }

        let claim_value = ClaimValue::from_stored(value);
        let claim =
            canon::confirm_claim(&self.pool, entity_id, field, &claim_value, source_claim_id)
                .await?;
        Ok(claim.id)
    }

    pub async fn style_report(&self) -> CommandResult<StyleReport> {
        Ok(style::style_report(&self.pool, &self.project.id).await?)
    }

    /// Export the story bible. `out` of `None` renders to the returned
    /// string only.
    pub async fn export(
        &self,
        format: ExportFormat,
        out: Option<&Path>,
    ) -> CommandResult<String> {
        Ok(export::export_bible(&self.pool, &self.project.id, format, out).await?)
    }
}

#[derive(Debug, Serialize)]
pub struct ProjectStatus {
    pub project: ProjectRow,
    pub document_count: usize,
    pub chunk_count: i64,
    pub scene_count: i64,
    pub entity_count: i64,
    pub open_issues: i64,
    pub pending_jobs: usize,
    pub documents: Vec<DocumentRow>,
    pub processing: Vec<ProcessingStateRow>,
}

#[derive(Debug, Serialize)]
pub struct SceneDetail {
    pub scene: SceneRow,
    pub evidence: Vec<EvidenceRow>,
}

#[derive(Debug, Serialize)]
pub struct IssueWithEvidence {
    pub issue: IssueRow,
    pub evidence: Vec<EvidenceRow>,
}
