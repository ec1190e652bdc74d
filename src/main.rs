//! # CanonKeeper CLI (`canon`)
//!
//! The `canon` binary drives a CanonKeeper project from the terminal.
//!
//! ## Usage
//!
//! ```bash
//! canon --root ./my-novel <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `canon init` | Create the project database and schema |
//! | `canon status` | Project counts and per-document processing state |
//! | `canon add <path>` | Ingest a manuscript file and wait for the result |
//! | `canon watch` | Watch the project root and ingest on change |
//! | `canon search "<query>"` | Full-text search over chunk text |
//! | `canon ask "<question>"` | Grounded question answering |
//! | `canon scenes [id]` | List scenes, or show one with evidence |
//! | `canon issues [--status all]` | List issues with evidence |
//! | `canon issues dismiss/resolve/undo <id>` | Issue triage |
//! | `canon entities [id]` | List entities, or show one's claims |
//! | `canon confirm <entity> <field> <value>` | Accept a value as canon |
//! | `canon style` | Style report (repetition, tone, dialogue) |
//! | `canon export --format json\|md` | Story-bible export |

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use canonkeeper::export::ExportFormat;
use canonkeeper::models::IssueStatus;
use canonkeeper::session::{CommandError, WorkerSession};
use canonkeeper::store::IssueFilter;

/// CanonKeeper — evidence-grounded canon tracking for fiction manuscripts.
///
/// All commands operate on the project rooted at `--root` (default: the
/// current directory). Configuration is read from `canonkeeper.toml` at the
/// project root when present.
#[derive(Parser)]
#[command(
    name = "canon",
    about = "CanonKeeper — evidence-grounded canon tracking for fiction manuscripts",
    version
)]
struct Cli {
    /// Project root directory.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the project database.
    ///
    /// Creates `.canonkeeper/canonkeeper.db` under the project root and runs
    /// schema migrations. Idempotent.
    Init,

    /// Show project status.
    ///
    /// Document, chunk, scene, and entity counts, open issues, queued jobs,
    /// and per-document processing state.
    Status,

    /// Ingest one manuscript file.
    ///
    /// Chunks the file, rebuilds scenes, re-runs the analyzers, and (when an
    /// LLM provider is configured) extracts canon claims. Waits up to 30
    /// seconds for the result; the job continues if the wait times out.
    Add {
        /// Path to the manuscript file, relative to the project root.
        path: String,
    },

    /// Watch the project root and ingest files as they change.
    ///
    /// Change events are debounced per file (2 s by default) so partial
    /// editor writes do not trigger redundant ingests. Runs until
    /// interrupted.
    Watch,

    /// Search chunk text.
    Search {
        /// Query text. Natural-language questions work; degenerate queries
        /// fall back through sanitized and OR-joined forms.
        query: String,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },

    /// Ask a question about the manuscript.
    ///
    /// Returns matching snippets, or a cited answer when an LLM provider is
    /// configured and every citation verifies against the text.
    Ask {
        /// The question.
        question: String,
    },

    /// List scenes, or show one scene with its evidence.
    Scenes {
        /// Scene id to show in detail.
        id: Option<String>,
    },

    /// List and triage issues.
    Issues {
        #[command(subcommand)]
        action: Option<IssueAction>,

        /// Status filter: open (default), dismissed, resolved, or all.
        #[arg(long, default_value = "open")]
        status: String,
    },

    /// List entities, or show one entity's claims and evidence.
    Entities {
        /// Entity id to show in detail.
        id: Option<String>,
    },

    /// Confirm a value as canon for an entity field.
    ///
    /// Inserts a confirmed claim and supersedes the remaining inferred
    /// claims for that field.
    Confirm {
        /// Entity id.
        entity: String,

        /// Field name, e.g. `eye_color`.
        field: String,

        /// Value. Parsed as JSON when possible, otherwise stored as text.
        value: String,

        /// Inferred claim whose evidence should carry over.
        #[arg(long)]
        from_claim: Option<String>,
    },

    /// Show the style report.
    Style,

    /// Export the story bible.
    Export {
        /// Output format: json or md.
        #[arg(long, default_value = "json")]
        format: String,

        /// Write to a file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

/// Issue triage subcommands.
#[derive(Subcommand)]
enum IssueAction {
    /// Dismiss an issue (reversible with undo).
    Dismiss { id: String },
    /// Mark an issue resolved.
    Resolve { id: String },
    /// Reopen a dismissed or resolved issue.
    Undo { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("canonkeeper=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error[{}]: {}", err.code(), err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CommandError> {
    let session = WorkerSession::open(&cli.root).await?;

    match cli.command {
        Commands::Init => {
            // Opening the session created the database and ran migrations.
            println!("Project initialized at {}", session.root().display());
        }
        Commands::Status => {
            let status = session.status().await?;
            print_json(&status)?;
        }
        Commands::Add { path } => {
            let outcome = session.add_document(&path).await?;
            print_json(&outcome)?;
        }
        Commands::Watch => {
            run_watch(session).await?;
        }
        Commands::Search { query, limit } => {
            let hits = session.search(&query, limit).await?;
            print_json(&hits)?;
        }
        Commands::Ask { question } => {
            let result = session.ask(&question).await?;
            print_json(&result)?;
        }
        Commands::Scenes { id } => match id {
            Some(id) => print_json(&session.get_scene(&id).await?)?,
            None => print_json(&session.list_scenes().await?)?,
        },
        Commands::Issues { action, status } => match action {
            Some(IssueAction::Dismiss { id }) => {
                session.dismiss_issue(&id).await?;
                println!("Issue {id} dismissed.");
            }
            Some(IssueAction::Resolve { id }) => {
                session.resolve_issue(&id).await?;
                println!("Issue {id} resolved.");
            }
            Some(IssueAction::Undo { id }) => {
                session.undo_issue(&id).await?;
                println!("Issue {id} reopened.");
            }
            None => {
                let filter = parse_issue_filter(&status)?;
                print_json(&session.list_issues(filter).await?)?;
            }
        },
        Commands::Entities { id } => match id {
            Some(id) => print_json(&session.get_entity(&id).await?)?,
            None => print_json(&session.list_entities().await?)?,
        },
        Commands::Confirm {
            entity,
            field,
            value,
            from_claim,
        } => {
            let claim_id = session
                .confirm_claim(&entity, &field, &value, from_claim.as_deref())
                .await?;
            println!("Confirmed claim {claim_id}.");
        }
        Commands::Style => {
            print_json(&session.style_report().await?)?;
        }
        Commands::Export { format, out } => {
            let format = ExportFormat::parse(&format).ok_or_else(|| {
                CommandError::InvalidInput(format!(
                    "unknown export format '{format}'; use json or md"
                ))
            })?;
            let rendered = session.export(format, out.as_deref()).await?;
            match out {
                Some(path) => println!("Exported to {}", path.display()),
                None => println!("{rendered}"),
            }
        }
    }

    Ok(())
}

fn parse_issue_filter(status: &str) -> Result<IssueFilter, CommandError> {
    match status {
        "open" => Ok(IssueFilter::Open),
        "all" => Ok(IssueFilter::All),
        "dismissed" => Ok(IssueFilter::Only(IssueStatus::Dismissed)),
        "resolved" => Ok(IssueFilter::Only(IssueStatus::Resolved)),
        other => Err(CommandError::InvalidInput(format!(
            "unknown status filter '{other}'; use open, dismissed, resolved, or all"
        ))),
    }
}

async fn run_watch(session: WorkerSession) -> Result<(), CommandError> {
    use std::sync::Arc;

    let session = Arc::new(session);
    let debounce =
        std::time::Duration::from_millis(session.config().watch.debounce_ms);
    let root = session.root().to_path_buf();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PathBuf>();
    let _watcher = canonkeeper::watcher::watch_documents(&root, debounce, move |path| {
        let _ = tx.send(path);
    })
    .map_err(CommandError::Storage)?;

    let queued = session.enqueue_existing_documents().await?;
    println!(
        "Watching {} (debounce {}ms, {} existing file(s) queued). Press Ctrl-C to stop.",
        root.display(),
        debounce.as_millis(),
        queued
    );

    loop {
        tokio::select! {
            settled = rx.recv() => {
                let Some(path) = settled else { break };
                let rel = path
                    .strip_prefix(&root)
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|_| path.to_string_lossy().to_string());
                println!("Change settled: {rel}");
                if let Err(err) = session.enqueue_ingest(&rel).await {
                    eprintln!("error[{}]: {}", err.code(), err);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Stopping watch.");
                break;
            }
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CommandError> {
    let rendered = serde_json::to_string_pretty(value).map_err(anyhow::Error::from)?;
    println!("{rendered}");
    Ok(())
}
