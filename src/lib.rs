//! # CanonKeeper
//!
//! An editorial tool for fiction manuscripts: it ingests manuscript text,
//! extracts evidence-grounded "canon" facts (characters, locations, rules),
//! detects continuity and style issues, and answers questions against the
//! indexed text.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────────────────────┐   ┌──────────┐
//! │  Watcher  │──▶│  Job Queue → Ingest      │──▶│  SQLite   │
//! │ debounce  │   │ chunk/scene/analyze/llm │   │ FTS5      │
//! └───────────┘   └─────────────────────────┘   └────┬─────┘
//!                                                    │
//!                              ┌─────────────────────┤
//!                              ▼                     ▼
//!                        ┌───────────┐         ┌───────────┐
//!                        │ search/ask│         │ bible/    │
//!                        │           │         │ issues    │
//!                        └───────────┘         └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! canon init                     # create the project database
//! canon add draft.md             # ingest a manuscript file
//! canon search "green eyes"      # full-text search
//! canon ask "What color are Lina's eyes?"
//! canon issues                   # open continuity/style issues
//! canon export --format md       # story-bible export
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML project configuration |
//! | [`models`] | Row types, status enums, claim values |
//! | [`chunking`] | Deterministic manuscript chunking |
//! | [`scenes`] | Scene boundary detection |
//! | [`spans`] | Exact/fuzzy evidence span location |
//! | [`store`] | SQLite repositories |
//! | [`canon`] | Claim confirmation and the bible read path |
//! | [`continuity`] | Cross-claim conflict detection |
//! | [`style`] | Repetition, tone drift, dialogue tics |
//! | [`search`] | FTS query sanitization and fallback tiers |
//! | [`ask`] | Grounded question answering |
//! | [`llm`] | Provider boundary, prompts, extraction |
//! | [`ingest`] | Per-document pipeline |
//! | [`jobs`] | Coalescing job queue |
//! | [`watcher`] | File watching with debounce |
//! | [`session`] | Worker session / command surface |
//! | [`export`] | Story-bible export |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod ask;
pub mod canon;
pub mod chunking;
pub mod config;
pub mod continuity;
pub mod db;
pub mod export;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod scenes;
pub mod search;
pub mod session;
pub mod spans;
pub mod store;
pub mod style;
pub mod watcher;
