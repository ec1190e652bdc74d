//! Style analysis: repetition, tone drift, and dialogue tics.
//!
//! The runner wires the three analyzers to storage. Each run clears its own
//! open issues first and fully replaces its metrics, so re-running after an
//! ingest never accumulates duplicates.

pub mod dialogue;
pub mod repetition;
pub mod tone;

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::StyleConfig;
use crate::models::{ChunkRow, SceneRow, Severity};
use crate::spans::find_exact_span_ignore_case;
use crate::store::{self, NewIssue};

use dialogue::{DialogueAnalyzer, Tic};
use repetition::ChunkTokens;
use tone::ToneModel;

pub const REPETITION_ISSUE: &str = "repetition";
pub const TONE_ISSUE: &str = "tone_drift";
pub const DIALOGUE_ISSUE: &str = "dialogue_tic";

const NGRAM_METRIC: &str = "ngram_freq";
const TONE_METRIC: &str = "tone_vector";
const DIALOGUE_METRIC: &str = "dialogue_tics";

/// Evidence for a tone issue quotes this much of the scene opening.
const TONE_EVIDENCE_BYTES: usize = 160;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StyleSummary {
    pub repetition_issues: usize,
    pub tone_issues: usize,
    pub dialogue_issues: usize,
}

/// Run all three analyzers over the project's current chunks and scenes.
pub async fn run_style(
    pool: &SqlitePool,
    project_id: &str,
    cfg: &StyleConfig,
    tone_model: &dyn ToneModel,
) -> Result<StyleSummary> {
    let chunks = store::list_chunks_for_project(pool, project_id).await?;
    let scenes = store::list_scenes_for_project(pool, project_id).await?;
    let scene_of = scene_membership(&chunks, &scenes);

    let summary = StyleSummary {
        repetition_issues: run_repetition(pool, project_id, cfg, &chunks, &scene_of).await?,
        tone_issues: run_tone(pool, project_id, cfg, &chunks, &scenes, tone_model).await?,
        dialogue_issues: run_dialogue(pool, project_id, &chunks).await?,
    };

    info!(
        project_id,
        repetition = summary.repetition_issues,
        tone = summary.tone_issues,
        dialogue = summary.dialogue_issues,
        "style analysis complete"
    );
    Ok(summary)
}

/// Resolve chunk → scene via ordinal ranges within each document.
fn scene_membership(chunks: &[ChunkRow], scenes: &[SceneRow]) -> HashMap<String, String> {
    let ordinal_of: HashMap<&str, (&str, i64)> = chunks
        .iter()
        .map(|c| (c.id.as_str(), (c.document_id.as_str(), c.ordinal)))
        .collect();

    let mut membership = HashMap::new();
    for scene in scenes {
        let Some(&(doc, start)) = ordinal_of.get(scene.start_chunk_id.as_str()) else {
            continue;
        };
        let Some(&(_, end)) = ordinal_of.get(scene.end_chunk_id.as_str()) else {
            continue;
        };
        for chunk in chunks {
            if chunk.document_id == doc && chunk.ordinal >= start && chunk.ordinal <= end {
                membership.insert(chunk.id.clone(), scene.id.clone());
            }
        }
    }
    membership
}

async fn run_repetition(
    pool: &SqlitePool,
    project_id: &str,
    cfg: &StyleConfig,
    chunks: &[ChunkRow],
    scene_of: &HashMap<String, String>,
) -> Result<usize> {
    store::clear_open_issues_by_type(pool, project_id, REPETITION_ISSUE).await?;

    let tokenized: Vec<ChunkTokens> = chunks
        .iter()
        .map(|c| ChunkTokens {
            chunk_id: c.id.clone(),
            scene_id: scene_of.get(&c.id).cloned(),
            tokens: repetition::tokenize_words(&c.text),
        })
        .collect();
    let findings = repetition::find_repetitions(
        &tokenized,
        cfg.repetition_project_count as usize,
        cfg.repetition_scene_count as usize,
    );

    store::upsert_style_metric(
        pool,
        project_id,
        "project",
        project_id,
        NGRAM_METRIC,
        &serde_json::to_string(&findings)?,
    )
    .await?;

    let text_of: HashMap<&str, &str> = chunks
        .iter()
        .map(|c| (c.id.as_str(), c.text.as_str()))
        .collect();

    let mut emitted = 0usize;
    for finding in findings.iter().take(repetition::MAX_ISSUES) {
        let issue = store::insert_issue(
            pool,
            NewIssue {
                project_id,
                issue_type: REPETITION_ISSUE,
                severity: Severity::Low,
                title: &format!("Repeated phrase \"{}\"", finding.gram),
                description: &format!(
                    "\"{}\" appears {} times across the manuscript (peak {} in one scene)",
                    finding.gram, finding.total, finding.max_scene_count
                ),
            },
        )
        .await?;
        if let Some(text) = text_of.get(finding.example_chunk_id.as_str()) {
            // grams were lowercased at tokenization; match case-insensitively
            // so the offsets index the stored chunk text
            if let Some(span) = find_exact_span_ignore_case(text, &finding.gram) {
                store::insert_issue_evidence(
                    pool,
                    &issue.id,
                    &finding.example_chunk_id,
                    span.start as i64,
                    span.end as i64,
                )
                .await?;
            }
        }
        emitted += 1;
    }
    Ok(emitted)
}

async fn run_tone(
    pool: &SqlitePool,
    project_id: &str,
    cfg: &StyleConfig,
    chunks: &[ChunkRow],
    scenes: &[SceneRow],
    model: &dyn ToneModel,
) -> Result<usize> {
    store::clear_open_issues_by_type(pool, project_id, TONE_ISSUE).await?;

    let ordinal_of: HashMap<&str, (&str, i64)> = chunks
        .iter()
        .map(|c| (c.id.as_str(), (c.document_id.as_str(), c.ordinal)))
        .collect();

    let mut emitted = 0usize;
    let mut window: Vec<Vec<f64>> = Vec::new();

    for scene in scenes {
        let Some(&(doc, start)) = ordinal_of.get(scene.start_chunk_id.as_str()) else {
            continue;
        };
        let Some(&(_, end)) = ordinal_of.get(scene.end_chunk_id.as_str()) else {
            continue;
        };
        let scene_chunks: Vec<&ChunkRow> = chunks
            .iter()
            .filter(|c| c.document_id == doc && c.ordinal >= start && c.ordinal <= end)
            .collect();
        let text: String = scene_chunks.iter().map(|c| c.text.as_str()).collect();

        let vector = model.tone_vector(&text);
        let drift = match tone::rolling_baseline(&window) {
            Some(baseline) => tone::drift_score(&vector, &baseline),
            None => 0.0,
        };

        store::upsert_style_metric(
            pool,
            project_id,
            "scene",
            &scene.id,
            TONE_METRIC,
            &serde_json::to_string(&tone::ToneReading {
                vector: vector.clone(),
                drift,
            })?,
        )
        .await?;

        if drift >= tone::DRIFT_THRESHOLD {
            let issue = store::insert_issue(
                pool,
                NewIssue {
                    project_id,
                    issue_type: TONE_ISSUE,
                    severity: Severity::Medium,
                    title: &format!(
                        "Tone shift in {}",
                        scene.title.as_deref().unwrap_or("untitled scene")
                    ),
                    description: &format!(
                        "Scene tone drifts {:.1} from the surrounding baseline",
                        drift
                    ),
                },
            )
            .await?;
            if let Some(first) = scene_chunks.first() {
                let end = evidence_end(&first.text);
                store::insert_issue_evidence(pool, &issue.id, &first.id, 0, end as i64).await?;
            }
            emitted += 1;
        }

        window.push(vector);
        if window.len() > cfg.tone_baseline_scenes {
            window.remove(0);
        }
    }
    Ok(emitted)
}

fn evidence_end(text: &str) -> usize {
    let mut end = TONE_EVIDENCE_BYTES.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    end
}

async fn run_dialogue(pool: &SqlitePool, project_id: &str, chunks: &[ChunkRow]) -> Result<usize> {
    store::clear_open_issues_by_type(pool, project_id, DIALOGUE_ISSUE).await?;

    let analyzer = DialogueAnalyzer::default();
    let mut lines = Vec::new();
    for chunk in chunks {
        lines.extend(analyzer.extract_lines(&chunk.id, &chunk.text));
    }
    let profiles = dialogue::profile_speakers(&lines);

    // Speakers are auto-vivified as character entities so their tic profile
    // has a stable scope key.
    for profile in &profiles {
        let entity =
            store::get_or_create_entity(pool, project_id, "character", &profile.speaker).await?;
        store::upsert_style_metric(
            pool,
            project_id,
            "entity",
            &entity.id,
            DIALOGUE_METRIC,
            &serde_json::to_string(profile)?,
        )
        .await?;
    }

    let mut emitted = 0usize;
    for finding in dialogue::find_tics(&profiles) {
        let (title, description) = match &finding.tic {
            Tic::Starter { phrase, count } => (
                format!("{} keeps opening lines with \"{}\"", finding.speaker, phrase),
                format!("Starter phrase \"{phrase}\" appears {count} times"),
            ),
            Tic::Filler { word, count } => (
                format!("{} leans on \"{}\"", finding.speaker, word),
                format!("Filler \"{word}\" appears {count} times in dialogue"),
            ),
        };
        let issue = store::insert_issue(
            pool,
            NewIssue {
                project_id,
                issue_type: DIALOGUE_ISSUE,
                severity: Severity::Low,
                title: &title,
                description: &description,
            },
        )
        .await?;
        for example in &finding.examples {
            store::insert_issue_evidence(
                pool,
                &issue.id,
                &example.chunk_id,
                example.start as i64,
                example.end as i64,
            )
            .await?;
        }
        emitted += 1;
    }
    Ok(emitted)
}

/// Read path for the style report command.
#[derive(Debug, Serialize)]
pub struct StyleReport {
    pub ngram_frequencies: serde_json::Value,
    pub scene_tones: Vec<serde_json::Value>,
    pub speaker_profiles: Vec<serde_json::Value>,
}

pub async fn style_report(pool: &SqlitePool, project_id: &str) -> Result<StyleReport> {
    let ngram = store::get_style_metric(pool, "project", project_id, NGRAM_METRIC).await?;
    let tones = store::list_style_metrics(pool, project_id, TONE_METRIC).await?;
    let speakers = store::list_style_metrics(pool, project_id, DIALOGUE_METRIC).await?;

    let parse = |raw: &str| -> serde_json::Value {
        serde_json::from_str(raw).unwrap_or(serde_json::Value::Null)
    };

    Ok(StyleReport {
        ngram_frequencies: ngram
            .map(|m| parse(&m.metric_json))
            .unwrap_or(json!([])),
        scene_tones: tones
            .iter()
            .map(|m| json!({ "scene_id": m.scope_id, "reading": parse(&m.metric_json) }))
            .collect(),
        speaker_profiles: speakers
            .iter()
            .map(|m| json!({ "entity_id": m.scope_id, "profile": parse(&m.metric_json) }))
            .collect(),
    })
}
